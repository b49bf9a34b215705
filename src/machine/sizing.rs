//! CPU and memory sizing.

use vmbundle_protocol::HostCapabilities;

/// Memory given to a guest unless configured otherwise (4 GiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// User overrides for machine sizing.
///
/// Unset fields are derived from the host and clamped to the engine's
/// limits. Set fields are taken as-is and checked by validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizingPolicy {
    /// Fixed vCPU count.
    pub cpus: Option<u32>,
    /// Fixed memory size in bytes.
    pub memory_bytes: Option<u64>,
}

/// Resolved machine sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizing {
    /// Number of virtual CPUs.
    pub cpu_count: u32,
    /// Memory size in bytes.
    pub memory_bytes: u64,
}

impl SizingPolicy {
    /// Resolve sizing for this host.
    pub fn resolve(&self, host: &HostCapabilities) -> Sizing {
        self.resolve_for(host, host_cpu_count())
    }

    /// Resolve sizing given the host's logical CPU count.
    ///
    /// One host CPU is left to the host itself.
    pub fn resolve_for(&self, host: &HostCapabilities, host_cpus: u32) -> Sizing {
        let cpu_count = self.cpus.unwrap_or_else(|| {
            let wanted = if host_cpus <= 1 { 1 } else { host_cpus - 1 };
            clamp(wanted, host.min_cpus, host.max_cpus)
        });

        let memory_bytes = self.memory_bytes.unwrap_or_else(|| {
            clamp(
                DEFAULT_MEMORY_BYTES,
                host.min_memory_bytes,
                host.max_memory_bytes,
            )
        });

        Sizing {
            cpu_count,
            memory_bytes,
        }
    }
}

/// Number of logical CPUs available to this process.
pub fn host_cpu_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

// Unlike `Ord::clamp`, tolerates min > max (the upper bound wins).
fn clamp<T: Ord>(value: T, min: T, max: T) -> T {
    value.max(min).min(max)
}
