//! Configuration assembly and validation.

use super::{DevicePolicy, HardwareModel, MachineIdentifier, PlatformIdentity, SizingPolicy};
use crate::bundle::{Artifact, MachineBundle};
use crate::error::{Error, Result};
use crate::vm::{HostCapabilities, HostEngine};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use vmbundle_protocol::{BootLoaderSpec, DeviceSpec, MachineSpec, PlatformSpec};

const MIB: u64 = 1024 * 1024;

/// Which validation rejected a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Sizing, storage, display and share checks.
    General,
    /// Ability to save and restore the machine.
    SaveRestore,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationKind::General => write!(f, "general"),
            ValidationKind::SaveRestore => write!(f, "save/restore"),
        }
    }
}

/// A validated machine configuration.
///
/// Only [`ConfigurationBuilder`] creates one, and nothing mutates it
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfiguration {
    spec: MachineSpec,
}

impl MachineConfiguration {
    /// The configuration as sent to the engine.
    pub fn spec(&self) -> &MachineSpec {
        &self.spec
    }

    /// Platform identity.
    pub fn platform(&self) -> &PlatformSpec {
        &self.spec.platform
    }

    /// Boot loader.
    pub fn boot_loader(&self) -> &BootLoaderSpec {
        &self.spec.boot_loader
    }

    /// Number of virtual CPUs.
    pub fn cpu_count(&self) -> u32 {
        self.spec.cpu_count
    }

    /// Memory size in bytes.
    pub fn memory_bytes(&self) -> u64 {
        self.spec.memory_bytes
    }

    /// Attached devices.
    pub fn devices(&self) -> &[DeviceSpec] {
        &self.spec.devices
    }
}

/// Builds a [`MachineConfiguration`] from a bundle.
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder<'a> {
    bundle: &'a MachineBundle,
    sizing: SizingPolicy,
    devices: DevicePolicy,
}

impl<'a> ConfigurationBuilder<'a> {
    /// Start with host-derived sizing and the default device list.
    pub fn new(bundle: &'a MachineBundle) -> Self {
        Self {
            bundle,
            sizing: SizingPolicy::default(),
            devices: DevicePolicy::default(),
        }
    }

    /// Override the sizing policy.
    pub fn sizing(mut self, sizing: SizingPolicy) -> Self {
        self.sizing = sizing;
        self
    }

    /// Override the device policy.
    pub fn devices(mut self, devices: DevicePolicy) -> Self {
        self.devices = devices;
        self
    }

    /// Read the bundle, ask the engine about the host and validate.
    ///
    /// Reads files only; no machine is created. Every required artifact is
    /// checked before the engine is contacted.
    pub async fn build(&self, engine: &dyn HostEngine) -> Result<MachineConfiguration> {
        self.bundle.check_artifacts()?;

        let auxiliary_storage = self.artifact_location(Artifact::AuxiliaryStorage)?;

        let hardware_model =
            HardwareModel::from_bytes(self.bundle.read_artifact(Artifact::HardwareModel)?)
                .ok_or_else(|| self.empty_descriptor(Artifact::HardwareModel))?;
        let supported = engine
            .supports_hardware_model(&hardware_model)
            .await
            .map_err(Error::Engine)?;
        if !supported {
            tracing::warn!(bundle = %self.bundle.root().display(), "hardware model not supported");
            return Err(Error::UnsupportedHardwareModel);
        }

        let machine_identifier =
            MachineIdentifier::from_bytes(self.bundle.read_artifact(Artifact::MachineIdentifier)?)
                .ok_or_else(|| self.empty_descriptor(Artifact::MachineIdentifier))?;

        let platform = PlatformIdentity::new(hardware_model, machine_identifier, auxiliary_storage);
        let disk_image = self.artifact_location(Artifact::DiskImage)?;

        let host = engine.capabilities().await.map_err(Error::Engine)?;
        let sizing = self.sizing.resolve(&host);

        let spec = MachineSpec {
            platform: platform.to_spec(),
            boot_loader: BootLoaderSpec::MacOs,
            cpu_count: sizing.cpu_count,
            memory_bytes: sizing.memory_bytes,
            devices: self.devices.devices(&disk_image),
        };

        validate_configuration(&spec, &host)?;
        validate_save_restore_support(&spec, &host)?;

        tracing::debug!(
            engine = engine.name(),
            cpus = spec.cpu_count,
            memory_mib = spec.memory_bytes / MIB,
            devices = spec.devices.len(),
            "machine configuration validated"
        );

        Ok(MachineConfiguration { spec })
    }

    /// Check an artifact and return its path as the engine will receive it.
    fn artifact_location(&self, artifact: Artifact) -> Result<String> {
        let path = self.bundle.check_artifact(artifact)?;
        match path.to_str() {
            Some(location) => Ok(location.to_owned()),
            None => Err(Error::unreadable(artifact, &path, "path is not valid UTF-8")),
        }
    }

    fn empty_descriptor(&self, artifact: Artifact) -> Error {
        Error::unreadable(artifact, self.bundle.artifact_path(artifact), "descriptor is empty")
    }
}

/// General validity: sizing in range, bootable storage, a usable display and
/// unambiguous share tags. Reports every problem found.
pub fn validate_configuration(spec: &MachineSpec, host: &HostCapabilities) -> Result<()> {
    let mut problems = Vec::new();

    if spec.cpu_count < host.min_cpus || spec.cpu_count > host.max_cpus {
        problems.push(format!(
            "cpu count {} is outside the supported range {}..={}",
            spec.cpu_count, host.min_cpus, host.max_cpus
        ));
    }

    if spec.memory_bytes < host.min_memory_bytes || spec.memory_bytes > host.max_memory_bytes {
        problems.push(format!(
            "memory size {} MiB is outside the supported range {}..={} MiB",
            spec.memory_bytes / MIB,
            host.min_memory_bytes / MIB,
            host.max_memory_bytes / MIB
        ));
    }

    let mut storage = 0;
    let mut displays = 0;
    let mut tags = HashSet::new();

    for device in &spec.devices {
        match device {
            DeviceSpec::Storage { path, .. } => {
                storage += 1;
                if !Path::new(path).is_file() {
                    problems.push(format!("storage image {} does not exist", path));
                }
            }
            DeviceSpec::Display {
                width_pixels,
                height_pixels,
                pixels_per_inch,
            } => {
                displays += 1;
                if *width_pixels == 0 || *height_pixels == 0 || *pixels_per_inch == 0 {
                    problems.push(format!(
                        "display geometry {}x{} @ {} ppi has a zero dimension",
                        width_pixels, height_pixels, pixels_per_inch
                    ));
                }
            }
            DeviceSpec::DirectoryShare { tag, .. } => {
                if tag.is_empty() {
                    problems.push("directory share tag is empty".to_string());
                } else if !tags.insert(tag.as_str()) {
                    problems.push(format!("directory share tag '{}' is used twice", tag));
                }
            }
            _ => {}
        }
    }

    if storage == 0 {
        problems.push("no storage device".to_string());
    }
    if displays == 0 {
        problems.push("no display".to_string());
    }

    reject(ValidationKind::General, problems)
}

/// Whether the machine can be saved and restored on this host.
pub fn validate_save_restore_support(spec: &MachineSpec, host: &HostCapabilities) -> Result<()> {
    let mut problems = Vec::new();

    if !host.save_restore {
        problems.push("host does not support saving machine state".to_string());
    }
    for device in spec.devices.iter().filter(|d| !d.supports_save_restore()) {
        problems.push(format!("{} device cannot be saved", device.kind()));
    }

    reject(ValidationKind::SaveRestore, problems)
}

fn reject(kind: ValidationKind, problems: Vec<String>) -> Result<()> {
    if problems.is_empty() {
        return Ok(());
    }
    tracing::warn!(%kind, problems = ?problems, "configuration rejected");
    Err(Error::ValidationRejected { kind, problems })
}
