//! Machine configuration.
//!
//! Turns a [`MachineBundle`](crate::bundle::MachineBundle) plus host-derived
//! sizing and device policy into an immutable, validated
//! [`MachineConfiguration`].

mod builder;
mod devices;
mod identity;
mod sizing;

pub use builder::{
    validate_configuration, validate_save_restore_support, ConfigurationBuilder,
    MachineConfiguration, ValidationKind,
};
pub use devices::{DevicePolicy, DisplayGeometry};
pub use identity::{HardwareModel, MachineIdentifier, PlatformIdentity};
pub use sizing::{host_cpu_count, Sizing, SizingPolicy, DEFAULT_MEMORY_BYTES};
