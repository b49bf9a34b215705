//! vmbundle - run a virtual machine from a bundle directory, preserving its
//! state across launches.
//!
//! A session selects a [`MachineBundle`](bundle::MachineBundle), builds a
//! validated [`MachineConfiguration`](machine::MachineConfiguration), creates
//! the machine on a [`HostEngine`](vm::HostEngine) and either cold starts it
//! or restores it from the bundle's save snapshot. On termination the machine
//! is paused and saved back into the bundle.
//!
//! # Architecture
//!
//! - [`bundle`]: bundle layout, artifact checks and the save snapshot
//! - [`machine`]: configuration building and validation
//! - [`vm`]: host engine traits, the serialized machine handle and backends
//! - [`session`]: the lifecycle state machine and its shell-facing handle
//! - [`config`]: user configuration file

pub mod bundle;
pub mod config;
pub mod error;
pub mod machine;
pub mod session;
pub mod vm;

pub use error::{Error, Result};

/// vmbundle version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
