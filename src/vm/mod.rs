//! Host engine abstraction.
//!
//! The host engine owns the hypervisor. It accepts a validated
//! [`MachineConfiguration`] and hands back a [`VirtualMachine`] whose
//! lifecycle operations complete asynchronously, each exactly once, with
//! success or an [`EngineError`].
//!
//! Callers never drive a [`VirtualMachine`] directly: wrap it in a
//! [`MachineHandle`], which allows only one lifecycle operation in flight.

pub mod backend;
mod handle;

use crate::error::EngineError;
use crate::machine::{HardwareModel, MachineConfiguration};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

pub use handle::MachineHandle;
pub use vmbundle_protocol::{HostCapabilities, MachineState};

/// Outcome of a single engine call.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A lifecycle operation on a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Cold boot.
    Start,
    /// Suspend execution in memory.
    Pause,
    /// Continue a paused machine.
    Resume,
    /// Write machine state to a snapshot file.
    Save,
    /// Read machine state from a snapshot file.
    Restore,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Start => write!(f, "start"),
            Operation::Pause => write!(f, "pause"),
            Operation::Resume => write!(f, "resume"),
            Operation::Save => write!(f, "save"),
            Operation::Restore => write!(f, "restore"),
        }
    }
}

/// A hypervisor capable of running machines.
#[async_trait]
pub trait HostEngine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Host limits and features.
    async fn capabilities(&self) -> EngineResult<HostCapabilities>;

    /// Whether the host can run a hardware model.
    async fn supports_hardware_model(&self, model: &HardwareModel) -> EngineResult<bool>;

    /// Create a machine from a validated configuration.
    async fn create_machine(
        &self,
        config: &MachineConfiguration,
    ) -> EngineResult<Box<dyn VirtualMachine>>;
}

/// A machine created by a [`HostEngine`].
///
/// Implementations may assume that at most one operation is outstanding;
/// [`MachineHandle`] guarantees it.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    /// Last state observed from the engine.
    fn state(&self) -> MachineState;

    /// Ask the engine for the current state.
    async fn refresh_state(&self) -> EngineResult<MachineState>;

    /// Boot the machine.
    async fn start(&self) -> EngineResult<()>;

    /// Pause a running machine.
    async fn pause(&self) -> EngineResult<()>;

    /// Resume a paused machine.
    async fn resume(&self) -> EngineResult<()>;

    /// Save a paused machine to `path`, creating or overwriting it.
    async fn save(&self, path: &Path) -> EngineResult<()>;

    /// Restore machine state from `path`, leaving the machine paused.
    ///
    /// The file is only read; deleting it is the caller's job.
    async fn restore(&self, path: &Path) -> EngineResult<()>;
}
