//! Error types for vmbundle.
//!
//! Errors fall into two families:
//!
//! - **Precondition** errors happen before any machine exists: the bundle or
//!   one of its artifacts is missing or unreadable, the hardware model is not
//!   supported, or the configuration fails validation.
//! - **Operation** errors are reported by the host engine for a lifecycle
//!   operation (`start`, `pause`, `resume`, `save`, `restore`) or for machine
//!   creation.
//!
//! Both are returned to the caller; nothing in the library aborts the process.

use crate::bundle::Artifact;
use crate::machine::ValidationKind;
use crate::vm::Operation;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for vmbundle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vmbundle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bundle directory does not exist or is not a directory.
    #[error("machine bundle not found: {}", .0.display())]
    BundleNotFound(PathBuf),

    /// The bundle path cannot be handed to the engine as text.
    #[error("machine bundle path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// A required bundle artifact does not exist.
    #[error("missing {artifact} at {}", path.display())]
    MissingArtifact {
        /// Which artifact.
        artifact: Artifact,
        /// Where it was expected.
        path: PathBuf,
    },

    /// A required bundle artifact exists but cannot be used.
    #[error("unreadable {artifact} at {}: {reason}", path.display())]
    UnreadableArtifact {
        /// Which artifact.
        artifact: Artifact,
        /// Where it was read from.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The host cannot run the bundle's hardware model.
    #[error("the bundle's hardware model is not supported on this host")]
    UnsupportedHardwareModel,

    /// The machine configuration failed validation.
    #[error("{kind} validation rejected the machine configuration: {}", problems.join("; "))]
    ValidationRejected {
        /// Which validation failed.
        kind: ValidationKind,
        /// Every problem found.
        problems: Vec<String>,
    },

    /// No bundle was selected before running the session.
    #[error("no machine bundle selected")]
    NoBundleSelected,

    /// A query to the host engine failed.
    #[error("host engine error: {0}")]
    Engine(#[source] EngineError),

    /// The engine refused to create the machine.
    #[error("failed to create machine: {0}")]
    MachineCreation(#[source] EngineError),

    /// The engine reported failure for a lifecycle operation.
    #[error("{operation} failed: {source}")]
    Operation {
        /// Which operation failed.
        operation: Operation,
        /// Engine-reported failure.
        #[source]
        source: EngineError,
    },

    /// A lifecycle operation did not complete within the configured timeout.
    #[error("{operation} did not complete within {}", humantime::format_duration(*timeout))]
    OperationTimedOut {
        /// Which operation stalled.
        operation: Operation,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A lifecycle operation was requested while another one is outstanding.
    #[error("cannot issue {requested}: another lifecycle operation is in flight")]
    OperationInFlight {
        /// The rejected operation.
        requested: Operation,
    },

    /// Invalid state transition.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// The save snapshot could not be managed.
    #[error("snapshot error: failed to {operation}: {message}")]
    Snapshot {
        /// What was being done.
        operation: String,
        /// Why it failed.
        message: String,
    },

    /// The host engine cannot be reached or speaks another protocol.
    #[error("hypervisor unavailable: {0}")]
    HypervisorUnavailable(String),

    /// Startup failed and the machine stopped; there is nothing to save.
    #[error("session failed: {0}")]
    SessionFailed(String),

    /// The session task has exited.
    #[error("session closed")]
    SessionClosed,

    /// Invalid user configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be loaded.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a snapshot error.
    pub fn snapshot(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Snapshot {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an unreadable-artifact error.
    pub fn unreadable(artifact: Artifact, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnreadableArtifact {
            artifact,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors raised before any machine exists.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::BundleNotFound(_)
                | Error::NonUtf8Path(_)
                | Error::MissingArtifact { .. }
                | Error::UnreadableArtifact { .. }
                | Error::UnsupportedHardwareModel
                | Error::ValidationRejected { .. }
                | Error::NoBundleSelected
        )
    }

    /// Returns `true` for failures reported by (or waiting on) the engine.
    pub fn is_operation(&self) -> bool {
        matches!(
            self,
            Error::Engine(_)
                | Error::MachineCreation(_)
                | Error::Operation { .. }
                | Error::OperationTimedOut { .. }
        )
    }
}

/// Failure reported by the host engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    /// Human readable description.
    pub message: String,
    /// Machine readable code, if the engine supplied one.
    pub code: Option<String>,
}

impl EngineError {
    /// Create an engine error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an engine error with a code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}
