//! Serialized access to a machine.

use super::{EngineResult, MachineState, Operation, VirtualMachine};
use crate::error::{Error, Result};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The live machine of a session.
///
/// Accepts at most one lifecycle operation at a time: a request issued while
/// another is outstanding fails with [`Error::OperationInFlight`] and never
/// reaches the engine.
pub struct MachineHandle {
    machine: Box<dyn VirtualMachine>,
    in_flight: AtomicBool,
    timeout: Option<Duration>,
}

/// Clears the in-flight flag when the operation finishes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MachineHandle {
    /// Wrap a machine created by the engine.
    pub fn new(machine: Box<dyn VirtualMachine>) -> Self {
        Self {
            machine,
            in_flight: AtomicBool::new(false),
            timeout: None,
        }
    }

    /// Fail operations that take longer than `timeout`. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Last state observed from the engine.
    pub fn state(&self) -> MachineState {
        self.machine.state()
    }

    /// Whether a lifecycle operation is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Ask the engine for the current state.
    pub async fn refresh_state(&self) -> Result<MachineState> {
        self.machine.refresh_state().await.map_err(Error::Engine)
    }

    /// Boot the machine.
    pub async fn start(&self) -> Result<()> {
        self.issue(Operation::Start, self.machine.start()).await
    }

    /// Pause the machine.
    pub async fn pause(&self) -> Result<()> {
        self.issue(Operation::Pause, self.machine.pause()).await
    }

    /// Resume the machine.
    pub async fn resume(&self) -> Result<()> {
        self.issue(Operation::Resume, self.machine.resume()).await
    }

    /// Save machine state to `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        self.issue(Operation::Save, self.machine.save(path)).await
    }

    /// Restore machine state from `path`.
    pub async fn restore(&self, path: &Path) -> Result<()> {
        self.issue(Operation::Restore, self.machine.restore(path))
            .await
    }

    async fn issue<F>(&self, operation: Operation, completion: F) -> Result<()>
    where
        F: Future<Output = EngineResult<()>>,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::warn!(%operation, "rejecting overlapping lifecycle operation");
            return Err(Error::OperationInFlight {
                requested: operation,
            });
        }
        let _in_flight = InFlight(&self.in_flight);

        tracing::debug!(%operation, "issuing lifecycle operation");

        let outcome = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, completion)
                .await
                .map_err(|_| {
                    tracing::error!(%operation, ?timeout, "lifecycle operation timed out");
                    Error::OperationTimedOut { operation, timeout }
                })?,
            None => completion.await,
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(%operation, state = %self.machine.state(), "lifecycle operation completed");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(%operation, error = %source, "lifecycle operation failed");
                Err(Error::Operation { operation, source })
            }
        }
    }
}

impl std::fmt::Debug for MachineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineHandle")
            .field("state", &self.machine.state())
            .field("busy", &self.is_busy())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Machine whose pause never completes and whose save always fails.
    #[derive(Default)]
    struct StubMachine {
        issued: Mutex<Vec<Operation>>,
    }

    #[async_trait]
    impl VirtualMachine for StubMachine {
        fn state(&self) -> MachineState {
            MachineState::Running
        }

        async fn refresh_state(&self) -> EngineResult<MachineState> {
            Ok(MachineState::Running)
        }

        async fn start(&self) -> EngineResult<()> {
            self.issued.lock().push(Operation::Start);
            Ok(())
        }

        async fn pause(&self) -> EngineResult<()> {
            self.issued.lock().push(Operation::Pause);
            std::future::pending().await
        }

        async fn resume(&self) -> EngineResult<()> {
            self.issued.lock().push(Operation::Resume);
            Ok(())
        }

        async fn save(&self, _path: &Path) -> EngineResult<()> {
            self.issued.lock().push(Operation::Save);
            Err(EngineError::new("disk full"))
        }

        async fn restore(&self, _path: &Path) -> EngineResult<()> {
            self.issued.lock().push(Operation::Restore);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_overlapping_operation_rejected() {
        let handle = MachineHandle::new(Box::new(StubMachine::default()));

        let (paused, resumed) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(50), handle.pause()),
            handle.resume(),
        );

        assert!(paused.is_err(), "pause never completes");
        assert!(matches!(
            resumed,
            Err(Error::OperationInFlight {
                requested: Operation::Resume
            })
        ));
        assert!(!handle.is_busy(), "flag cleared when pause was abandoned");

        handle.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout() {
        let handle = MachineHandle::new(Box::new(StubMachine::default()))
            .with_timeout(Some(Duration::from_millis(20)));

        let err = handle.pause().await.unwrap_err();
        assert!(matches!(
            err,
            Error::OperationTimedOut {
                operation: Operation::Pause,
                ..
            }
        ));
        assert!(err.is_operation());
    }

    #[tokio::test]
    async fn test_engine_failure_mapped() {
        let handle = MachineHandle::new(Box::new(StubMachine::default()));
        let err = handle.save(Path::new("/vm/SaveFile.vzvmsave")).await.unwrap_err();
        assert_eq!(err.to_string(), "save failed: disk full");
    }
}
