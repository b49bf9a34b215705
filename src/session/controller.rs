//! Lifecycle state machine.

use super::{LifecycleState, SessionOptions};
use crate::bundle::MachineBundle;
use crate::error::{Error, Result};
use crate::machine::ConfigurationBuilder;
use crate::vm::{HostEngine, MachineHandle, MachineState};
use std::sync::Arc;
use tokio::sync::watch;

/// Owns the machine of one session and sequences its lifecycle.
pub struct LifecycleController {
    engine: Arc<dyn HostEngine>,
    options: SessionOptions,
    bundle: Option<MachineBundle>,
    machine: Option<MachineHandle>,
    /// Why the session stopped before reaching `running`, if it did.
    startup_failure: Option<String>,
    state: watch::Sender<LifecycleState>,
}

impl LifecycleController {
    /// Create an idle controller.
    pub fn new(engine: Arc<dyn HostEngine>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            engine,
            options,
            bundle: None,
            machine: None,
            startup_failure: None,
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Follow lifecycle state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The selected bundle.
    pub fn bundle(&self) -> Option<&MachineBundle> {
        self.bundle.as_ref()
    }

    /// The live machine, once created.
    pub fn machine(&self) -> Option<&MachineHandle> {
        self.machine.as_ref()
    }

    /// Choose the bundle for this session. Only allowed before it runs.
    pub fn select_bundle(&mut self, bundle: MachineBundle) -> Result<()> {
        self.expect_state(LifecycleState::Idle)?;
        tracing::info!(bundle = %bundle.root().display(), "bundle selected");
        self.bundle = Some(bundle);
        Ok(())
    }

    /// Configure the machine, then restore it from the snapshot or cold
    /// start it. Ends in `running` on success and `stopped` on failure.
    pub async fn run_session(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::Idle)?;
        let bundle = self.bundle.clone().ok_or(Error::NoBundleSelected)?;

        self.set_state(LifecycleState::Configuring);
        match self.create_machine(&bundle).await {
            Ok(machine) => self.machine = Some(machine),
            Err(e) => {
                tracing::error!(error = %e, "failed to configure machine");
                self.fail_startup(&e);
                return Err(e);
            }
        }

        let outcome = if bundle.has_snapshot() {
            self.restore_or_start(&bundle).await
        } else {
            self.cold_start().await
        };

        match outcome {
            Ok(()) => {
                self.set_state(LifecycleState::Running);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "session failed to reach running");
                self.fail_startup(&e);
                Err(e)
            }
        }
    }

    /// Pause and save the machine so the process can exit.
    ///
    /// Does nothing when the session is idle, saved or stopped by the guest.
    /// A session that stopped because startup failed reports
    /// [`Error::SessionFailed`] instead. On success the session is `saved`. On failure termination must not proceed: a
    /// failed pause leaves the machine as the engine reports it, and a failed
    /// save removes the partial snapshot and resumes the machine.
    pub async fn suspend(&self) -> Result<()> {
        let state = self.state();
        if state == LifecycleState::Stopped {
            if let Some(reason) = &self.startup_failure {
                return Err(Error::SessionFailed(reason.clone()));
            }
        }
        if state.permits_exit() {
            tracing::debug!(%state, "nothing to save");
            return Ok(());
        }
        if !matches!(state, LifecycleState::Running | LifecycleState::Paused) {
            return Err(Error::InvalidState {
                expected: "running".into(),
                actual: state.to_string(),
            });
        }

        let bundle = self.bundle.as_ref().ok_or(Error::NoBundleSelected)?;
        let machine = self.live_machine()?;

        if state == LifecycleState::Running {
            self.set_state(LifecycleState::Pausing);
            if let Err(e) = machine.pause().await {
                tracing::error!(error = %e, "pause failed, refusing termination");
                self.settle(machine).await;
                return Err(e);
            }
            self.set_state(LifecycleState::Paused);
        }

        let snapshot = bundle.save_file_path();
        self.set_state(LifecycleState::Saving);
        match machine.save(&snapshot).await {
            Ok(()) => {
                tracing::info!(path = %snapshot.display(), "machine state saved");
                self.set_state(LifecycleState::Saved);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "save failed, refusing termination");
                if let Err(discard) = bundle.discard_snapshot() {
                    tracing::warn!(error = %discard, "failed to remove partial snapshot");
                }
                self.set_state(LifecycleState::Resuming);
                match machine.resume().await {
                    Ok(()) => self.set_state(LifecycleState::Running),
                    Err(resume) => {
                        tracing::error!(error = %resume, "resume after failed save failed");
                        self.settle(machine).await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Notice a machine that stopped on its own while running.
    ///
    /// A failed state query is logged and leaves the session unchanged.
    pub async fn poll_machine(&self) -> Result<LifecycleState> {
        if self.state() != LifecycleState::Running {
            return Ok(self.state());
        }
        let machine = self.live_machine()?;
        if machine.is_busy() {
            return Ok(self.state());
        }

        let observed = match machine.refresh_state().await {
            Ok(observed) => observed,
            Err(e) => {
                tracing::warn!(error = %e, "could not query machine state");
                return Ok(self.state());
            }
        };
        if observed.is_terminal() {
            tracing::info!(machine_state = %observed, "guest stopped");
            self.set_state(LifecycleState::Stopped);
        }
        Ok(self.state())
    }

    async fn create_machine(&self, bundle: &MachineBundle) -> Result<MachineHandle> {
        let config = ConfigurationBuilder::new(bundle)
            .sizing(self.options.sizing)
            .devices(self.options.devices.clone())
            .build(self.engine.as_ref())
            .await?;

        let machine = self
            .engine
            .create_machine(&config)
            .await
            .map_err(Error::MachineCreation)?;

        tracing::info!(
            engine = self.engine.name(),
            cpus = config.cpu_count(),
            memory_bytes = config.memory_bytes(),
            "machine created"
        );
        Ok(MachineHandle::new(machine).with_timeout(self.options.operation_timeout))
    }

    /// Restore from the snapshot, falling back to a cold start.
    ///
    /// The snapshot is deleted once the restore completes, whatever its
    /// outcome, and before any further operation is issued.
    async fn restore_or_start(&self, bundle: &MachineBundle) -> Result<()> {
        let machine = self.live_machine()?;
        let snapshot = bundle.save_file_path();

        self.set_state(LifecycleState::Restoring);
        tracing::info!(path = %snapshot.display(), "restoring saved state");
        let restored = machine.restore(&snapshot).await;

        bundle.discard_snapshot()?;

        match restored {
            Ok(()) => {
                self.set_state(LifecycleState::Resuming);
                machine.resume().await
            }
            Err(e) => {
                tracing::warn!(error = %e, "restore failed, cold starting instead");
                self.cold_start().await
            }
        }
    }

    async fn cold_start(&self) -> Result<()> {
        let machine = self.live_machine()?;
        let attempts = self.options.start_attempts.max(1);

        self.set_state(LifecycleState::Starting);
        let mut attempt = 1;
        loop {
            match machine.start().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, attempts, error = %e, "start failed, retrying");
                    tokio::time::sleep(self.options.start_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Align the session with the engine after a failed operation.
    async fn settle(&self, machine: &MachineHandle) {
        let next = match machine.refresh_state().await {
            Ok(MachineState::Paused) => LifecycleState::Paused,
            Ok(state) if state.is_terminal() => LifecycleState::Stopped,
            Ok(_) => LifecycleState::Running,
            Err(e) => {
                tracing::warn!(error = %e, "could not query machine state, assuming running");
                LifecycleState::Running
            }
        };
        self.set_state(next);
    }

    fn fail_startup(&mut self, error: &Error) {
        self.startup_failure = Some(error.to_string());
        self.set_state(LifecycleState::Stopped);
    }

    fn live_machine(&self) -> Result<&MachineHandle> {
        self.machine.as_ref().ok_or_else(|| Error::InvalidState {
            expected: "machine created".into(),
            actual: self.state().to_string(),
        })
    }

    fn expect_state(&self, expected: LifecycleState) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(Error::InvalidState {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    fn set_state(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "lifecycle state changed");
        }
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("engine", &self.engine.name())
            .field("bundle", &self.bundle)
            .field("machine", &self.machine)
            .field("startup_failure", &self.startup_failure)
            .field("state", &self.state())
            .finish()
    }
}
