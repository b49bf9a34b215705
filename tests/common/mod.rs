//! Shared test fixtures: bundle directories and a scripted fake engine.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vmbundle::bundle::{Artifact, MachineBundle};
use vmbundle::error::EngineError;
use vmbundle::machine::{HardwareModel, MachineConfiguration};
use vmbundle::session::SessionOptions;
use vmbundle::vm::{EngineResult, HostCapabilities, HostEngine, MachineState, VirtualMachine};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Content written by a successful fake save.
pub const PAUSED_STATE: &[u8] = b"paused machine state";

/// A call observed by the fake engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateMachine,
    /// `snapshot_present`: whether the save file existed when issued.
    Start { snapshot_present: bool },
    Restore(PathBuf),
    Resume { snapshot_present: bool },
    Pause,
    Save(PathBuf),
}

/// How the fake engine misbehaves.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub unsupported_model: bool,
    pub fail_create: bool,
    /// Number of `start` calls that fail before one succeeds.
    pub start_failures: u32,
    pub start_delay: Option<Duration>,
    pub fail_restore: bool,
    pub fail_resume: bool,
    pub fail_pause: bool,
    pub hang_pause: bool,
    /// Write a partial snapshot, then fail.
    pub fail_save: bool,
    pub no_save_restore: bool,
    /// State queries fail.
    pub fail_refresh: bool,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    state: Mutex<MachineState>,
}

/// Engine recording every call made by the controller.
#[derive(Clone)]
pub struct FakeEngine {
    shared: Arc<Shared>,
    save_file: PathBuf,
}

impl FakeEngine {
    pub fn new(bundle: &MachineBundle) -> Self {
        Self::with_script(bundle, Script::default())
    }

    pub fn with_script(bundle: &MachineBundle, script: Script) -> Self {
        let shared = Shared::default();
        *shared.script.lock() = script;
        Self {
            shared: Arc::new(shared),
            save_file: bundle.save_file_path(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().clone()
    }

    /// Calls issued after machine creation and startup.
    pub fn calls_after(&self, skip: usize) -> Vec<Call> {
        self.calls().into_iter().skip(skip).collect()
    }

    pub fn update_script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.shared.script.lock());
    }

    /// Simulate the guest shutting itself down.
    pub fn stop_guest(&self) {
        *self.shared.state.lock() = MachineState::Stopped;
    }

    pub fn engine(&self) -> Arc<dyn HostEngine> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl HostEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn capabilities(&self) -> EngineResult<HostCapabilities> {
        Ok(HostCapabilities {
            min_cpus: 1,
            max_cpus: 64,
            min_memory_bytes: GIB,
            max_memory_bytes: 64 * GIB,
            save_restore: !self.shared.script.lock().no_save_restore,
        })
    }

    async fn supports_hardware_model(&self, _model: &HardwareModel) -> EngineResult<bool> {
        Ok(!self.shared.script.lock().unsupported_model)
    }

    async fn create_machine(
        &self,
        _config: &MachineConfiguration,
    ) -> EngineResult<Box<dyn VirtualMachine>> {
        self.shared.calls.lock().push(Call::CreateMachine);
        if self.shared.script.lock().fail_create {
            return Err(EngineError::new("no virtualization entitlement"));
        }
        *self.shared.state.lock() = MachineState::NotStarted;
        Ok(Box::new(FakeMachine {
            shared: self.shared.clone(),
            save_file: self.save_file.clone(),
        }))
    }
}

struct FakeMachine {
    shared: Arc<Shared>,
    save_file: PathBuf,
}

impl FakeMachine {
    fn record(&self, call: Call) -> Script {
        self.shared.calls.lock().push(call);
        self.shared.script.lock().clone()
    }

    fn set_state(&self, state: MachineState) {
        *self.shared.state.lock() = state;
    }
}

#[async_trait]
impl VirtualMachine for FakeMachine {
    fn state(&self) -> MachineState {
        *self.shared.state.lock()
    }

    async fn refresh_state(&self) -> EngineResult<MachineState> {
        if self.shared.script.lock().fail_refresh {
            return Err(EngineError::new("connection reset"));
        }
        Ok(self.state())
    }

    async fn start(&self) -> EngineResult<()> {
        let script = self.record(Call::Start {
            snapshot_present: self.save_file.exists(),
        });
        if let Some(delay) = script.start_delay {
            tokio::time::sleep(delay).await;
        }
        if script.start_failures > 0 {
            self.shared.script.lock().start_failures -= 1;
            return Err(EngineError::new("boot failed"));
        }
        self.set_state(MachineState::Running);
        Ok(())
    }

    async fn pause(&self) -> EngineResult<()> {
        let script = self.record(Call::Pause);
        if script.hang_pause {
            std::future::pending::<()>().await;
        }
        if script.fail_pause {
            return Err(EngineError::new("pause refused"));
        }
        self.set_state(MachineState::Paused);
        Ok(())
    }

    async fn resume(&self) -> EngineResult<()> {
        let script = self.record(Call::Resume {
            snapshot_present: self.save_file.exists(),
        });
        if script.fail_resume {
            return Err(EngineError::new("resume failed"));
        }
        self.set_state(MachineState::Running);
        Ok(())
    }

    async fn save(&self, path: &Path) -> EngineResult<()> {
        let script = self.record(Call::Save(path.to_path_buf()));
        if script.fail_save {
            std::fs::write(path, b"partial").map_err(|e| EngineError::new(e.to_string()))?;
            return Err(EngineError::new("disk full"));
        }
        std::fs::write(path, PAUSED_STATE).map_err(|e| EngineError::new(e.to_string()))?;
        Ok(())
    }

    async fn restore(&self, path: &Path) -> EngineResult<()> {
        let script = self.record(Call::Restore(path.to_path_buf()));
        if script.fail_restore {
            return Err(EngineError::new("snapshot incompatible"));
        }
        self.set_state(MachineState::Paused);
        Ok(())
    }
}

/// A bundle with every required artifact and no snapshot.
pub fn bundle() -> (TempDir, MachineBundle) {
    let dir = TempDir::new().unwrap();
    for artifact in Artifact::ALL {
        std::fs::write(dir.path().join(artifact.file_name()), b"descriptor").unwrap();
    }
    let bundle = MachineBundle::open(dir.path()).unwrap();
    (dir, bundle)
}

/// Place a save snapshot in the bundle.
pub fn write_snapshot(bundle: &MachineBundle) {
    std::fs::write(bundle.save_file_path(), b"earlier machine state").unwrap();
}

/// Session options without retry delays.
pub fn options() -> SessionOptions {
    SessionOptions {
        start_retry_delay: Duration::ZERO,
        ..SessionOptions::default()
    }
}
