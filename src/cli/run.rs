//! Run command implementation.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use vmbundle::bundle::MachineBundle;
use vmbundle::config::VmbundleConfig;
use vmbundle::session::{LifecycleController, LifecycleState, SessionHandle, Termination};
use vmbundle::vm::backend;
use vmbundle::Result;

/// Run a bundle's machine until interrupted, then save its state.
#[derive(Args, Debug)]
pub struct RunCmd {
    /// Bundle directory (default: configured bundle, then ~/VM.bundle).
    pub bundle: Option<PathBuf>,

    /// Number of virtual CPUs.
    #[arg(long, value_name = "N")]
    pub cpus: Option<u32>,

    /// Memory size in MiB.
    #[arg(long, value_name = "MIB")]
    pub memory: Option<u64>,

    /// Engine control socket.
    #[arg(long, value_name = "PATH")]
    pub engine_socket: Option<PathBuf>,

    /// Fail lifecycle operations that take longer than this (e.g. "5m").
    #[arg(long, value_name = "DURATION")]
    pub operation_timeout: Option<String>,

    /// Cold start attempts before giving up.
    #[arg(long, value_name = "N")]
    pub start_attempts: Option<u32>,

    /// How often to check whether the guest has stopped.
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    pub poll_interval: Duration,
}

impl RunCmd {
    /// Execute the run command.
    pub fn run(self, config: &VmbundleConfig) -> Result<()> {
        let config = self.apply(config);
        let bundle = MachineBundle::locate(self.bundle.as_deref(), &config)?;

        let runtime = super::runtime()?;
        runtime.block_on(self.run_session(&config, bundle))
    }

    /// Command-line overrides on top of the configuration file.
    fn apply(&self, config: &VmbundleConfig) -> VmbundleConfig {
        let mut config = super::with_engine_socket(config, self.engine_socket.as_ref());
        if let Some(cpus) = self.cpus {
            config.cpus = Some(cpus);
        }
        if let Some(memory) = self.memory {
            config.memory_mib = Some(memory);
        }
        if let Some(timeout) = &self.operation_timeout {
            config.operation_timeout = Some(timeout.clone());
        }
        if let Some(attempts) = self.start_attempts {
            config.start_attempts = attempts;
        }
        config
    }

    async fn run_session(&self, config: &VmbundleConfig, bundle: MachineBundle) -> Result<()> {
        let options = config.session_options()?;
        let engine = backend::connect_default(config).await?;
        let mut shutdown = ShutdownSignal::new()?;

        let session = SessionHandle::spawn(LifecycleController::new(engine, options));
        session.select_bundle(bundle.clone()).await?;

        if bundle.has_snapshot() {
            println!("Restoring machine from {}...", bundle.root().display());
        } else {
            println!("Starting machine from {}...", bundle.root().display());
        }

        // Termination requested during startup is queued behind it.
        let startup = session.run_session();
        tokio::pin!(startup);
        let interrupted = tokio::select! {
            result = &mut startup => {
                result?;
                false
            }
            _ = shutdown.recv() => true,
        };

        if interrupted {
            let (started, terminated) = tokio::join!(startup, terminate(&session));
            started?;
            match terminated {
                Ok(()) => return Ok(()),
                Err(e) => refused(&session, e)?,
            }
        } else {
            println!("Machine running. Press Ctrl-C to save its state and exit.");
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match session.poll().await {
                        Ok(LifecycleState::Stopped) => {
                            println!("Machine stopped.");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "poll failed"),
                    }
                }
                _ = shutdown.recv() => {
                    match terminate(&session).await {
                        Ok(()) => return Ok(()),
                        Err(e) => refused(&session, e)?,
                    }
                }
            }
        }
    }
}

/// Ask the session to let the process exit, waiting for the save if needed.
async fn terminate(session: &SessionHandle) -> Result<()> {
    match session.request_termination().await? {
        Termination::Now => {
            tracing::debug!(state = %session.state(), "exiting without saving");
            Ok(())
        }
        Termination::Later(pending) => {
            println!("Saving machine state...");
            pending.wait().await?;
            match session.state() {
                LifecycleState::Saved => println!("Machine state saved."),
                state => println!("Machine {} without saving.", state),
            }
            Ok(())
        }
    }
}

/// Report a refused termination. Errors out when there is no machine left to
/// retry with.
fn refused(session: &SessionHandle, e: vmbundle::Error) -> Result<()> {
    if session.state().is_terminal() {
        return Err(e);
    }
    tracing::error!(error = %e, "termination refused");
    eprintln!(
        "Could not save machine state: {}. The machine is still live; interrupt again to retry.",
        e
    );
    Ok(())
}

/// Ctrl-C or SIGTERM.
struct ShutdownSignal {
    terminate: Signal,
}

impl ShutdownSignal {
    fn new() -> Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = self.terminate.recv() => {}
        }
        tracing::info!("termination requested");
    }
}
