//! Shell-facing session handle.

use super::{LifecycleController, LifecycleState};
use crate::bundle::MachineBundle;
use crate::error::{Error, Result};
use tokio::sync::{mpsc, oneshot, watch};

/// Queued requests before the session task stops accepting more.
const COMMAND_QUEUE_DEPTH: usize = 16;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SelectBundle {
        bundle: MachineBundle,
        reply: Reply<()>,
    },
    RunSession {
        reply: Reply<()>,
    },
    Terminate {
        reply: Reply<()>,
    },
    Poll {
        reply: Reply<LifecycleState>,
    },
}

/// Answer to a termination request.
#[derive(Debug)]
pub enum Termination {
    /// Nothing to save; exit right away.
    Now,
    /// Wait for the machine to be paused and saved.
    Later(PendingTermination),
}

/// A termination waiting on pause and save.
#[derive(Debug)]
pub struct PendingTermination {
    reply: oneshot::Receiver<Result<()>>,
}

impl PendingTermination {
    /// Wait until the process may exit.
    ///
    /// An error means termination was refused and the machine is still
    /// live; the request may be repeated. [`Error::SessionFailed`] instead
    /// reports that startup failed and no machine is left to save.
    pub async fn wait(self) -> Result<()> {
        self.reply.await.map_err(|_| Error::SessionClosed)?
    }
}

/// Cloneable handle to a session served by its own task.
///
/// Requests are processed one at a time, in the order they were sent.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LifecycleState>,
}

impl SessionHandle {
    /// Move `controller` onto a new task. Must be called within a tokio
    /// runtime. The task ends when every handle is dropped.
    pub fn spawn(controller: LifecycleController) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let state = controller.subscribe();
        tokio::spawn(serve(controller, rx));
        Self { commands, state }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Follow lifecycle state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }

    /// Choose the bundle for this session.
    pub async fn select_bundle(&self, bundle: MachineBundle) -> Result<()> {
        self.call(|reply| Command::SelectBundle { bundle, reply })
            .await
    }

    /// Bring the machine up, restoring saved state when present.
    pub async fn run_session(&self) -> Result<()> {
        self.call(|reply| Command::RunSession { reply }).await
    }

    /// Check whether the guest stopped on its own.
    pub async fn poll(&self) -> Result<LifecycleState> {
        self.call(|reply| Command::Poll { reply }).await
    }

    /// Ask to exit.
    ///
    /// Returns [`Termination::Now`] when there is no machine state to save.
    /// Otherwise the request is queued behind any outstanding one and
    /// [`Termination::Later`] resolves once the machine has been saved.
    pub async fn request_termination(&self) -> Result<Termination> {
        let state = self.state();
        if state.permits_exit() {
            tracing::debug!(%state, "termination permitted now");
            return Ok(Termination::Now);
        }

        tracing::info!(%state, "termination deferred until machine state is saved");
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Terminate { reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(Termination::Later(PendingTermination { reply: rx }))
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }
}

async fn serve(mut controller: LifecycleController, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.recv().await {
        // A dropped receiver only means the caller stopped waiting.
        match command {
            Command::SelectBundle { bundle, reply } => {
                let _ = reply.send(controller.select_bundle(bundle));
            }
            Command::RunSession { reply } => {
                let _ = reply.send(controller.run_session().await);
            }
            Command::Terminate { reply } => {
                let _ = reply.send(controller.suspend().await);
            }
            Command::Poll { reply } => {
                let _ = reply.send(controller.poll_machine().await);
            }
        }
    }
    tracing::debug!(state = %controller.state(), "session task finished");
}
