//! The VM session: one bundle, one machine, one lifecycle.
//!
//! [`LifecycleController`] owns the machine and drives it through
//! configure → start or restore → running → pause → save. It issues one
//! lifecycle operation at a time and waits for its outcome before deciding
//! on the next.
//!
//! [`SessionHandle`] runs a controller on its own task and serializes
//! requests from the shell through a command queue, so a termination
//! request arriving mid-startup is handled after startup settles.

mod controller;
mod handle;

use crate::machine::{DevicePolicy, SizingPolicy};
use std::fmt;
use std::time::Duration;

pub use controller::LifecycleController;
pub use handle::{PendingTermination, SessionHandle, Termination};

/// Delay between cold start attempts.
pub const DEFAULT_START_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// No session has run yet.
    #[default]
    Idle,
    /// Building the configuration and creating the machine.
    Configuring,
    /// Cold boot in progress.
    Starting,
    /// Restoring from the save snapshot.
    Restoring,
    /// Resuming a restored or paused machine.
    Resuming,
    /// The guest is running.
    Running,
    /// Pausing for shutdown.
    Pausing,
    /// Paused, not yet saved.
    Paused,
    /// Writing the save snapshot.
    Saving,
    /// State saved; the process may exit.
    Saved,
    /// The session ended without a saved state.
    Stopped,
}

impl LifecycleState {
    /// Whether the process may exit without touching the machine.
    pub fn permits_exit(self) -> bool {
        matches!(
            self,
            LifecycleState::Idle | LifecycleState::Saved | LifecycleState::Stopped
        )
    }

    /// Whether the session is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Saved | LifecycleState::Stopped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Starting => "starting",
            LifecycleState::Restoring => "restoring",
            LifecycleState::Resuming => "resuming",
            LifecycleState::Running => "running",
            LifecycleState::Pausing => "pausing",
            LifecycleState::Paused => "paused",
            LifecycleState::Saving => "saving",
            LifecycleState::Saved => "saved",
            LifecycleState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Knobs for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// CPU and memory sizing.
    pub sizing: SizingPolicy,
    /// Device list.
    pub devices: DevicePolicy,
    /// Per-operation timeout. `None` waits for every operation to complete.
    pub operation_timeout: Option<Duration>,
    /// Cold start attempts before the session fails. Zero counts as one.
    pub start_attempts: u32,
    /// Pause between cold start attempts.
    pub start_retry_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sizing: SizingPolicy::default(),
            devices: DevicePolicy::default(),
            operation_timeout: None,
            start_attempts: 1,
            start_retry_delay: DEFAULT_START_RETRY_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_permitted() {
        let exits: Vec<_> = [
            LifecycleState::Idle,
            LifecycleState::Configuring,
            LifecycleState::Running,
            LifecycleState::Saving,
            LifecycleState::Saved,
            LifecycleState::Stopped,
        ]
        .into_iter()
        .filter(|s| s.permits_exit())
        .collect();
        assert_eq!(
            exits,
            [
                LifecycleState::Idle,
                LifecycleState::Saved,
                LifecycleState::Stopped
            ]
        );
        assert!(!LifecycleState::Idle.is_terminal());
    }

    #[test]
    fn test_default_options() {
        let options = SessionOptions::default();
        assert_eq!(options.start_attempts, 1);
        assert_eq!(options.operation_timeout, None);
    }
}
