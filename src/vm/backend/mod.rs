//! Host engine backends.
//!
//! The only backend talks to an engine daemon over a Unix socket; the daemon
//! owns the platform hypervisor.

mod remote;

use crate::config::VmbundleConfig;
use crate::error::Result;
use crate::vm::HostEngine;
use std::sync::Arc;

pub use remote::{RemoteEngine, RemoteMachine};

/// Connect to the engine configured for this user.
pub async fn connect_default(config: &VmbundleConfig) -> Result<Arc<dyn HostEngine>> {
    let engine = RemoteEngine::new(config.engine_socket_path());
    engine.check_available().await?;
    Ok(Arc::new(engine))
}
