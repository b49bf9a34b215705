//! CLI command implementations.

pub mod check;
pub mod run;
pub mod status;

use std::path::PathBuf;
use vmbundle::config::VmbundleConfig;
use vmbundle::Result;

/// Create the runtime a command runs its async work on.
fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

/// Copy of `config` with a command-line engine socket applied.
fn with_engine_socket(config: &VmbundleConfig, socket: Option<&PathBuf>) -> VmbundleConfig {
    let mut config = config.clone();
    if let Some(socket) = socket {
        config.engine_socket = Some(socket.clone());
    }
    config
}
