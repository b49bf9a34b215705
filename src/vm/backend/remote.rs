//! Engine daemon client.
//!
//! Engine-level queries (`ping`, `capabilities`, `hardware_model_supported`)
//! use a short-lived connection each. `create` opens a connection that then
//! belongs to the created machine and carries all of its lifecycle requests;
//! the daemon tears the machine down when that connection closes.

use crate::error::{EngineError, Error, Result};
use crate::machine::{HardwareModel, MachineConfiguration};
use crate::vm::{EngineResult, HostCapabilities, HostEngine, MachineState, VirtualMachine};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use vmbundle_protocol::{
    codes, decode_payload, encode_message, frame_len, EngineRequest, EngineResponse, HEADER_LEN,
    PROTOCOL_VERSION,
};

/// One socket connection to the engine daemon.
struct Connection {
    stream: UnixStream,
    // Set while a request awaits its response. A request future dropped
    // halfway leaves it set, and the stream can no longer be trusted.
    desynced: bool,
}

impl Connection {
    async fn open(socket_path: &Path) -> EngineResult<Self> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            EngineError::new(format!(
                "failed to connect to engine at {}: {}",
                socket_path.display(),
                e
            ))
        })?;
        Ok(Self {
            stream,
            desynced: false,
        })
    }

    /// Send a request and receive its response.
    async fn request(&mut self, req: &EngineRequest) -> EngineResult<EngineResponse> {
        if self.desynced {
            return Err(EngineError::new(
                "engine connection is out of sync after an abandoned request",
            ));
        }

        let frame = encode_message(req)
            .map_err(|e| EngineError::new(format!("encode failed: {}", e)))?;

        self.desynced = true;
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| EngineError::new(format!("write failed: {}", e)))?;

        let mut header = [0u8; HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| EngineError::new(format!("read header failed: {}", e)))?;
        let len = frame_len(header).map_err(|e| EngineError::new(e.to_string()))?;

        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| EngineError::new(format!("read payload failed: {}", e)))?;

        let resp = decode_payload(&payload)
            .map_err(|e| EngineError::new(format!("parse failed: {}", e)))?;
        self.desynced = false;

        tracing::trace!(?resp, "engine response");
        Ok(resp)
    }
}

/// Turn a response that is not the expected success into an error.
fn failure(resp: EngineResponse) -> EngineError {
    match resp {
        EngineResponse::Error { message, code } => EngineError { message, code },
        other => EngineError::new(format!("unexpected response: {:?}", other)),
    }
}

/// Host engine reached through the engine daemon's socket.
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    socket_path: PathBuf,
}

impl RemoteEngine {
    /// Create a client for the daemon listening on `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// The daemon socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn query(&self, req: EngineRequest) -> EngineResult<EngineResponse> {
        let mut conn = Connection::open(&self.socket_path).await?;
        conn.request(&req).await
    }

    /// Ping the daemon and check that it speaks our protocol version.
    pub async fn check_available(&self) -> Result<()> {
        let resp = self
            .query(EngineRequest::Ping)
            .await
            .map_err(|e| Error::HypervisorUnavailable(e.to_string()))?;

        match resp {
            EngineResponse::Pong { version } if version == PROTOCOL_VERSION => {
                tracing::debug!(socket = %self.socket_path.display(), version, "engine available");
                Ok(())
            }
            EngineResponse::Pong { version } => Err(Error::HypervisorUnavailable(format!(
                "engine speaks protocol version {}, expected {}",
                version, PROTOCOL_VERSION
            ))),
            other => Err(Error::HypervisorUnavailable(failure(other).to_string())),
        }
    }
}

#[async_trait]
impl HostEngine for RemoteEngine {
    fn name(&self) -> &str {
        "remote"
    }

    async fn capabilities(&self) -> EngineResult<HostCapabilities> {
        match self.query(EngineRequest::Capabilities).await? {
            EngineResponse::Capabilities { capabilities } => Ok(capabilities),
            other => Err(failure(other)),
        }
    }

    async fn supports_hardware_model(&self, model: &HardwareModel) -> EngineResult<bool> {
        let req = EngineRequest::HardwareModelSupported {
            hardware_model: model.as_bytes().to_vec(),
        };
        match self.query(req).await? {
            EngineResponse::Supported { supported } => Ok(supported),
            other => Err(failure(other)),
        }
    }

    async fn create_machine(
        &self,
        config: &MachineConfiguration,
    ) -> EngineResult<Box<dyn VirtualMachine>> {
        let mut conn = Connection::open(&self.socket_path).await?;
        let req = EngineRequest::Create {
            spec: config.spec().clone(),
        };

        match conn.request(&req).await? {
            EngineResponse::Ok { state } => {
                tracing::info!(socket = %self.socket_path.display(), %state, "machine created");
                Ok(Box::new(RemoteMachine {
                    conn: tokio::sync::Mutex::new(conn),
                    state: parking_lot::Mutex::new(state),
                }))
            }
            other => Err(failure(other)),
        }
    }
}

/// A machine living in the engine daemon.
pub struct RemoteMachine {
    conn: tokio::sync::Mutex<Connection>,
    state: parking_lot::Mutex<MachineState>,
}

impl RemoteMachine {
    async fn call(&self, req: EngineRequest) -> EngineResult<MachineState> {
        let mut conn = self.conn.lock().await;
        match conn.request(&req).await? {
            EngineResponse::Ok { state } => {
                *self.state.lock() = state;
                Ok(state)
            }
            other => Err(failure(other)),
        }
    }
}

fn path_string(path: &Path) -> EngineResult<String> {
    path.to_str().map(str::to_owned).ok_or_else(|| {
        EngineError::with_code(
            format!("path is not valid UTF-8: {}", path.display()),
            codes::INVALID_REQUEST,
        )
    })
}

#[async_trait]
impl VirtualMachine for RemoteMachine {
    fn state(&self) -> MachineState {
        *self.state.lock()
    }

    async fn refresh_state(&self) -> EngineResult<MachineState> {
        self.call(EngineRequest::State).await
    }

    async fn start(&self) -> EngineResult<()> {
        self.call(EngineRequest::Start).await.map(drop)
    }

    async fn pause(&self) -> EngineResult<()> {
        self.call(EngineRequest::Pause).await.map(drop)
    }

    async fn resume(&self) -> EngineResult<()> {
        self.call(EngineRequest::Resume).await.map(drop)
    }

    async fn save(&self, path: &Path) -> EngineResult<()> {
        self.call(EngineRequest::Save {
            path: path_string(path)?,
        })
        .await
        .map(drop)
    }

    async fn restore(&self, path: &Path) -> EngineResult<()> {
        self.call(EngineRequest::Restore {
            path: path_string(path)?,
        })
        .await
        .map(drop)
    }
}
