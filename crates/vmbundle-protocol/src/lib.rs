//! Protocol types for vmbundle host engine communication.
//!
//! The host engine is a daemon that owns the hypervisor. vmbundle talks to it
//! over a Unix stream socket using length-prefixed JSON frames:
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (BE)  | JSON payload (len bytes)  |
//! +----------------+---------------------------+
//! ```
//!
//! Requests are [`EngineRequest`] values tagged by `"method"`, responses are
//! [`EngineResponse`] values tagged by `"status"`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame payload accepted by either side (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the frame length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Well-known socket names.
pub mod sockets {
    /// File name of the engine control socket inside the runtime directory.
    pub const ENGINE_SOCKET: &str = "engine.sock";
}

/// Error codes carried in [`EngineResponse::Error`].
pub mod codes {
    /// The request could not be parsed.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// The machine is not in a state that allows the operation.
    pub const INVALID_STATE: &str = "INVALID_STATE";
    /// A file referenced by the request does not exist.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// The host cannot perform the operation at all.
    pub const UNSUPPORTED: &str = "UNSUPPORTED";
    /// No machine has been created on this connection.
    pub const NO_MACHINE: &str = "NO_MACHINE";
}

// ============================================================================
// Machine state
// ============================================================================

/// Execution state of a machine as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// Created but never started.
    #[default]
    NotStarted,
    /// A start is in progress.
    Starting,
    /// The guest is executing.
    Running,
    /// A pause is in progress.
    Pausing,
    /// Execution is suspended in memory.
    Paused,
    /// A resume is in progress.
    Resuming,
    /// State is being read from a snapshot.
    Restoring,
    /// State is being written to a snapshot.
    Saving,
    /// A stop is in progress.
    Stopping,
    /// The machine has stopped.
    Stopped,
    /// The engine hit an unrecoverable error.
    Error,
}

impl MachineState {
    /// Returns `true` once the machine can no longer execute.
    pub fn is_terminal(self) -> bool {
        matches!(self, MachineState::Stopped | MachineState::Error)
    }

    fn as_str(self) -> &'static str {
        match self {
            MachineState::NotStarted => "not_started",
            MachineState::Starting => "starting",
            MachineState::Running => "running",
            MachineState::Pausing => "pausing",
            MachineState::Paused => "paused",
            MachineState::Resuming => "resuming",
            MachineState::Restoring => "restoring",
            MachineState::Saving => "saving",
            MachineState::Stopping => "stopping",
            MachineState::Stopped => "stopped",
            MachineState::Error => "error",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Host capabilities
// ============================================================================

/// Limits and features of the host hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// Minimum number of virtual CPUs per machine.
    pub min_cpus: u32,
    /// Maximum number of virtual CPUs per machine.
    pub max_cpus: u32,
    /// Minimum memory size in bytes.
    pub min_memory_bytes: u64,
    /// Maximum memory size in bytes.
    pub max_memory_bytes: u64,
    /// Whether the host can save and restore machine state.
    pub save_restore: bool,
}

// ============================================================================
// Machine specification
// ============================================================================

/// Serialized machine configuration handed to the engine on `create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Platform identity of the guest.
    pub platform: PlatformSpec,
    /// How the guest boots.
    pub boot_loader: BootLoaderSpec,
    /// Number of virtual CPUs.
    pub cpu_count: u32,
    /// Memory size in bytes.
    pub memory_bytes: u64,
    /// Attached devices, in attachment order.
    pub devices: Vec<DeviceSpec>,
}

/// Hardware model, machine identifier and auxiliary storage of a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// Opaque hardware model descriptor.
    #[serde(with = "base64_bytes")]
    pub hardware_model: Vec<u8>,
    /// Opaque machine identifier descriptor.
    #[serde(with = "base64_bytes")]
    pub machine_identifier: Vec<u8>,
    /// Path of the auxiliary storage blob on the host.
    pub auxiliary_storage: String,
}

/// Boot loader selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BootLoaderSpec {
    /// Boot the guest operating system from its own disk.
    MacOs,
}

/// Network attachment of a network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAttachment {
    /// Host-provided NAT.
    Nat,
}

/// A device attached to the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceSpec {
    /// Block device backed by a disk image.
    Storage {
        /// Host path of the disk image.
        path: String,
        /// Attach read-only.
        read_only: bool,
    },
    /// Network interface.
    Network {
        /// How the interface reaches the outside world.
        attachment: NetworkAttachment,
    },
    /// Graphics output with a single display.
    Display {
        /// Width in pixels.
        width_pixels: u32,
        /// Height in pixels.
        height_pixels: u32,
        /// Pixel density.
        pixels_per_inch: u32,
    },
    /// USB keyboard.
    Keyboard,
    /// USB screen-coordinate pointing device.
    Pointing,
    /// Sound device.
    Audio {
        /// Capture from the host's default input.
        input: bool,
        /// Play to the host's default output.
        output: bool,
    },
    /// Host directory exposed to the guest.
    DirectoryShare {
        /// Mount tag seen by the guest.
        tag: String,
        /// Shared host directory.
        host_path: String,
        /// Share read-only.
        read_only: bool,
    },
}

impl DeviceSpec {
    /// Short name of the device kind, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceSpec::Storage { .. } => "storage",
            DeviceSpec::Network { .. } => "network",
            DeviceSpec::Display { .. } => "display",
            DeviceSpec::Keyboard => "keyboard",
            DeviceSpec::Pointing => "pointing",
            DeviceSpec::Audio { .. } => "audio",
            DeviceSpec::DirectoryShare { .. } => "directory_share",
        }
    }

    /// Whether a machine with this device attached can be saved and restored.
    ///
    /// Directory shares hold live host file handles that a snapshot cannot
    /// capture.
    pub fn supports_save_restore(&self) -> bool {
        !matches!(self, DeviceSpec::DirectoryShare { .. })
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

/// Request sent from vmbundle to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EngineRequest {
    /// Liveness and version check.
    Ping,
    /// Query host limits.
    Capabilities,
    /// Ask whether a hardware model can run on this host.
    HardwareModelSupported {
        /// Opaque hardware model descriptor.
        #[serde(with = "base64_bytes")]
        hardware_model: Vec<u8>,
    },
    /// Create the machine bound to this connection.
    Create {
        /// Validated machine configuration.
        spec: MachineSpec,
    },
    /// Start the machine.
    Start,
    /// Pause the machine.
    Pause,
    /// Resume a paused machine.
    Resume,
    /// Save the state of a paused machine.
    Save {
        /// Snapshot file to create or overwrite.
        path: String,
    },
    /// Restore machine state from a snapshot. Leaves the machine paused.
    Restore {
        /// Snapshot file to read.
        path: String,
    },
    /// Query the current machine state.
    State,
}

/// Response sent from the engine to vmbundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineResponse {
    /// Reply to [`EngineRequest::Ping`].
    Pong {
        /// Engine protocol version.
        version: u32,
    },
    /// Reply to [`EngineRequest::Capabilities`].
    Capabilities {
        /// Host limits.
        capabilities: HostCapabilities,
    },
    /// Reply to [`EngineRequest::HardwareModelSupported`].
    Supported {
        /// Whether the model is supported.
        supported: bool,
    },
    /// A machine operation completed successfully.
    Ok {
        /// Machine state after the operation.
        state: MachineState,
    },
    /// The request failed.
    Error {
        /// Human readable description.
        message: String,
        /// Machine readable code, see [`codes`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl EngineResponse {
    /// Build an error response.
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        EngineResponse::Error {
            message: message.into(),
            code: code.map(String::from),
        }
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The length header announces a payload above [`MAX_FRAME_SIZE`].
    #[error("frame too large: {len} bytes (max {})", MAX_FRAME_SIZE)]
    FrameTooLarge {
        /// Announced payload length.
        len: usize,
    },
    /// The payload is not valid JSON for the expected type.
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message as a length-prefixed JSON frame.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let payload = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read the payload length from a frame header.
pub fn frame_len(header: [u8; HEADER_LEN]) -> Result<usize, DecodeError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        tracing::warn!(len, "rejecting oversized frame");
        return Err(DecodeError::FrameTooLarge { len });
    }
    Ok(len)
}

/// Decode a frame payload (without header).
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
