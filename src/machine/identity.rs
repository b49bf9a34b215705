//! Platform identity read from the bundle.

use std::path::Path;
use vmbundle_protocol::PlatformSpec;

/// Opaque hardware model descriptor.
///
/// The engine decides whether the host can run it; locally we only require
/// that the descriptor is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareModel(Vec<u8>);

impl HardwareModel {
    /// Parse descriptor bytes. Returns `None` for an empty descriptor.
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes))
        }
    }

    /// Raw descriptor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Opaque machine identifier descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentifier(Vec<u8>);

impl MachineIdentifier {
    /// Parse descriptor bytes. Returns `None` for an empty descriptor.
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes))
        }
    }

    /// Raw descriptor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Hardware model, machine identifier and auxiliary storage of one guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    hardware_model: HardwareModel,
    machine_identifier: MachineIdentifier,
    auxiliary_storage: String,
}

impl PlatformIdentity {
    /// Combine the three parts of a platform identity.
    pub fn new(
        hardware_model: HardwareModel,
        machine_identifier: MachineIdentifier,
        auxiliary_storage: impl Into<String>,
    ) -> Self {
        Self {
            hardware_model,
            machine_identifier,
            auxiliary_storage: auxiliary_storage.into(),
        }
    }

    /// The hardware model.
    pub fn hardware_model(&self) -> &HardwareModel {
        &self.hardware_model
    }

    /// The machine identifier.
    pub fn machine_identifier(&self) -> &MachineIdentifier {
        &self.machine_identifier
    }

    /// Path of the auxiliary storage blob.
    pub fn auxiliary_storage(&self) -> &Path {
        Path::new(&self.auxiliary_storage)
    }

    pub(crate) fn to_spec(&self) -> PlatformSpec {
        PlatformSpec {
            hardware_model: self.hardware_model.as_bytes().to_vec(),
            machine_identifier: self.machine_identifier.as_bytes().to_vec(),
            auxiliary_storage: self.auxiliary_storage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_descriptors_rejected() {
        assert!(HardwareModel::from_bytes(Vec::new()).is_none());
        assert!(MachineIdentifier::from_bytes(Vec::new()).is_none());
        assert_eq!(
            HardwareModel::from_bytes(vec![1, 2]).unwrap().as_bytes(),
            &[1, 2]
        );
    }

    #[test]
    fn test_platform_spec() {
        let identity = PlatformIdentity::new(
            HardwareModel::from_bytes(b"model".to_vec()).unwrap(),
            MachineIdentifier::from_bytes(b"id".to_vec()).unwrap(),
            "/vm/AuxiliaryStorage",
        );
        let spec = identity.to_spec();
        assert_eq!(spec.hardware_model, b"model");
        assert_eq!(spec.machine_identifier, b"id");
        assert_eq!(spec.auxiliary_storage, "/vm/AuxiliaryStorage");
    }
}
