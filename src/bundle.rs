//! Machine bundle management.
//!
//! A bundle is a directory holding one machine's persisted identity, its disk
//! image and, between sessions, a save snapshot:
//!
//! ```text
//! VM.bundle/
//! ├── AuxiliaryStorage
//! ├── HardwareModel
//! ├── MachineIdentifier
//! ├── Disk.img
//! └── SaveFile.vzvmsave      (only while the machine is suspended)
//! ```
//!
//! The snapshot is single-use: once a restore has been attempted it is
//! deleted, whatever the outcome.

use crate::config::VmbundleConfig;
use crate::error::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Auxiliary storage file name.
pub const AUXILIARY_STORAGE_FILENAME: &str = "AuxiliaryStorage";

/// Hardware model descriptor file name.
pub const HARDWARE_MODEL_FILENAME: &str = "HardwareModel";

/// Machine identifier descriptor file name.
pub const MACHINE_IDENTIFIER_FILENAME: &str = "MachineIdentifier";

/// Primary disk image file name.
pub const DISK_IMAGE_FILENAME: &str = "Disk.img";

/// Save snapshot file name.
pub const SAVE_FILE_FILENAME: &str = "SaveFile.vzvmsave";

/// Bundle directory used when nothing else is configured, relative to `$HOME`.
pub const DEFAULT_BUNDLE_DIRNAME: &str = "VM.bundle";

/// A required bundle artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Auxiliary storage blob (NVRAM and boot state).
    AuxiliaryStorage,
    /// Hardware model descriptor.
    HardwareModel,
    /// Machine identifier descriptor.
    MachineIdentifier,
    /// Primary disk image.
    DiskImage,
}

impl Artifact {
    /// All required artifacts, in the order they are checked.
    pub const ALL: [Artifact; 4] = [
        Artifact::AuxiliaryStorage,
        Artifact::HardwareModel,
        Artifact::MachineIdentifier,
        Artifact::DiskImage,
    ];

    /// File name of the artifact inside the bundle.
    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::AuxiliaryStorage => AUXILIARY_STORAGE_FILENAME,
            Artifact::HardwareModel => HARDWARE_MODEL_FILENAME,
            Artifact::MachineIdentifier => MACHINE_IDENTIFIER_FILENAME,
            Artifact::DiskImage => DISK_IMAGE_FILENAME,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::AuxiliaryStorage => write!(f, "auxiliary storage"),
            Artifact::HardwareModel => write!(f, "hardware model"),
            Artifact::MachineIdentifier => write!(f, "machine identifier"),
            Artifact::DiskImage => write!(f, "disk image"),
        }
    }
}

/// Size and age of a save snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// File size in bytes.
    pub size_bytes: u64,
    /// Last modification time, if the filesystem reports one.
    pub modified: Option<SystemTime>,
}

/// A selected machine bundle directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineBundle {
    root: PathBuf,
}

impl MachineBundle {
    /// Open an existing bundle directory.
    ///
    /// Only the directory itself is checked here; artifacts are checked when
    /// the configuration is built.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(Error::BundleNotFound(path.to_path_buf()));
        }
        if path.to_str().is_none() {
            return Err(Error::NonUtf8Path(path.to_path_buf()));
        }
        Ok(Self {
            root: path.to_path_buf(),
        })
    }

    /// Resolve the bundle to use for a session.
    ///
    /// Searches in order:
    /// 1. The explicitly selected path
    /// 2. `default_bundle` from the configuration
    /// 3. `~/VM.bundle`
    pub fn locate(explicit: Option<&Path>, config: &VmbundleConfig) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::open(path);
        }

        if let Some(path) = &config.default_bundle {
            tracing::debug!(path = %path.display(), "using configured default bundle");
            return Self::open(path);
        }

        let home = dirs::home_dir().ok_or_else(|| {
            Error::Config("no bundle given and home directory is unknown".into())
        })?;
        Self::open(home.join(DEFAULT_BUNDLE_DIRNAME))
    }

    /// The bundle directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a required artifact.
    pub fn artifact_path(&self, artifact: Artifact) -> PathBuf {
        self.root.join(artifact.file_name())
    }

    /// Path of the save snapshot, whether or not it exists.
    pub fn save_file_path(&self) -> PathBuf {
        self.root.join(SAVE_FILE_FILENAME)
    }

    /// Check that an artifact exists and can be opened for reading.
    pub fn check_artifact(&self, artifact: Artifact) -> Result<PathBuf> {
        let path = self.artifact_path(artifact);
        let file = open_artifact(artifact, &path)?;
        let metadata = file
            .metadata()
            .map_err(|e| Error::unreadable(artifact, &path, e.to_string()))?;
        if !metadata.is_file() {
            return Err(Error::unreadable(artifact, &path, "not a regular file"));
        }
        Ok(path)
    }

    /// Check every required artifact, stopping at the first problem.
    pub fn check_artifacts(&self) -> Result<()> {
        for artifact in Artifact::ALL {
            self.check_artifact(artifact)?;
        }
        Ok(())
    }

    /// Read the full contents of an artifact.
    pub fn read_artifact(&self, artifact: Artifact) -> Result<Vec<u8>> {
        let path = self.check_artifact(artifact)?;
        let mut file = open_artifact(artifact, &path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| Error::unreadable(artifact, &path, e.to_string()))?;
        Ok(bytes)
    }

    /// Whether a save snapshot is present.
    pub fn has_snapshot(&self) -> bool {
        self.save_file_path().is_file()
    }

    /// Size and age of the save snapshot, if present.
    pub fn snapshot_info(&self) -> Option<SnapshotInfo> {
        let metadata = std::fs::metadata(self.save_file_path()).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(SnapshotInfo {
            size_bytes: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    /// Delete the save snapshot.
    ///
    /// Returns `true` if a file was removed, `false` if there was none.
    pub fn discard_snapshot(&self) -> Result<bool> {
        let path = self.save_file_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "save snapshot removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::snapshot(
                format!("remove {}", path.display()),
                e.to_string(),
            )),
        }
    }
}

fn open_artifact(artifact: Artifact, path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::MissingArtifact {
                artifact,
                path: path.to_path_buf(),
            }
        } else {
            Error::unreadable(artifact, path, e.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated_bundle() -> (TempDir, MachineBundle) {
        let dir = TempDir::new().unwrap();
        for artifact in Artifact::ALL {
            std::fs::write(dir.path().join(artifact.file_name()), b"data").unwrap();
        }
        let bundle = MachineBundle::open(dir.path()).unwrap();
        (dir, bundle)
    }

    #[test]
    fn test_open_requires_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.bundle");
        assert!(matches!(
            MachineBundle::open(&missing),
            Err(Error::BundleNotFound(p)) if p == missing
        ));

        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(MachineBundle::open(&file).is_err());
    }

    #[test]
    fn test_open_rejects_non_utf8_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let root = dir.path().join(OsStr::from_bytes(b"VM\xff.bundle"));
        std::fs::create_dir(&root).unwrap();

        let err = MachineBundle::open(&root).unwrap_err();
        assert!(matches!(&err, Error::NonUtf8Path(p) if *p == root));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_fixed_layout() {
        let (dir, bundle) = populated_bundle();
        assert_eq!(
            bundle.artifact_path(Artifact::DiskImage),
            dir.path().join("Disk.img")
        );
        assert_eq!(
            bundle.save_file_path(),
            dir.path().join("SaveFile.vzvmsave")
        );
        bundle.check_artifacts().unwrap();
    }

    #[test]
    fn test_each_missing_artifact_reported() {
        for missing in Artifact::ALL {
            let (_dir, bundle) = populated_bundle();
            std::fs::remove_file(bundle.artifact_path(missing)).unwrap();

            let err = bundle.check_artifacts().unwrap_err();
            assert!(err.is_precondition());
            assert!(
                matches!(err, Error::MissingArtifact { artifact, .. } if artifact == missing),
                "expected missing {}",
                missing
            );
        }
    }

    #[test]
    fn test_directory_in_place_of_artifact() {
        let (_dir, bundle) = populated_bundle();
        let path = bundle.artifact_path(Artifact::HardwareModel);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(matches!(
            bundle.check_artifact(Artifact::HardwareModel),
            Err(Error::UnreadableArtifact { .. })
        ));
    }

    #[test]
    fn test_snapshot_lifecycle() {
        let (_dir, bundle) = populated_bundle();
        assert!(!bundle.has_snapshot());
        assert!(bundle.snapshot_info().is_none());
        assert!(!bundle.discard_snapshot().unwrap());

        std::fs::write(bundle.save_file_path(), b"state").unwrap();
        assert!(bundle.has_snapshot());
        assert_eq!(bundle.snapshot_info().unwrap().size_bytes, 5);

        assert!(bundle.discard_snapshot().unwrap());
        assert!(!bundle.has_snapshot());
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let (dir, _bundle) = populated_bundle();
        let other = TempDir::new().unwrap();
        let config = VmbundleConfig {
            default_bundle: Some(other.path().to_path_buf()),
            ..Default::default()
        };

        let bundle = MachineBundle::locate(Some(dir.path()), &config).unwrap();
        assert_eq!(bundle.root(), dir.path());

        let bundle = MachineBundle::locate(None, &config).unwrap();
        assert_eq!(bundle.root(), other.path());
    }
}
