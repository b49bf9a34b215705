//! Status command implementation.

use clap::Args;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use vmbundle::bundle::{Artifact, MachineBundle};
use vmbundle::config::VmbundleConfig;
use vmbundle::{Error, Result};

/// Show bundle artifacts and the save snapshot. Does not contact the engine.
#[derive(Args, Debug)]
pub struct StatusCmd {
    /// Bundle directory (default: configured bundle, then ~/VM.bundle).
    pub bundle: Option<PathBuf>,
}

impl StatusCmd {
    /// Execute the status command.
    pub fn run(self, config: &VmbundleConfig) -> Result<()> {
        let bundle = MachineBundle::locate(self.bundle.as_deref(), config)?;

        println!("Bundle: {}", bundle.root().display());
        for artifact in Artifact::ALL {
            let status = match bundle.check_artifact(artifact) {
                Ok(_) => "ok".to_string(),
                Err(Error::MissingArtifact { .. }) => "missing".to_string(),
                Err(Error::UnreadableArtifact { reason, .. }) => format!("unreadable ({})", reason),
                Err(e) => e.to_string(),
            };
            println!("  {:<20} {}", artifact.file_name(), status);
        }

        match bundle.snapshot_info() {
            Some(info) => {
                let age = info
                    .modified
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                    .map(|age| {
                        format!(
                            ", saved {} ago",
                            humantime::format_duration(Duration::from_secs(age.as_secs()))
                        )
                    })
                    .unwrap_or_default();
                println!(
                    "Snapshot: {} MiB{}",
                    info.size_bytes / (1024 * 1024),
                    age
                );
            }
            None => println!("Snapshot: none (next run cold starts)"),
        }

        Ok(())
    }
}
