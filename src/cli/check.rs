//! Check command implementation.

use clap::Args;
use std::path::PathBuf;
use vmbundle::bundle::MachineBundle;
use vmbundle::config::VmbundleConfig;
use vmbundle::machine::ConfigurationBuilder;
use vmbundle::vm::backend;
use vmbundle::Result;

/// Build and validate the machine configuration without creating a machine.
#[derive(Args, Debug)]
pub struct CheckCmd {
    /// Bundle directory (default: configured bundle, then ~/VM.bundle).
    pub bundle: Option<PathBuf>,

    /// Engine control socket.
    #[arg(long, value_name = "PATH")]
    pub engine_socket: Option<PathBuf>,
}

impl CheckCmd {
    /// Execute the check command.
    pub fn run(self, config: &VmbundleConfig) -> Result<()> {
        let config = super::with_engine_socket(config, self.engine_socket.as_ref());
        let bundle = MachineBundle::locate(self.bundle.as_deref(), &config)?;
        let options = config.session_options()?;

        let runtime = super::runtime()?;
        let configuration = runtime.block_on(async {
            let engine = backend::connect_default(&config).await?;
            ConfigurationBuilder::new(&bundle)
                .sizing(options.sizing)
                .devices(options.devices)
                .build(engine.as_ref())
                .await
        })?;

        let devices: Vec<_> = configuration.devices().iter().map(|d| d.kind()).collect();
        println!("Bundle:   {}", bundle.root().display());
        println!("CPUs:     {}", configuration.cpu_count());
        println!("Memory:   {} MiB", configuration.memory_bytes() / (1024 * 1024));
        println!("Devices:  {}", devices.join(", "));
        println!(
            "Snapshot: {}",
            if bundle.has_snapshot() { "present" } else { "none" }
        );
        println!("Configuration OK");
        Ok(())
    }
}
