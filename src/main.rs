//! vmbundle CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vmbundle::config::VmbundleConfig;

mod cli;

/// vmbundle - run a VM bundle and keep its state between launches
#[derive(Parser, Debug)]
#[command(name = "vmbundle")]
#[command(about = "Run a VM bundle and keep its state between launches")]
#[command(version)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bundle's machine until interrupted, then save its state.
    Run(cli::run::RunCmd),

    /// Build and validate the machine configuration without starting it.
    Check(cli::check::CheckCmd),

    /// Show bundle artifacts and the save snapshot.
    Status(cli::status::StatusCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    tracing::debug!(version = vmbundle::VERSION, "starting vmbundle");

    // Load configuration
    let config = match VmbundleConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            VmbundleConfig::default()
        }
    };

    let result = match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Check(cmd) => cmd.run(&config),
        Commands::Status(cmd) => cmd.run(&config),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging(verbose: bool) {
    let default = if verbose { "vmbundle=debug" } else { "vmbundle=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
