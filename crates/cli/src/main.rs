use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod config;
mod output;

/// cnb-forge - compose Cloud Native Buildpacks builder images
#[derive(Parser)]
#[command(name = "cnb-forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Print machine-readable JSON
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compose a builder image and save it to the layout
  Compose {
    /// Builder definition (default: builder.toml)
    #[arg(default_value = "builder.toml")]
    config: PathBuf,
  },

  /// Resolve every order entry without composing
  Resolve {
    /// Builder definition (default: builder.toml)
    #[arg(default_value = "builder.toml")]
    config: PathBuf,
  },

  /// Show the metadata of a builder image
  Inspect {
    /// Image reference, e.g. registry.local/builder:latest
    reference: String,

    /// OCI image layout directory
    #[arg(short, long)]
    layout: PathBuf,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match &cli.command {
    Commands::Compose { config } => cmd::cmd_compose(config, cli.json),
    Commands::Resolve { config } => cmd::cmd_resolve(config, cli.json),
    Commands::Inspect { reference, layout } => cmd::cmd_inspect(reference, layout, cli.json),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      output::print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}
