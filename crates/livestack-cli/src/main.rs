mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "livestack", about = "Live stacking for deep-sky imaging")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show image metadata and detected stars
    Info(commands::info::InfoArgs),
    /// Print or save a default session config
    Config(commands::config::ConfigArgs),
    /// Watch a folder and stack frames as they arrive
    Run(commands::run::RunArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    // Session events go to the console printer instead.
    let filter = EnvFilter::new(format!("{level},livestack_core::session::events=off"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Run(args) => commands::run::run(args, cli.verbose),
    }
}
