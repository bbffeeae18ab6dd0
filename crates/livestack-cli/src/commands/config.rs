use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use livestack_core::config::SessionConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Folder watched for new frames
    #[arg(long, default_value = "lights")]
    pub scan: PathBuf,

    /// Folder receiving stack results
    #[arg(long, default_value = "results")]
    pub work: PathBuf,

    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a full default SessionConfig as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = SessionConfig::new(&args.scan, &args.work);
    let toml_str = toml::to_string_pretty(&config)?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
