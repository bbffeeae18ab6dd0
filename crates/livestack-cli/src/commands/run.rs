use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use console::Style;
use livestack_core::config::SessionConfig;
use livestack_core::io::OutputFormat;
use livestack_core::session::{Session, Severity};
use livestack_core::stack::{Normalization, StackMethod};
use tracing::debug;

use super::info::BayerArg;
use crate::summary::{print_event, print_session_summary, print_status};

#[derive(Clone, Copy, ValueEnum)]
pub enum StackMethodArg {
    Mean,
    Sum,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Tiff,
    Png,
    Jpeg,
}

#[derive(Args)]
pub struct RunArgs {
    /// Session config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Folder watched for new frames
    #[arg(long)]
    pub scan: Option<PathBuf>,

    /// Folder receiving stack results
    #[arg(long)]
    pub work: Option<PathBuf>,

    /// Stacking method
    #[arg(long, value_enum)]
    pub method: Option<StackMethodArg>,

    /// Rescale every rendering to its own min/max
    #[arg(long)]
    pub local_normalization: bool,

    /// Stack frames without registering them
    #[arg(long)]
    pub no_align: bool,

    /// Star matches required to accept a frame
    #[arg(long)]
    pub min_matches: Option<usize>,

    /// Number of stacking workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Master dark subtracted from every frame
    #[arg(long)]
    pub dark: Option<PathBuf>,

    /// Remove hot pixels before stacking
    #[arg(long)]
    pub hot_pixels: bool,

    /// Treat mono frames as raw mosaics with this pattern
    #[arg(long, value_enum)]
    pub bayer: Option<BayerArg>,

    /// Result file format
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// Keep a timestamped copy of every result
    #[arg(long)]
    pub save_every_image: bool,

    /// Also stack frames already in the scan folder
    #[arg(long)]
    pub include_existing: bool,

    /// Start the web preview with the session
    #[arg(long)]
    pub web: bool,

    /// Web preview port
    #[arg(long)]
    pub port: Option<u16>,
}

pub fn run(args: &RunArgs, verbose: bool) -> Result<()> {
    let config = build_config(args)?;
    print_session_summary(&config);

    let session = Session::new(config).context("Failed to create session")?;
    let events = session.subscribe();
    let printer = thread::Builder::new()
        .name("livestack-events".into())
        .spawn(move || {
            for event in events {
                if verbose || event.severity() > Severity::Debug {
                    print_event(&event);
                }
            }
        })
        .context("Failed to spawn event printer")?;

    session.start().context("Session could not start")?;
    print_help();
    console_loop(&session, args)?;

    if session.state().is_active() {
        session.stop()?;
    }
    drop(session);
    let _ = printer.join();
    Ok(())
}

fn build_config(args: &RunArgs) -> Result<SessionConfig> {
    let mut config = if let Some(ref config_path) = args.config {
        load_config(config_path)?
    } else {
        match (&args.scan, &args.work) {
            (Some(scan), Some(work)) => SessionConfig::new(scan, work),
            _ => bail!("Either --config or both --scan and --work are required"),
        }
    };

    if let Some(ref scan) = args.scan {
        config.paths.scan_folder = scan.clone();
    }
    if let Some(ref work) = args.work {
        config.paths.work_folder = work.clone();
    }
    if let Some(method) = args.method {
        config.stacking.method = match method {
            StackMethodArg::Mean => StackMethod::Mean,
            StackMethodArg::Sum => StackMethod::Sum,
        };
    }
    if args.local_normalization {
        config.stacking.normalization = Normalization::Local;
    }
    if args.no_align {
        config.alignment.enabled = false;
    }
    if let Some(min_matches) = args.min_matches {
        config.alignment.min_matches = min_matches;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(ref dark) = args.dark {
        config.preprocess.dark.enabled = true;
        config.preprocess.dark.path = Some(dark.clone());
    }
    if args.hot_pixels {
        config.preprocess.hot_pixel.enabled = true;
    }
    if let Some(pattern) = args.bayer {
        config.bayer_pattern = Some(pattern.into());
    }
    if let Some(format) = args.format {
        config.output.format = match format {
            FormatArg::Tiff => OutputFormat::Tiff,
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
        };
    }
    if args.save_every_image {
        config.output.save_every_image = true;
    }
    if args.include_existing {
        config.include_existing = true;
    }
    if args.web {
        config.web.autostart = true;
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }

    config.validate()?;
    Ok(config)
}

fn load_config(path: &Path) -> Result<SessionConfig> {
    debug!(path = %path.display(), "Loading session config");
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&contents).context("Invalid session config")
}

fn print_help() {
    let dim = Style::new().dim();
    println!(
        "  {}",
        dim.apply_to(
            "Commands: status, pause, resume, stop, start, save, rescan, reload, web on|off, quit"
        )
    );
}

/// Read commands from stdin until `quit` or end of input.
fn console_loop(session: &Session, args: &RunArgs) -> Result<()> {
    let error = Style::new().red();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let outcome: Result<()> = match (command, words.next()) {
            ("quit" | "exit" | "q", _) => break,
            ("status", _) => {
                print_status(&session.status());
                Ok(())
            }
            ("pause", _) => session.pause().map_err(Into::into),
            ("resume", _) => session.resume().map_err(Into::into),
            ("stop", _) => session.stop().map_err(Into::into),
            ("start", _) => session.start().map_err(Into::into),
            ("rescan", _) => session.restart_scanner().map_err(Into::into),
            ("save", _) => save(session),
            ("reload", _) => reload(session, args),
            ("web", Some("on")) => session.start_web_server().map(|_| ()).map_err(Into::into),
            ("web", Some("off")) => {
                session.stop_web_server();
                Ok(())
            }
            ("help" | "?", _) => {
                print_help();
                Ok(())
            }
            _ => Err(anyhow::anyhow!("Unknown command '{}'", line.trim())),
        };
        if let Err(e) = outcome {
            println!("  {}", error.apply_to(format!("{e:#}")));
        }
        io::stdout().flush()?;
    }
    Ok(())
}

fn save(session: &Session) -> Result<()> {
    let path = session.save_current()?;
    println!("  Saving {}", path.display());
    Ok(())
}

/// Re-read the config file, re-apply the command line on top of it and hand
/// the result to the running session.
fn reload(session: &Session, args: &RunArgs) -> Result<()> {
    let Some(ref path) = args.config else {
        bail!("No config file to reload, start with --config");
    };
    session.update_config(build_config(args)?)?;
    println!("  Config reloaded from {}", path.display());
    Ok(())
}
