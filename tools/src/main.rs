use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{compute_safe_increment_threshold, ClientConfig};
use snapsync_tools::{
    collect_demos, format_frame, format_scan, format_seek, inspect_demo, scan_file, seek_demo,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "snapsync",
    version,
    about = "snapsync recording inspection and seeking tools"
)]
struct Cli {
    /// Optional client configuration JSON.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pre-scan recordings and report their time range.
    Scan {
        /// A recording, or a directory of recordings.
        path: PathBuf,
        /// Glob filter when scanning a directory.
        #[arg(long)]
        glob: Option<String>,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// List the frames of a recording.
    Inspect {
        file: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Seek through a recording and report where playback lands.
    Seek {
        file: PathBuf,
        /// Server time to seek to.
        #[arg(long)]
        to: i32,
        /// Server time to seek to first.
        #[arg(long)]
        from: Option<i32>,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the safe increment threshold for two frame periods.
    Threshold { client_ms: i32, server_ms: i32 },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli
        .config
        .as_deref()
        .map(load_config)
        .transpose()
        .context("load config")?
        .unwrap_or_default();

    match cli.command {
        Command::Scan { path, glob, json } => {
            let paths = if path.is_dir() {
                collect_demos(&path, glob.as_deref())?
            } else {
                vec![path]
            };
            let entries = paths
                .iter()
                .map(|path| scan_file(path, &config))
                .collect::<Result<Vec<_>>>()?;
            if json {
                let json = serde_json::to_string_pretty(&entries).context("serialize json")?;
                println!("{json}");
            } else {
                for entry in &entries {
                    println!("{}", format_scan(entry));
                }
            }
        }
        Command::Inspect { file, json } => {
            let bytes = read_demo(&file)?;
            let reports = inspect_demo(&bytes, &wire::Limits::default())?;
            if json {
                let json = serde_json::to_string_pretty(&reports).context("serialize json")?;
                println!("{json}");
            } else {
                for report in &reports {
                    println!("{}", format_frame(report));
                }
            }
        }
        Command::Seek {
            file,
            to,
            from,
            json,
        } => {
            let bytes = read_demo(&file)?;
            let summary = seek_demo(bytes, from, to, config)?;
            if json {
                let json = serde_json::to_string_pretty(&summary).context("serialize json")?;
                println!("{json}");
            } else {
                println!("{}", format_seek(&summary));
            }
        }
        Command::Threshold {
            client_ms,
            server_ms,
        } => {
            println!("{}", compute_safe_increment_threshold(client_ms, server_ms));
        }
    }
    Ok(())
}

fn read_demo(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("read demo {}", path.display()))
}

fn load_config(path: &Path) -> Result<ClientConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ClientConfig = serde_json::from_str(&contents).context("parse config json")?;
    Ok(config.clamped())
}
