use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use demo_sim::{generate, SimConfig, SimSummary};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wire::{decode_message, read_frame, Limits, ServerOp};

#[derive(Parser)]
#[command(
    name = "demo-sim",
    version,
    about = "Deterministic recorded-session generator"
)]
struct Cli {
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Number of snapshot messages to generate.
    #[arg(long, default_value_t = 600)]
    snapshots: u32,
    /// Server time between snapshots in milliseconds.
    #[arg(long, default_value_t = 50)]
    period: i32,
    /// Number of simulated entities.
    #[arg(long, default_value_t = 16)]
    entities: u16,
    /// Force a full snapshot every N messages.
    #[arg(long, default_value_t = 0)]
    full_every: u32,
    /// Drop every Nth message.
    #[arg(long, default_value_t = 0)]
    drop_every: u32,
    /// Issue a reliable command every N messages.
    #[arg(long, default_value_t = 10)]
    command_every: u32,
    /// Output directory for the recording.
    #[arg(long, default_value = "captures")]
    out_dir: PathBuf,
}

#[derive(Serialize)]
struct Report<'a> {
    config: &'a SimConfig,
    summary: &'a SimSummary,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SimConfig {
        seed: cli.seed,
        snapshots: cli.snapshots,
        snapshot_period: cli.period,
        entities: cli.entities,
        full_every: cli.full_every,
        drop_every: cli.drop_every,
        command_every: cli.command_every,
        ..SimConfig::default()
    };

    let recording = generate(&config).context("generate recording")?;
    validate_recording(&recording.bytes, &recording.summary)?;

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create output dir {}", cli.out_dir.display()))?;
    let path = cli.out_dir.join("session.dm");
    fs::write(&path, &recording.bytes).with_context(|| format!("write {}", path.display()))?;
    write_summary_json(
        &cli.out_dir,
        &Report {
            config: &config,
            summary: &recording.summary,
        },
    )?;

    info!(
        frames = recording.summary.frames,
        bytes = recording.summary.bytes,
        path = %path.display(),
        "wrote recording"
    );
    Ok(())
}

fn write_summary_json(out_dir: &Path, report: &Report<'_>) -> Result<()> {
    let path = out_dir.join("summary.json");
    let contents = serde_json::to_string_pretty(report).context("serialize summary")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Re-reads every frame and checks it against the summary.
fn validate_recording(bytes: &[u8], summary: &SimSummary) -> Result<()> {
    let limits = Limits::default();
    let mut reader = Cursor::new(bytes);
    let mut frames = 0;
    let mut last_time = None;
    while let Some(frame) = read_frame(&mut reader, &limits).context("read frame")? {
        let message = decode_message(&frame.payload, &limits)
            .with_context(|| format!("decode frame {}", frame.sequence))?;
        for op in &message.ops {
            if let ServerOp::Snapshot(snapshot) = op {
                if last_time.is_some_and(|t| snapshot.server_time <= t) {
                    anyhow::bail!("server time went backwards at frame {}", frame.sequence);
                }
                last_time = Some(snapshot.server_time);
            }
        }
        frames += 1;
    }
    if frames != summary.frames {
        anyhow::bail!("read {frames} frames, summary says {}", summary.frames);
    }
    if last_time != Some(summary.last_server_time) && summary.frames > 1 {
        anyhow::bail!("last server time does not match summary");
    }
    Ok(())
}
