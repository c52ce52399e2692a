//! Inspection and seeking tools for snapsync recordings.
//!
//! - Pre-scan recordings for their time range and snapshot count
//! - List the frames of a recording
//! - Drive a demo player through seeks and report where it lands
//!
//! # Design Principles
//!
//! - **Same path as playback** - Every report goes through the client crate's own session code.
//! - **Human-readable output** - Plain text by default, JSON on request.

use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use client::{prescan, ClientConfig, DemoPlayer, DemoStats, SeekReport};
use glob::Pattern;
use serde::Serialize;
use wire::{decode_message, read_frame, Limits, ServerOp};

/// Pre-scan result for one file.
#[derive(Debug, Clone, Serialize)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub size: u64,
    pub stats: DemoStats,
}

/// One frame of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub sequence: i32,
    pub bytes: usize,
    pub ops: Vec<&'static str>,
    pub server_time: Option<i32>,
    /// Message number of the delta base, for delta snapshots.
    pub delta_base: Option<i32>,
    pub entities: usize,
}

/// Where a scripted seek ended up.
#[derive(Debug, Clone, Serialize)]
pub struct SeekSummary {
    pub stats: DemoStats,
    pub from: Option<SeekReport>,
    pub to: SeekReport,
    pub snapshot_number: i32,
    pub snapshot_time: i32,
    pub checkpoints: usize,
}

/// Files in `dir` matching `glob` (by path or file name), sorted by path.
pub fn collect_demos(dir: &Path, glob: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = glob
        .map(|value| Pattern::new(value).context("invalid glob pattern"))
        .transpose()?;
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(pattern) = &pattern {
            let matches_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.matches(name));
            if !pattern.matches_path(&path) && !matches_name {
                continue;
            }
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

pub fn scan_file(path: &Path, config: &ClientConfig) -> Result<ScanEntry> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let stats = prescan(&mut reader, config).with_context(|| format!("scan {}", path.display()))?;
    Ok(ScanEntry {
        path: path.to_path_buf(),
        size,
        stats,
    })
}

/// Lists every frame of a recording without running a session.
pub fn inspect_demo(bytes: &[u8], limits: &Limits) -> Result<Vec<FrameReport>> {
    let mut reader = Cursor::new(bytes);
    let mut reports = Vec::new();
    while let Some(frame) = read_frame(&mut reader, limits).context("read frame")? {
        let message = decode_message(&frame.payload, limits)
            .with_context(|| format!("decode frame {}", frame.sequence))?;
        let mut report = FrameReport {
            sequence: frame.sequence,
            bytes: frame.payload.len(),
            ops: Vec::with_capacity(message.ops.len()),
            server_time: None,
            delta_base: None,
            entities: 0,
        };
        for op in &message.ops {
            report.ops.push(op_name(op));
            if let ServerOp::Snapshot(snapshot) = op {
                report.server_time = Some(snapshot.server_time);
                report.delta_base = (!snapshot.is_full())
                    .then(|| frame.sequence - i32::from(snapshot.delta_num));
                report.entities = snapshot.entities.len();
            }
        }
        reports.push(report);
    }
    Ok(reports)
}

const fn op_name(op: &ServerOp) -> &'static str {
    match op {
        ServerOp::Nop => "nop",
        ServerOp::ServerCommand { .. } => "command",
        ServerOp::Gamestate(_) => "gamestate",
        ServerOp::Configstring { .. } => "configstring",
        ServerOp::Snapshot(_) => "snapshot",
        ServerOp::Download { .. } => "download",
    }
}

/// Opens a player on `bytes`, optionally seeks to `from`, then to `to`.
pub fn seek_demo(bytes: Vec<u8>, from: Option<i32>, to: i32, config: ClientConfig) -> Result<SeekSummary> {
    let mut player = DemoPlayer::open(Cursor::new(bytes), config).context("open demo")?;
    let from = from
        .map(|time| player.seek(time))
        .transpose()
        .context("seek to start point")?;
    let to = player.seek(to).context("seek to target")?;
    let (snapshot_number, snapshot_time) = player.session().current_snapshot();
    Ok(SeekSummary {
        stats: *player.stats(),
        from,
        to,
        snapshot_number,
        snapshot_time,
        checkpoints: player.checkpoints().len(),
    })
}

pub fn format_scan(entry: &ScanEntry) -> String {
    let stats = &entry.stats;
    format!(
        "{}: {} bytes, {} messages, {} snapshots, server time {}..{} ({} ms)",
        entry.path.display(),
        entry.size,
        stats.messages,
        stats.snapshots,
        stats.first_server_time,
        stats.last_server_time,
        stats.duration()
    )
}

pub fn format_frame(report: &FrameReport) -> String {
    let mut line = format!(
        "#{:<6} {:>6} bytes  {}",
        report.sequence,
        report.bytes,
        report.ops.join(",")
    );
    if let Some(time) = report.server_time {
        line.push_str(&format!("  time={time} entities={}", report.entities));
        match report.delta_base {
            Some(base) => line.push_str(&format!(" delta<-{base}")),
            None => line.push_str(" full"),
        }
    }
    line
}

pub fn format_seek(summary: &SeekSummary) -> String {
    let mut out = String::new();
    if let Some(from) = &summary.from {
        out.push_str(&format!(
            "from {}: server time {} ({} messages replayed)\n",
            from.target, from.server_time, from.messages_replayed
        ));
    }
    let to = &summary.to;
    out.push_str(&format!(
        "to {}: server time {}, snapshot #{} at {}, {} messages replayed, {} commands",
        to.target,
        to.server_time,
        summary.snapshot_number,
        summary.snapshot_time,
        to.messages_replayed,
        to.commands_executed
    ));
    if let Some(restored) = to.restored_from {
        out.push_str(&format!(", restored checkpoint at {restored}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use demo_sim::{generate, SimConfig};

    fn recording() -> Vec<u8> {
        generate(&SimConfig {
            snapshots: 200,
            ..SimConfig::default()
        })
        .unwrap()
        .bytes
    }

    #[test]
    fn inspect_lists_every_frame() {
        let reports = inspect_demo(&recording(), &Limits::default()).unwrap();
        assert_eq!(reports.len(), 201);
        assert_eq!(reports[0].ops, vec!["gamestate"]);
        assert_eq!(reports[1].server_time, Some(10_050));
        assert_eq!(reports[1].delta_base, None);
        assert_eq!(reports[2].delta_base, Some(1));
        assert!(format_frame(&reports[2]).contains("delta<-1"));
    }

    #[test]
    fn seek_backward_restores_checkpoint() {
        let summary = seek_demo(recording(), Some(19_000), 13_000, ClientConfig::default()).unwrap();
        assert_eq!(summary.to.server_time, 13_000);
        assert!(summary.to.restored_from.is_some());
        assert_eq!(summary.snapshot_time, 13_000);
        assert!(format_seek(&summary).contains("restored checkpoint"));
    }

    #[test]
    fn scan_directory() {
        let dir = std::env::temp_dir().join(format!("snapsync-tools-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.dm"), recording()).unwrap();
        fs::write(dir.join("notes.txt"), b"not a demo").unwrap();

        let paths = collect_demos(&dir, Some("*.dm")).unwrap();
        assert_eq!(paths.len(), 1);
        let entry = scan_file(&paths[0], &ClientConfig::default()).unwrap();
        assert_eq!(entry.stats.snapshots, 200);
        assert_eq!(entry.stats.last_server_time, 20_000);
        fs::remove_dir_all(&dir).unwrap();
    }
}
