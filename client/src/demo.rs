//! Demo playback with random-access seeking.
//!
//! A recording is a forward-only stream of delta-encoded messages. Seeking
//! forward replays messages through the normal session path; seeking
//! backward restores the newest suitable [`Checkpoint`] and replays forward
//! from there.

use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use tracing::{debug, info, warn};
use wire::{decode_message, read_frame, FrameError, ServerOp};

use crate::checkpoint::{should_capture, Checkpoint, CheckpointRing};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::session::{ClientSession, MessageSummary, SessionMode};
use crate::snapshot::WriteOutcome;

/// Restored checkpoints must lie this far before the seek target so the
/// interpolation window has history once replay reaches the target.
pub const REWIND_MARGIN_MS: i32 = 1000;

/// Receives the output of demo playback.
pub trait FrameSink {
    /// A reliable command reached the game module.
    fn server_command(&mut self, _sequence: i32, _text: &str) {}

    /// A frame is ready at `session.server_time()`.
    fn draw_frame(&mut self, session: &ClientSession);
}

impl FrameSink for () {
    fn draw_frame(&mut self, _session: &ClientSession) {}
}

/// Aggregate statistics from the pre-scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DemoStats {
    pub first_server_time: i32,
    pub last_server_time: i32,
    /// Snapshots accepted by the session.
    pub snapshots: u64,
    /// Frames in the stream.
    pub messages: u64,
}

impl DemoStats {
    /// Playable length in milliseconds.
    #[must_use]
    pub const fn duration(&self) -> i32 {
        self.last_server_time - self.first_server_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    SeekingForward,
    SeekingBackward,
    Finished,
}

/// Outcome of one seek.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeekReport {
    /// Target after clamping to the recording.
    pub target: i32,
    /// Published server time after the seek.
    pub server_time: i32,
    pub messages_replayed: u64,
    pub commands_executed: usize,
    /// Server time of the restored checkpoint, for backward seeks.
    pub restored_from: Option<i32>,
}

/// Reads every frame once through a fresh playback session and rewinds the
/// reader to the start.
pub fn prescan<R: Read + Seek>(reader: &mut R, config: &ClientConfig) -> ClientResult<DemoStats> {
    reader.seek(SeekFrom::Start(0))?;
    let mut session = ClientSession::new(config.clone(), SessionMode::Playback);
    let mut stats = DemoStats::default();
    let mut first = None;

    loop {
        let frame = match read_frame(reader, session.limits()) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(FrameError::Truncated { expected, actual }) => {
                warn!(expected, actual, "demo file was truncated");
                break;
            }
            Err(err) => return Err(err.into()),
        };
        stats.messages += 1;
        let summary = session.parse_server_message(frame.sequence, &frame.payload)?;
        if let Some(WriteOutcome::Accepted { server_time, .. }) = summary.snapshot {
            stats.snapshots += 1;
            first.get_or_insert(server_time);
            stats.last_server_time = server_time;
        }
    }

    reader.seek(SeekFrom::Start(0))?;
    stats.first_server_time = first.ok_or(ClientError::NoValidSnapshot)?;
    debug!(?stats, "demo pre-scan complete");
    Ok(stats)
}

/// Plays a recording with fast-forward, rewind and seeking.
pub struct DemoPlayer<R> {
    reader: R,
    session: ClientSession,
    stats: DemoStats,
    checkpoints: CheckpointRing<Checkpoint>,
    interval: u64,
    messages_read: u64,
    state: PlaybackState,
    paused: bool,
}

impl<R: Read + Seek> DemoPlayer<R> {
    /// Pre-scans the recording, then reads up to the first valid snapshot.
    pub fn open(mut reader: R, config: ClientConfig) -> ClientResult<Self> {
        let config = config.clamped();
        let stats = prescan(&mut reader, &config)?;
        let interval = config.checkpoint_interval(stats.messages);
        let capacity = NonZeroUsize::new(config.max_rewind_backups).unwrap_or(NonZeroUsize::MIN);

        let mut player = Self {
            reader,
            session: ClientSession::new(config, SessionMode::Playback),
            stats,
            checkpoints: CheckpointRing::new(capacity),
            interval,
            messages_read: 0,
            state: PlaybackState::Idle,
            paused: false,
        };

        while !player.session.has_valid_snapshot() {
            if player.read_message()?.is_none() {
                return Err(ClientError::NoValidSnapshot);
            }
        }
        player.session.activate();
        player.state = PlaybackState::Playing;
        info!(
            first = stats.first_server_time,
            last = stats.last_server_time,
            snapshots = stats.snapshots,
            interval,
            "demo opened"
        );
        Ok(player)
    }

    #[must_use]
    pub const fn session(&self) -> &ClientSession {
        &self.session
    }

    #[must_use]
    pub const fn stats(&self) -> &DemoStats {
        &self.stats
    }

    #[must_use]
    pub const fn checkpoints(&self) -> &CheckpointRing<Checkpoint> {
        &self.checkpoints
    }

    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    /// Frames consumed from the stream so far.
    #[must_use]
    pub const fn messages_read(&self) -> u64 {
        self.messages_read
    }

    /// Frames between checkpoints.
    #[must_use]
    pub const fn checkpoint_interval(&self) -> u64 {
        self.interval
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Freezes the render clock until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Captures a checkpoint if one is due, then reads and applies the next
    /// frame. Returns `None` at end of stream.
    pub fn read_message(&mut self) -> ClientResult<Option<MessageSummary>> {
        let position = self.reader.stream_position()?;
        if self.session.has_valid_snapshot()
            && should_capture(self.messages_read, self.interval, self.checkpoints.newest_key())
        {
            self.capture(position);
        }

        let frame = match read_frame(&mut self.reader, self.session.limits()) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.finish();
                return Ok(None);
            }
            Err(FrameError::Truncated { expected, actual }) => {
                warn!(expected, actual, "demo file was truncated");
                self.finish();
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        self.messages_read += 1;
        let summary = self
            .session
            .parse_server_message(frame.sequence, &frame.payload)?;
        Ok(Some(summary))
    }

    /// Stores the session as a checkpoint, with the clock pinned to the
    /// current snapshot as a seek landing there would leave it.
    fn capture(&mut self, seek_point: u64) {
        let mut state = self.session.capture();
        let (_, snap_time) = self.session.current_snapshot();
        state.pin_time(snap_time);
        let checkpoint = Checkpoint {
            seek_point,
            messages_read: self.messages_read,
            state,
        };
        debug!(
            messages_read = self.messages_read,
            seek_point,
            server_time = checkpoint.server_time(),
            "captured rewind checkpoint"
        );
        // should_capture only admits keys newer than the last insert
        if let Err(err) = self.checkpoints.insert(self.messages_read, checkpoint) {
            warn!(%err, "dropped rewind checkpoint");
        }
    }

    fn finish(&mut self) {
        if self.state != PlaybackState::Finished {
            debug!(messages_read = self.messages_read, "demo completed");
        }
        self.state = PlaybackState::Finished;
    }

    /// Executes pending reliable commands, catching up past any that were
    /// cycled out while replaying.
    fn drain_commands(&mut self, mut deliver: impl FnMut(i32, &str)) -> ClientResult<usize> {
        let commands = self.session.commands();
        let next = commands.last_executed().saturating_add(1);
        if next <= commands.sequence() && commands.is_cycled(next) {
            let oldest = commands.oldest();
            warn!(next, oldest, "reliable commands fell behind, skipping to oldest retained");
            self.session.commands_mut().set_last_executed(oldest.saturating_sub(1));
        }

        let mut executed = 0;
        loop {
            match self.session.next_server_command() {
                Ok(Some(command)) => {
                    deliver(command.sequence, &command.text);
                    executed += 1;
                }
                Ok(None) => return Ok(executed),
                Err(ClientError::ServerDisconnected { reason }) => {
                    debug!(?reason, "demo ended with disconnect");
                    self.finish();
                    return Ok(executed);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn clamp_target(&self, target: i32) -> i32 {
        target.clamp(self.stats.first_server_time, self.stats.last_server_time)
    }

    fn snap_time(&self) -> i32 {
        self.session.current_snapshot().1
    }

    /// Replays forward until the newest snapshot reaches `target`, then pins
    /// the render clock there. Targets behind the clock are ignored.
    pub fn fast_forward(&mut self, target: i32) -> ClientResult<SeekReport> {
        let target = self.clamp_target(target);
        let mut report = SeekReport {
            target,
            server_time: self.session.server_time(),
            ..SeekReport::default()
        };
        if target < self.session.server_time() {
            debug!(target, server_time = report.server_time, "fast forward target is behind");
            return Ok(report);
        }

        if target >= self.snap_time() {
            self.state = PlaybackState::SeekingForward;
            let start = self.messages_read;
            while self.snap_time() < target {
                if self.read_message()?.is_none() {
                    break;
                }
                report.commands_executed += self.drain_commands(|_, _| {})?;
            }
            report.messages_replayed = self.messages_read - start;
        }

        self.session.pin_time(target);
        if self.state != PlaybackState::Finished {
            self.state = PlaybackState::Playing;
        }
        report.server_time = self.session.server_time();
        debug!(?report, snap_time = self.snap_time(), "fast forward complete");
        Ok(report)
    }

    /// Restores the newest checkpoint at least [`REWIND_MARGIN_MS`] before
    /// `target` (else the oldest), then fast-forwards to `target`.
    pub fn rewind(&mut self, target: i32) -> ClientResult<SeekReport> {
        let target = self.clamp_target(target);
        let limit = target.saturating_sub(REWIND_MARGIN_MS);
        let restored = self
            .checkpoints
            .latest_matching(|cp| cp.server_time() <= limit)
            .or_else(|| self.checkpoints.oldest())
            .map(|(_, cp)| cp.clone());
        let Some(checkpoint) = restored else {
            return self.fast_forward(target);
        };

        self.state = PlaybackState::SeekingBackward;
        let restored_time = checkpoint.server_time();
        debug!(
            target,
            restored_time,
            messages_read = checkpoint.messages_read,
            seek_point = checkpoint.seek_point,
            "restoring rewind checkpoint"
        );
        self.reader.seek(SeekFrom::Start(checkpoint.seek_point))?;
        self.messages_read = checkpoint.messages_read;
        self.session.restore(checkpoint.state);
        self.session.force_active();
        self.session.pin_time(restored_time.min(target));

        let mut report = self.fast_forward(target)?;
        report.restored_from = Some(restored_time);
        Ok(report)
    }

    /// Seeks to `target`, forward or backward.
    pub fn seek(&mut self, target: i32) -> ClientResult<SeekReport> {
        let target = self.clamp_target(target);
        let now = self.session.server_time();
        if target > now {
            self.fast_forward(target)
        } else if target < now {
            self.rewind(target)
        } else {
            Ok(SeekReport {
                target,
                server_time: now,
                ..SeekReport::default()
            })
        }
    }

    /// Seeks by `ms` relative to the current server time.
    pub fn seek_relative(&mut self, ms: i32) -> ClientResult<SeekReport> {
        self.seek(self.session.server_time().saturating_add(ms))
    }

    pub fn seek_from_start(&mut self, ms: i32) -> ClientResult<SeekReport> {
        self.seek(self.stats.first_server_time.saturating_add(ms))
    }

    pub fn seek_from_end(&mut self, ms: i32) -> ClientResult<SeekReport> {
        self.seek(self.stats.last_server_time.saturating_sub(ms))
    }

    /// Jumps to the next snapshot's server time.
    ///
    /// Returns `None` at the last snapshot or when no later snapshot exists.
    pub fn seek_next(&mut self) -> ClientResult<Option<SeekReport>> {
        let snap_time = self.snap_time();
        if snap_time >= self.stats.last_server_time {
            return Ok(None);
        }
        let now = self.session.server_time();
        if now < snap_time {
            return self.seek(snap_time).map(Some);
        }
        match self.peek_snapshot_after(now)? {
            Some(time) => self.seek(time).map(Some),
            None => Ok(None),
        }
    }

    /// Scans ahead for the first snapshot newer than `time` without moving
    /// the stream position.
    fn peek_snapshot_after(&mut self, time: i32) -> ClientResult<Option<i32>> {
        let position = self.reader.stream_position()?;
        let mut found = None;
        while found.is_none() {
            let frame = match read_frame(&mut self.reader, self.session.limits()) {
                Ok(Some(frame)) => frame,
                Ok(None) | Err(FrameError::Truncated { .. }) => break,
                Err(err) => {
                    self.reader.seek(SeekFrom::Start(position))?;
                    return Err(err.into());
                }
            };
            let message = decode_message(&frame.payload, self.session.limits())?;
            found = message.ops.iter().find_map(|op| match op {
                ServerOp::Snapshot(snap) if snap.server_time > time => Some(snap.server_time),
                _ => None,
            });
        }
        self.reader.seek(SeekFrom::Start(position))?;
        Ok(found)
    }

    /// Jumps to the newest buffered snapshot older than the render clock.
    ///
    /// Falls back to the newest older checkpoint, then to the start of the
    /// recording. Returns `None` at the first snapshot.
    pub fn seek_prev(&mut self) -> ClientResult<Option<SeekReport>> {
        if self.snap_time() <= self.stats.first_server_time {
            return Ok(None);
        }
        let now = self.session.server_time();
        let buffer = &self.session.state().snapshots;
        let current = buffer.current_number();
        let span = i32::try_from(buffer.capacity()).unwrap_or(i32::MAX);
        let buffered = (0..span)
            .filter_map(|i| buffer.retained(current - i))
            .find(|snap| snap.valid && snap.server_time < now)
            .map(|snap| snap.server_time);
        let target = buffered
            .or_else(|| {
                self.checkpoints
                    .latest_matching(|cp| cp.server_time() < now)
                    .map(|(_, cp)| cp.server_time())
            })
            .unwrap_or(self.stats.first_server_time);
        self.seek(target).map(Some)
    }

    /// Advances playback by `msec` of local time.
    ///
    /// Reads messages until the newest snapshot is ahead of the render
    /// clock, hands pending commands to `sink`, then draws. Returns the
    /// produced server time, or `None` once playback has finished.
    pub fn run_frame<S: FrameSink>(&mut self, msec: i32, sink: &mut S) -> ClientResult<Option<i32>> {
        if self.state == PlaybackState::Finished {
            return Ok(None);
        }
        if self.paused {
            sink.draw_frame(&self.session);
            return Ok(Some(self.session.server_time()));
        }

        let Some(server_time) = self.session.frame(msec)? else {
            return Ok(None);
        };
        while server_time >= self.snap_time() {
            if self.read_message()?.is_none() {
                break;
            }
        }
        self.drain_commands(|sequence, text| sink.server_command(sequence, text))?;
        sink.draw_frame(&self.session);
        if self.state == PlaybackState::Finished {
            return Ok(None);
        }
        Ok(Some(server_time))
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use wire::{
        encode_message, write_end_marker, write_frame, GamestateRecord, PlayerState, ServerMessage,
        SnapshotRecord,
    };

    fn recording(snapshots: i32, period: i32) -> Cursor<Vec<u8>> {
        let mut out = Vec::new();
        let gamestate = ServerMessage {
            reliable_ack: 0,
            ops: vec![ServerOp::Gamestate(GamestateRecord {
                command_sequence: 0,
                configstrings: vec![(0, format!("\\sv_fps\\{}", 1000 / period))],
                ..GamestateRecord::default()
            })],
        };
        write_frame(&mut out, 0, &encode_message(&gamestate).unwrap()).unwrap();
        for i in 1..=snapshots {
            let mut ops = vec![ServerOp::Snapshot(SnapshotRecord {
                server_time: 1_000 + i * period,
                delta_num: u8::from(i > 1),
                player: PlayerState {
                    command_time: 1_000 + i * period,
                    ..PlayerState::default()
                },
                ..SnapshotRecord::default()
            })];
            if i % 5 == 0 {
                ops.insert(
                    0,
                    ServerOp::ServerCommand {
                        sequence: i / 5,
                        text: format!("print {i}"),
                    },
                );
            }
            let message = ServerMessage {
                reliable_ack: 0,
                ops,
            };
            write_frame(&mut out, i, &encode_message(&message).unwrap()).unwrap();
        }
        write_end_marker(&mut out).unwrap();
        Cursor::new(out)
    }

    fn config() -> ClientConfig {
        ClientConfig {
            max_rewind_backups: 4,
            rewind_interval: 10,
            ..ClientConfig::for_testing()
        }
    }

    #[derive(Default)]
    struct Recorder {
        commands: Vec<(i32, String)>,
        frames: usize,
    }

    impl FrameSink for Recorder {
        fn server_command(&mut self, sequence: i32, text: &str) {
            self.commands.push((sequence, text.to_string()));
        }

        fn draw_frame(&mut self, _session: &ClientSession) {
            self.frames += 1;
        }
    }

    #[test]
    fn prescan_counts_snapshots() {
        let mut reader = recording(40, 50);
        let stats = prescan(&mut reader, &config()).unwrap();
        assert_eq!(stats.first_server_time, 1_050);
        assert_eq!(stats.last_server_time, 3_000);
        assert_eq!(stats.snapshots, 40);
        assert_eq!(stats.messages, 41);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn open_starts_at_first_snapshot() {
        let player = DemoPlayer::open(recording(40, 50), config()).unwrap();
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.session().server_time(), 1_050);
        assert_eq!(player.session().current_snapshot(), (1, 1_050));
    }

    #[test]
    fn fast_forward_pins_clock() {
        let mut player = DemoPlayer::open(recording(40, 50), config()).unwrap();
        let report = player.fast_forward(2_020).unwrap();
        assert_eq!(report.server_time, 2_020);
        assert_eq!(player.session().server_time(), 2_020);
        assert_eq!(player.session().clock().server_time_delta, 0);
        assert_eq!(player.session().current_snapshot().1, 2_050);
        assert_eq!(report.commands_executed, 4);
    }

    #[test]
    fn rewind_restores_checkpoint() {
        let mut player = DemoPlayer::open(recording(40, 50), config()).unwrap();
        player.fast_forward(2_900).unwrap();
        assert!(!player.checkpoints().is_empty());

        let report = player.seek(2_300).unwrap();
        assert!(report.restored_from.is_some_and(|t| t <= 1_300));
        assert_eq!(player.session().server_time(), 2_300);
        assert_eq!(player.session().current_snapshot().1, 2_300);
    }

    #[test]
    fn seek_twice_is_stable() {
        let mut player = DemoPlayer::open(recording(40, 50), config()).unwrap();
        player.seek(2_525).unwrap();
        let state = player.session().capture();
        let read = player.messages_read();
        let report = player.seek(2_525).unwrap();
        assert_eq!(report.messages_replayed, 0);
        assert_eq!(player.session().capture(), state);
        assert_eq!(player.messages_read(), read);
    }

    #[test]
    fn seek_next_and_prev_step_by_snapshot() {
        let mut player = DemoPlayer::open(recording(40, 50), config()).unwrap();
        player.seek(2_000).unwrap();
        let next = player.seek_next().unwrap().unwrap();
        assert_eq!(next.server_time, 2_050);
        let prev = player.seek_prev().unwrap().unwrap();
        assert_eq!(prev.server_time, 2_000);
    }

    #[test]
    fn run_frame_plays_to_end() {
        let mut player = DemoPlayer::open(recording(40, 50), config()).unwrap();
        let mut sink = Recorder::default();
        let mut last = 0;
        for _ in 0..500 {
            match player.run_frame(16, &mut sink).unwrap() {
                Some(time) => {
                    assert!(time >= last);
                    last = time;
                }
                None => break,
            }
        }
        assert_eq!(player.state(), PlaybackState::Finished);
        assert_eq!(sink.commands.len(), 8);
        assert_eq!(sink.commands[0], (1, "print 5".to_string()));
        assert!(sink.frames > 0);
    }

    #[test]
    fn pause_freezes_clock() {
        let mut player = DemoPlayer::open(recording(40, 50), config()).unwrap();
        player.run_frame(16, &mut ()).unwrap();
        player.pause();
        let frozen = player.session().server_time();
        for _ in 0..10 {
            assert_eq!(player.run_frame(16, &mut ()).unwrap(), Some(frozen));
        }
        player.resume();
        assert!(player.run_frame(16, &mut ()).unwrap().unwrap() > frozen);
    }

    #[test]
    fn empty_recording_has_no_snapshot() {
        let mut out = Vec::new();
        write_end_marker(&mut out).unwrap();
        assert!(matches!(
            DemoPlayer::open(Cursor::new(out), config()),
            Err(ClientError::NoValidSnapshot)
        ));
    }
}
