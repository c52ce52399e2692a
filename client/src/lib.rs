//! Client-side snapshot synchronization and demo time travel for snapsync.
//!
//! This crate consumes decoded server messages from `snapsync-wire` and
//! decides which snapshot is current, how far the render clock advances
//! each frame, and which reliable commands the game module sees next. In
//! playback it adds random-access seeking over a forward-only recording.
//!
//! # Features
//!
//! - Snapshot and parsed-entity ring buffers with delta-base validation
//! - Clock drift control with an LCM-based safe increment threshold
//! - Ordered reliable command delivery with directive interception
//! - Demo fast-forward, rewind and seeking through rewind checkpoints
//! - Demo recording
//!
//! # Design Principles
//!
//! - **One owned session** - All mutable state lives in [`SessionState`], so a checkpoint is a clone.
//! - **Unavailable is not an error** - Aged-out snapshots return `None`; errors end the session.
//! - **Single-threaded** - Everything runs inside the caller's frame.

mod checkpoint;
mod clock;
mod commands;
mod config;
mod demo;
mod entities;
mod error;
mod gamestate;
mod outgoing;
mod recorder;
mod ring;
mod session;
mod snapshot;
mod types;

pub use checkpoint::{should_capture, Checkpoint, CheckpointError, CheckpointRing};
pub use clock::{compute_safe_increment_threshold, CadenceEstimator, ClockState, DriftAdjustment};
pub use commands::{
    classify, tokenize, CommandAction, Directive, ReliableCommands, BIG_INFO_STRING, DIRECTIVES,
};
pub use config::{BufferLimits, ClientConfig, MAX_REWIND_BACKUPS};
pub use demo::{
    prescan, DemoPlayer, DemoStats, FrameSink, PlaybackState, SeekReport, REWIND_MARGIN_MS,
};
pub use entities::ParseEntities;
pub use error::{ClientError, ClientResult};
pub use gamestate::{info_value, GameState, MAX_CONFIGSTRINGS, MAX_GAMESTATE_CHARS};
pub use outgoing::{OutPacket, OutPackets, UserCmd, UserCmds};
pub use recorder::DemoRecorder;
pub use ring::Ring;
pub use session::{ClientSession, MessageSummary, ServerCommand, SessionMode, SessionState};
pub use snapshot::{ClSnapshot, DeltaRejection, SnapshotBuffer, SnapshotView, WriteOutcome};
pub use types::{
    ConnectionState, SnapFlags, CMD_BACKUP, CS_SERVERINFO, MAX_ENTITIES_IN_SNAPSHOT,
    MAX_PARSE_ENTITIES, MAX_RELIABLE_COMMANDS, PACKET_BACKUP, PING_UNKNOWN,
};
pub use wire::Limits as WireLimits;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults_come_from_exported_limits() {
        let session = ClientSession::new(ClientConfig::default(), SessionMode::Live);
        assert_eq!(session.limits(), &WireLimits::default());
        assert_eq!(session.config(), &ClientConfig::default().clamped());
        assert_eq!(
            session.state().snapshots.capacity(),
            BufferLimits::default().snapshot_backup.get()
        );
    }

    #[test]
    fn default_buffers_match_protocol() {
        let limits = BufferLimits::default();
        assert_eq!(limits.snapshot_backup.get(), PACKET_BACKUP);
        assert_eq!(limits.parse_entities.get(), MAX_PARSE_ENTITIES);
        assert_eq!(limits.entities_in_snapshot, MAX_ENTITIES_IN_SNAPSHOT);
        assert_eq!(limits.reliable_commands.get(), MAX_RELIABLE_COMMANDS);
        assert_eq!(limits.cmd_backup.get(), CMD_BACKUP);
    }

    #[test]
    fn fresh_session_is_connected() {
        let session = ClientSession::new(ClientConfig::default(), SessionMode::Live);
        assert_eq!(session.connection(), ConnectionState::Connected);
        assert!(!session.has_valid_snapshot());
        assert!(matches!(
            session.snapshot(1),
            Err(ClientError::SnapshotOutOfRange { .. })
        ));
    }
}
