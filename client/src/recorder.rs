//! Demo recording.

use std::io::Write;

use tracing::debug;
use wire::{encode_message, write_end_marker, write_frame, GamestateRecord, ServerMessage, ServerOp};

use crate::error::ClientResult;
use crate::session::{ClientSession, MessageSummary};

/// Writes received server messages as a framed recording.
///
/// The recording opens with a gamestate rebuilt from the session, so it
/// can start mid-connection. Delta snapshots before the first full one are
/// skipped since their bases are not in the file.
#[derive(Debug)]
pub struct DemoRecorder<W: Write> {
    writer: W,
    waiting: bool,
    frames: u64,
}

impl<W: Write> DemoRecorder<W> {
    /// Starts a recording from the current session state.
    pub fn start(mut writer: W, session: &ClientSession) -> ClientResult<Self> {
        let state = session.state();
        let record = GamestateRecord {
            command_sequence: state.commands.sequence(),
            configstrings: state
                .gamestate
                .configstrings()
                .filter_map(|(index, value)| Some((u16::try_from(index).ok()?, value.to_owned())))
                .collect(),
            baselines: state.gamestate.baselines().copied().collect(),
            client_num: state.client_num,
            checksum_feed: state.checksum_feed,
        };
        let message = ServerMessage {
            reliable_ack: state.reliable_acknowledge,
            ops: vec![ServerOp::Gamestate(record)],
        };
        // The gamestate precedes the next message the server sends.
        let sequence = state.server_message_sequence.wrapping_sub(1);
        write_frame(&mut writer, sequence, &encode_message(&message)?)?;
        debug!(sequence, "demo recording started");
        Ok(Self {
            writer,
            waiting: true,
            frames: 1,
        })
    }

    /// Records one received message. Returns `false` while still waiting
    /// for a full snapshot.
    pub fn record(&mut self, sequence: i32, payload: &[u8], summary: &MessageSummary) -> ClientResult<bool> {
        if self.waiting {
            if !summary.full_snapshot {
                return Ok(false);
            }
            self.waiting = false;
            debug!(sequence, "recording first full snapshot");
        }
        write_frame(&mut self.writer, sequence, payload)?;
        self.frames += 1;
        Ok(true)
    }

    /// Frames written, including the gamestate.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Writes the end marker and returns the writer.
    pub fn finish(mut self) -> ClientResult<W> {
        write_end_marker(&mut self.writer)?;
        self.writer.flush()?;
        debug!(frames = self.frames, "demo recording finished");
        Ok(self.writer)
    }
}
