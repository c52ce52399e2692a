//! Outbound user commands and per-packet timing records.

use std::num::NonZeroUsize;

use crate::error::{ClientError, ClientResult};
use crate::ring::Ring;

/// One locally generated input command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserCmd {
    /// Server time the command was generated for.
    pub server_time: i32,
    pub buttons: u32,
    pub angles: [i32; 3],
    pub forward_move: i8,
    pub right_move: i8,
    pub up_move: i8,
}

/// Ring of recently generated user commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCmds {
    ring: Ring<UserCmd>,
    current: i32,
}

impl UserCmds {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ring: Ring::new(capacity),
            current: 0,
        }
    }

    /// Number of the most recently generated command.
    #[must_use]
    pub const fn current(&self) -> i32 {
        self.current
    }

    /// Stores a new command and returns its number.
    pub fn push(&mut self, cmd: UserCmd) -> i32 {
        self.current = self.current.wrapping_add(1);
        self.ring.put(self.current, cmd);
        self.current
    }

    /// Returns command `number`, or `None` once it has been overwritten.
    pub fn get(&self, number: i32) -> ClientResult<Option<UserCmd>> {
        if number > self.current {
            return Err(ClientError::UserCmdOutOfRange {
                requested: number,
                current: self.current,
            });
        }
        if number <= self.current.saturating_sub(self.ring.span()) {
            return Ok(None);
        }
        Ok(Some(*self.ring.at(number)))
    }

    /// Drops queued commands without rewinding the command number.
    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

/// Timing of one outgoing packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutPacket {
    /// Local realtime when the packet was sent.
    pub realtime: i32,
    /// Server time of the newest command in the packet.
    pub server_time: i32,
}

/// Ring of outgoing packet timings used for ping estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPackets {
    ring: Ring<OutPacket>,
    outgoing_sequence: i32,
}

impl OutPackets {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ring: Ring::new(capacity),
            outgoing_sequence: 0,
        }
    }

    #[must_use]
    pub const fn outgoing_sequence(&self) -> i32 {
        self.outgoing_sequence
    }

    pub fn record(&mut self, realtime: i32, server_time: i32) {
        self.ring.put(
            self.outgoing_sequence,
            OutPacket {
                realtime,
                server_time,
            },
        );
        self.outgoing_sequence = self.outgoing_sequence.wrapping_add(1);
    }

    /// Round-trip time to the newest packet whose command the server has
    /// executed.
    ///
    /// Walks backwards from the most recent packet; returns `None` if no
    /// recorded packet is covered by `command_time`.
    #[must_use]
    pub fn compute_ping(&self, command_time: i32, realtime: i32) -> Option<i32> {
        let recorded = self.outgoing_sequence.clamp(0, self.ring.span());
        (0..recorded)
            .map(|i| self.ring.at(self.outgoing_sequence - 1 - i))
            .find(|packet| command_time >= packet.server_time)
            .map(|packet| realtime.saturating_sub(packet.realtime))
    }
}
