//! Decoded server message model and demo framing for snapsync.
//!
//! This crate owns the byte layout of server messages and recorded sessions.
//! It knows what a snapshot or a reliable command looks like but nothing
//! about how the client consumes them.
//!
//! # Design Principles
//!
//! - **Bounded decoding** - Every length field is validated against [`Limits`] before allocation.
//! - **Closed record set** - Unknown opcodes are a hard decode error, never skipped.
//! - **No session state** - Snapshot ring buffers and clocks live in the client crate.

mod error;
mod frame;
mod limits;
mod message;
mod msg;

pub use error::{DecodeError, EncodeError, FrameError, LimitKind, WireResult};
pub use frame::{
    read_frame, write_end_marker, write_frame, DemoFrame, END_MARKER, FRAME_HEADER_SIZE,
};
pub use limits::Limits;
pub use message::{
    decode_message, encode_message, EntityChange, EntityState, EntityUpdate, GamestateRecord,
    PlayerState, ServerMessage, ServerOp, SnapshotRecord, ENTITY_NUM_NONE, MAX_GENTITIES,
    SVC_BASELINE, SVC_CONFIGSTRING, SVC_DOWNLOAD, SVC_EOF, SVC_GAMESTATE, SVC_NOP,
    SVC_SERVER_COMMAND, SVC_SNAPSHOT,
};
pub use msg::{MsgReader, MsgWriter};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_exports() {
        let _ = Limits::default();
        let _ = FRAME_HEADER_SIZE;
        let _ = ServerMessage::default();
        let _ = MsgWriter::new();
        let _: WireResult<()> = Ok(());
    }

    #[test]
    fn opcodes_are_distinct() {
        let ops = [
            SVC_NOP,
            SVC_GAMESTATE,
            SVC_CONFIGSTRING,
            SVC_BASELINE,
            SVC_SERVER_COMMAND,
            SVC_DOWNLOAD,
            SVC_SNAPSHOT,
            SVC_EOF,
        ];
        for (i, a) in ops.iter().enumerate() {
            for b in &ops[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn entity_terminator_is_last_number() {
        assert_eq!(ENTITY_NUM_NONE, MAX_GENTITIES - 1);
    }
}
