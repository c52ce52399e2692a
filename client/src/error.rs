//! Error types for the client session.

use std::fmt;
use std::io;

use wire::{DecodeError, EncodeError, FrameError};

/// Result type for client session operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Session-ending errors.
///
/// Recoverable conditions (an evicted snapshot, an entity span that fell out
/// of the parse ring) are reported as `None` by the accessors and never
/// surface here.
#[derive(Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// A server message could not be decoded.
    Wire(DecodeError),

    /// A server message could not be encoded for recording.
    Encode(EncodeError),

    /// A recorded session could not be read or written.
    Frame(FrameError),

    /// Requested a snapshot newer than anything received.
    SnapshotOutOfRange { requested: i32, current: i32 },

    /// Requested a reliable command older than the retained window.
    CommandCycled { requested: i32, oldest: i32 },

    /// Requested a reliable command that has not arrived yet.
    CommandNotReceived { requested: i32, latest: i32 },

    /// Requested an outbound command newer than the last one generated.
    UserCmdOutOfRange { requested: i32, current: i32 },

    /// The server told us to go away.
    ServerDisconnected { reason: Option<String> },

    /// Snapshot server time went backwards during live play.
    ServerTimeRegressed { snapshot_time: i32, previous: i32 },

    /// Configstring index outside the table.
    ConfigstringIndex { index: usize, max: usize },

    /// The configstring table outgrew its character budget.
    ConfigstringOverflow { total: usize, max: usize },

    /// An accumulated big configstring outgrew its buffer.
    BigConfigstringOverflow { len: usize, max: usize },

    /// Time was advanced while no valid snapshot is current.
    NoValidSnapshot,

    /// Stream positioning failed.
    Io(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(err) => write!(f, "wire error: {err}"),
            Self::Encode(err) => write!(f, "encode error: {err}"),
            Self::Frame(err) => write!(f, "demo error: {err}"),
            Self::SnapshotOutOfRange { requested, current } => {
                write!(f, "snapshot {requested} requested but current is {current}")
            }
            Self::CommandCycled { requested, oldest } => {
                write!(
                    f,
                    "reliable command {requested} was cycled out (oldest retained {oldest})"
                )
            }
            Self::CommandNotReceived { requested, latest } => {
                write!(
                    f,
                    "requested reliable command {requested} not received (latest {latest})"
                )
            }
            Self::UserCmdOutOfRange { requested, current } => {
                write!(f, "user command {requested} >= {current}")
            }
            Self::ServerDisconnected { reason } => match reason {
                Some(reason) => write!(f, "server disconnected: {reason}"),
                None => write!(f, "server disconnected"),
            },
            Self::ServerTimeRegressed {
                snapshot_time,
                previous,
            } => {
                write!(
                    f,
                    "snapshot server time {snapshot_time} is before previous frame {previous}"
                )
            }
            Self::ConfigstringIndex { index, max } => {
                write!(f, "configstring {index} >= {max}")
            }
            Self::ConfigstringOverflow { total, max } => {
                write!(f, "configstrings exceed {max} chars ({total})")
            }
            Self::BigConfigstringOverflow { len, max } => {
                write!(f, "big configstring exceeded {max} chars ({len})")
            }
            Self::NoValidSnapshot => write!(f, "no valid snapshot"),
            Self::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wire(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::Frame(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for ClientError {
    fn from(err: DecodeError) -> Self {
        Self::Wire(err)
    }
}

impl From<EncodeError> for ClientError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        Self::Frame(err)
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_out_of_range() {
        let err = ClientError::SnapshotOutOfRange {
            requested: 40,
            current: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("40"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn display_disconnect_reason() {
        let err = ClientError::ServerDisconnected {
            reason: Some("kicked".to_string()),
        };
        assert_eq!(err.to_string(), "server disconnected: kicked");
    }

    #[test]
    fn wire_errors_convert() {
        let err: ClientError = DecodeError::IllegibleOp { op: 99 }.into();
        assert!(matches!(err, ClientError::Wire(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
