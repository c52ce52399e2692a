//! Error types for message decoding and demo framing.

use std::fmt;
use std::io;

/// Result type for message decoding.
pub type WireResult<T> = Result<T, DecodeError>;

/// Errors raised while decoding a server message.
///
/// Every variant is fatal for the session that produced the message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Attempted to read past the end of the message.
    UnexpectedEnd { needed: usize, available: usize },

    /// A varint ran longer than five bytes.
    InvalidVarint,

    /// Unknown top-level record type.
    IllegibleOp { op: u8 },

    /// Unknown record type inside a gamestate block.
    IllegibleGamestateOp { op: u8 },

    /// The message payload is larger than the configured maximum.
    MessageTooLarge { len: usize, max: usize },

    /// Limits exceeded.
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },

    /// Entity number outside the addressable range.
    EntityNumber { number: u16 },

    /// Entity numbers in a snapshot were not strictly ascending.
    EntityOrder { previous: u16, number: u16 },

    /// A string field was not valid UTF-8.
    InvalidUtf8,
}

/// Specific decode limits that can be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    AreamaskBytes,
    ConfigstringIndex,
    StringLength,
    EntityCount,
    DownloadBlock,
}

/// Errors that can occur during encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Entity number outside the addressable range.
    EntityNumber { number: u16 },

    /// Entity numbers were not strictly ascending.
    EntityOrder { previous: u16, number: u16 },

    /// A variable-length field is too large for its length prefix.
    FieldTooLarge { field: &'static str, len: usize },
}

/// Errors raised while reading or writing demo frames.
#[derive(Debug)]
pub enum FrameError {
    /// Underlying I/O failure.
    Io(io::Error),

    /// Frame length exceeds the maximum message size.
    TooLarge { len: usize, max: usize },

    /// Negative frame length other than the end marker.
    NegativeLength { len: i32 },

    /// The stream ended in the middle of a frame.
    Truncated { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd { needed, available } => {
                write!(
                    f,
                    "read past end of server message: need {needed} bytes, have {available}"
                )
            }
            Self::InvalidVarint => write!(f, "invalid varint"),
            Self::IllegibleOp { op } => write!(f, "illegible server message: op {op}"),
            Self::IllegibleGamestateOp { op } => {
                write!(f, "bad command byte in gamestate: {op}")
            }
            Self::MessageTooLarge { len, max } => {
                write!(f, "server message too large: {len} > {max}")
            }
            Self::LimitsExceeded {
                kind,
                limit,
                actual,
            } => {
                write!(f, "{kind} limit exceeded: {actual} > {limit}")
            }
            Self::EntityNumber { number } => write!(f, "bad entity number: {number}"),
            Self::EntityOrder { previous, number } => {
                write!(f, "entity {number} follows {previous} out of order")
            }
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AreamaskBytes => "areamask bytes",
            Self::ConfigstringIndex => "configstring index",
            Self::StringLength => "string length",
            Self::EntityCount => "entity count",
            Self::DownloadBlock => "download block",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityNumber { number } => write!(f, "bad entity number: {number}"),
            Self::EntityOrder { previous, number } => {
                write!(f, "entity {number} follows {previous} out of order")
            }
            Self::FieldTooLarge { field, len } => {
                write!(f, "{field} too large: {len}")
            }
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "demo i/o error: {err}"),
            Self::TooLarge { len, max } => {
                write!(f, "demo message length {len} exceeds {max}")
            }
            Self::NegativeLength { len } => write!(f, "negative demo message length: {len}"),
            Self::Truncated { expected, actual } => {
                write!(
                    f,
                    "demo file was truncated: expected {expected} bytes, got {actual}"
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl std::error::Error for EncodeError {}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
