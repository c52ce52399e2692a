//! Demo file framing.
//!
//! A recorded session is a flat sequence of frames:
//!
//! ```text
//! [sequence: i32 LE][length: i32 LE][payload: length bytes]
//! ```
//!
//! A length of `-1` marks the end of the recording.

use std::io::{self, Read, Write};

use crate::error::FrameError;
use crate::limits::Limits;

/// Size of a frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Frame length that terminates a recording.
pub const END_MARKER: i32 = -1;

/// One recorded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoFrame {
    /// Server message sequence number.
    pub sequence: i32,
    pub payload: Vec<u8>,
}

/// Reads the next frame.
///
/// Returns `Ok(None)` at a clean end of file or at the end marker.
pub fn read_frame<R: Read>(reader: &mut R, limits: &Limits) -> Result<Option<DemoFrame>, FrameError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < FRAME_HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: FRAME_HEADER_SIZE,
            actual: got,
        });
    }

    let sequence = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len == END_MARKER {
        return Ok(None);
    }
    let len = usize::try_from(len).map_err(|_| FrameError::NegativeLength { len })?;
    if len > limits.max_msg_len {
        return Err(FrameError::TooLarge {
            len,
            max: limits.max_msg_len,
        });
    }

    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload)?;
    if got < len {
        return Err(FrameError::Truncated {
            expected: len,
            actual: got,
        });
    }
    Ok(Some(DemoFrame { sequence, payload }))
}

/// Writes one frame.
pub fn write_frame<W: Write>(writer: &mut W, sequence: i32, payload: &[u8]) -> Result<(), FrameError> {
    let len = i32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: i32::MAX as usize,
    })?;
    writer.write_all(&sequence.to_le_bytes())?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Writes the end-of-recording marker.
pub fn write_end_marker<W: Write>(writer: &mut W) -> Result<(), FrameError> {
    writer.write_all(&END_MARKER.to_le_bytes())?;
    writer.write_all(&END_MARKER.to_le_bytes())?;
    Ok(())
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_read_back_in_order() {
        let mut out = Vec::new();
        write_frame(&mut out, 10, b"abc").unwrap();
        write_frame(&mut out, 11, b"").unwrap();
        write_end_marker(&mut out).unwrap();

        let mut cursor = Cursor::new(out);
        let limits = Limits::default();
        let first = read_frame(&mut cursor, &limits).unwrap().unwrap();
        assert_eq!(first.sequence, 10);
        assert_eq!(first.payload, b"abc");
        let second = read_frame(&mut cursor, &limits).unwrap().unwrap();
        assert_eq!(second.sequence, 11);
        assert!(second.payload.is_empty());
        assert!(read_frame(&mut cursor, &limits).unwrap().is_none());
    }

    #[test]
    fn clean_eof_is_end_of_stream() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor, &Limits::default()).unwrap().is_none());
    }

    #[test]
    fn short_header_is_truncated() {
        let mut cursor = Cursor::new(vec![1, 0, 0]);
        let err = read_frame(&mut cursor, &Limits::default()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[test]
    fn short_payload_is_truncated() {
        let mut out = Vec::new();
        write_frame(&mut out, 1, b"abcdef").unwrap();
        out.truncate(out.len() - 2);
        let err = read_frame(&mut Cursor::new(out), &Limits::default()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 6,
                actual: 4
            }
        ));
    }

    #[test]
    fn oversized_frame_rejected() {
        let limits = Limits::for_testing();
        let mut out = Vec::new();
        write_frame(&mut out, 1, &vec![0u8; limits.max_msg_len + 1]).unwrap();
        let err = read_frame(&mut Cursor::new(out), &limits).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }

    #[test]
    fn negative_length_rejected() {
        let mut out = Vec::new();
        out.extend_from_slice(&1i32.to_le_bytes());
        out.extend_from_slice(&(-5i32).to_le_bytes());
        let err = read_frame(&mut Cursor::new(out), &Limits::default()).unwrap_err();
        assert!(matches!(err, FrameError::NegativeLength { len: -5 }));
    }
}
