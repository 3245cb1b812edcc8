//! Wire framing for the two-channel acquisition board
//!
//! Every sample event arrives as a fixed 8-byte frame:
//!
//! ```text
//! [0xC7, 0x7C, seq, ch0_hi, ch0_lo, ch1_hi, ch1_lo, 0x01]
//! ```
//!
//! Channel values are 16-bit, high byte first. A frame is accepted only when
//! both sync bytes and the end marker sit at their offsets; anything else is
//! skipped one byte at a time until the next sync sequence.

use crate::error::{BspError, BspResult};
use serde::{Deserialize, Serialize};

/// First sync byte
pub const SYNC_BYTE_1: u8 = 0xC7;
/// Second sync byte
pub const SYNC_BYTE_2: u8 = 0x7C;
/// End-of-frame marker
pub const END_BYTE: u8 = 0x01;
/// Total frame length in bytes
pub const FRAME_LEN: usize = 8;
/// Channels carried by one frame
pub const FRAME_CHANNELS: usize = 2;

/// One decoded acquisition frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Wrapping 8-bit sequence counter set by the firmware
    pub sequence: u8,
    /// Raw ADC values, one per channel
    pub channels: [u16; FRAME_CHANNELS],
}

impl Frame {
    /// Create a frame from a sequence number and two raw channel values
    pub const fn new(sequence: u8, ch0: u16, ch1: u16) -> Self {
        Self {
            sequence,
            channels: [ch0, ch1],
        }
    }

    /// Parse exactly one frame from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> BspResult<Self> {
        if bytes.len() < FRAME_LEN {
            return Err(BspError::InvalidFrame {
                reason: "fewer than 8 bytes",
            });
        }
        if bytes[0] != SYNC_BYTE_1 || bytes[1] != SYNC_BYTE_2 {
            return Err(BspError::InvalidFrame {
                reason: "sync bytes do not match",
            });
        }
        if bytes[FRAME_LEN - 1] != END_BYTE {
            return Err(BspError::InvalidFrame {
                reason: "end marker does not match",
            });
        }

        Ok(Frame {
            sequence: bytes[2],
            channels: [
                u16::from_be_bytes([bytes[3], bytes[4]]),
                u16::from_be_bytes([bytes[5], bytes[6]]),
            ],
        })
    }

    /// Encode back into the 8-byte wire representation
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let [ch0_hi, ch0_lo] = self.channels[0].to_be_bytes();
        let [ch1_hi, ch1_lo] = self.channels[1].to_be_bytes();
        [
            SYNC_BYTE_1,
            SYNC_BYTE_2,
            self.sequence,
            ch0_hi,
            ch0_lo,
            ch1_hi,
            ch1_lo,
            END_BYTE,
        ]
    }
}

/// Incremental frame decoder for an unaligned byte stream
///
/// Bytes are appended with [`FrameDecoder::push`]; partial frames are kept
/// until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    frames_decoded: u64,
    bytes_discarded: u64,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every complete frame now available
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::with_capacity(self.buffer.len() / FRAME_LEN);
        let mut start = 0;

        while self.buffer.len() - start >= FRAME_LEN {
            match Frame::parse(&self.buffer[start..start + FRAME_LEN]) {
                Ok(frame) => {
                    frames.push(frame);
                    start += FRAME_LEN;
                }
                Err(_) => {
                    // Re-scan from the next byte
                    start += 1;
                    self.bytes_discarded += 1;
                }
            }
        }

        self.buffer.drain(..start);
        self.frames_decoded += frames.len() as u64;
        frames
    }

    /// Number of valid frames produced so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Number of bytes skipped while searching for sync
    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }

    /// Bytes waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes and counters
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frames_decoded = 0;
        self.bytes_discarded = 0;
    }
}

/// Detects gaps in the 8-bit frame sequence counter
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<u8>,
    dropped: u64,
}

impl SequenceTracker {
    /// Create a tracker that has not seen any frame yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sequence number, returning how many frames were skipped before it
    pub fn observe(&mut self, sequence: u8) -> u8 {
        let gap = match self.last {
            Some(last) => sequence.wrapping_sub(last).wrapping_sub(1),
            None => 0,
        };
        self.last = Some(sequence);
        self.dropped += gap as u64;
        gap
    }

    /// Total frames reported missing
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget the previous sequence number and drop count
    pub fn reset(&mut self) {
        self.last = None;
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_high_byte_first() {
        let bytes = [0xC7, 0x7C, 0x05, 0x20, 0x0E, 0x01, 0xF4, 0x01];
        let frame = Frame::parse(&bytes).unwrap();

        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.channels[0], 8206);
        assert_eq!(frame.channels[1], 500);
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn test_parse_rejects_bad_markers() {
        assert!(Frame::parse(&[0xC7, 0x7C, 0, 0, 0, 0, 0]).is_err());
        assert!(Frame::parse(&[0xC7, 0x7D, 0, 0, 0, 0, 0, 0x01]).is_err());
        assert!(Frame::parse(&[0xC7, 0x7C, 0, 0, 0, 0, 0, 0x02]).is_err());
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let frame = Frame::new(1, 1000, 2000).encode();
        let mut decoder = FrameDecoder::new();

        assert!(decoder.push(&frame[..3]).is_empty());
        assert_eq!(decoder.pending(), 3);

        let frames = decoder.push(&frame[3..]);
        assert_eq!(frames, vec![Frame::new(1, 1000, 2000)]);
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.frames_decoded(), 1);
    }

    #[test]
    fn test_decoder_resyncs_after_garbage() {
        let mut stream = vec![0x00, 0xC7, 0xFF];
        stream.extend_from_slice(&Frame::new(7, 1, 2).encode());
        // Sync bytes present but wrong end marker
        stream.extend_from_slice(&[0xC7, 0x7C, 8, 0, 0, 0, 0, 0x00]);
        stream.extend_from_slice(&Frame::new(9, 3, 4).encode());

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&stream);

        assert_eq!(frames, vec![Frame::new(7, 1, 2), Frame::new(9, 3, 4)]);
        assert_eq!(decoder.bytes_discarded(), 3 + 8);
    }

    #[test]
    fn test_sequence_tracker_wraps() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(254), 0);
        assert_eq!(tracker.observe(255), 0);
        assert_eq!(tracker.observe(0), 0);
        assert_eq!(tracker.observe(3), 2);
        assert_eq!(tracker.dropped(), 2);
    }
}
