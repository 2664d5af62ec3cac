//! Receiver protocol implementations
//!
//! Provides frame detectors, decoders and encoders for the three protocols a
//! u-blox receiver multiplexes on one port:
//! - UBX binary messages (sync `B5 62`)
//! - RTCM 3 correction frames (sync `D3`)
//! - NMEA 0183 sentences (`$` or `!`)
//!
//! Detection and decoding are split. A [`FrameDetector`] only decides how many
//! leading bytes of a buffer form one checksum-valid frame. A [`FrameCodec`]
//! receives that exact frame and updates its records.

pub mod checksum;
pub mod nmea;
pub mod reader;
pub mod rtcm3;
pub mod ubx;

use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use checksum::{calculate as calc_checksum, ChecksumType};
pub use nmea::{NmeaCodec, NmeaDetector};
pub use reader::{BitReader, PayloadReader};
pub use rtcm3::{Rtcm3Codec, Rtcm3Detector};
pub use ubx::{UbxCodec, UbxDetector, UbxGenerator};

/// Wire protocols recognised on the receiver port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Protocol {
    Ubx,
    Rtcm3,
    Nmea,
}

impl Protocol {
    /// Get all protocols
    pub fn all() -> &'static [Protocol] {
        &[Protocol::Ubx, Protocol::Rtcm3, Protocol::Nmea]
    }

    /// Get name of protocol
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Ubx => "UBX",
            Protocol::Rtcm3 => "RTCM3",
            Protocol::Nmea => "NMEA",
        }
    }

    /// Frame detector for this protocol
    pub fn detector(&self) -> &'static dyn FrameDetector {
        match self {
            Protocol::Ubx => &UbxDetector,
            Protocol::Rtcm3 => &Rtcm3Detector,
            Protocol::Nmea => &NmeaDetector,
        }
    }

    /// Protocol whose frames start with `lead`, if any
    pub fn from_lead_byte(lead: u8) -> Option<Protocol> {
        SYNC_TABLE
            .iter()
            .find(|(byte, _)| *byte == lead)
            .map(|(_, protocol)| *protocol)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Leading byte to protocol dispatch table
pub const SYNC_TABLE: [(u8, Protocol); 4] = [
    (ubx::SYNC_CHAR_1, Protocol::Ubx),
    (rtcm3::PREAMBLE, Protocol::Rtcm3),
    (b'$', Protocol::Nmea),
    (b'!', Protocol::Nmea),
];

/// Outcome of probing the head of a buffer for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extract {
    /// Not enough bytes yet to decide
    Incomplete,
    /// A complete, checksum-valid frame of this many bytes
    Frame(usize),
    /// A frame of known length whose checksum does not match
    Corrupt(usize),
    /// Text frame delimited but failing validation; wait for more input
    Rejected,
    /// The buffer does not begin with this protocol's sync sequence
    Unsynced,
}

impl Extract {
    /// Length of a valid frame, 0 otherwise
    pub fn frame_len(&self) -> usize {
        match self {
            Extract::Frame(len) => *len,
            _ => 0,
        }
    }
}

/// Decides how many leading bytes of a buffer form one complete frame
pub trait FrameDetector: Send + Sync {
    /// Protocol handled by this detector
    fn protocol(&self) -> Protocol;

    /// Inspect the head of `buf`; never consumes or mutates
    fn try_extract(&self, buf: &[u8]) -> Extract;

    /// Total frame length announced by the header, once it is readable
    fn declared_len(&self, _buf: &[u8]) -> Option<usize> {
        None
    }
}

/// Consumes validated frames of one protocol
pub trait FrameCodec {
    /// Decode one complete frame (sync and checksum included)
    fn decode(&mut self, frame: &[u8]);

    /// Frames seen by this codec
    fn count(&self) -> u64;
}

/// Payload decode errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// A decoded record together with its update count and last update time
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tracked<T> {
    value: T,
    count: u64,
    timestamp: Option<DateTime<Utc>>,
}

impl<T> Tracked<T> {
    /// Replace the record and stamp it
    pub fn update(&mut self, value: T) {
        self.value = value;
        self.count += 1;
        self.timestamp = Some(Utc::now());
    }

    /// Number of successful decodes
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Time of the last successful decode
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Whether this record has ever been populated
    pub fn has_data(&self) -> bool {
        self.count > 0
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Space separated hex preview of a byte slice for log lines
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let shown = &data[..data.len().min(max)];
    let text = shown
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max {
        format!("{} .. ({} bytes)", text, data.len())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_table_dispatch() {
        assert_eq!(Protocol::from_lead_byte(0xB5), Some(Protocol::Ubx));
        assert_eq!(Protocol::from_lead_byte(0xD3), Some(Protocol::Rtcm3));
        assert_eq!(Protocol::from_lead_byte(b'$'), Some(Protocol::Nmea));
        assert_eq!(Protocol::from_lead_byte(b'!'), Some(Protocol::Nmea));
        assert_eq!(Protocol::from_lead_byte(0x00), None);
        assert_eq!(Protocol::from_lead_byte(0x62), None);
    }

    #[test]
    fn test_detector_protocols_match() {
        for protocol in Protocol::all() {
            assert_eq!(protocol.detector().protocol(), *protocol);
        }
    }

    #[test]
    fn test_tracked_update() {
        let mut tracked: Tracked<u32> = Tracked::default();
        assert!(!tracked.has_data());
        assert!(tracked.timestamp().is_none());

        tracked.update(7);
        tracked.update(9);
        assert_eq!(*tracked, 9);
        assert_eq!(tracked.count(), 2);
        assert!(tracked.timestamp().is_some());
    }

    #[test]
    fn test_hex_preview_truncates() {
        assert_eq!(hex_preview(&[0xAB, 0xCD], 8), "ab cd");
        assert_eq!(hex_preview(&[0u8; 10], 2), "00 00 .. (10 bytes)");
    }
}
