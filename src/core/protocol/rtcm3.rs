//! RTCM 3 transport layer
//!
//! Frame layout: `D3 | 6 reserved bits + 10-bit length | payload | CRC-24Q`.
//! The message type is the first 12 bits of the payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use super::checksum::crc24q;
use super::reader::BitReader;
use super::{DecodeError, Extract, FrameCodec, FrameDetector, Protocol, Tracked};

pub const PREAMBLE: u8 = 0xD3;
/// Preamble and length
pub const HEADER_LEN: usize = 3;
pub const CRC_LEN: usize = 3;
/// Largest payload the 10-bit length field can express
pub const MAX_PAYLOAD: usize = 0x3FF;

/// Human readable name of common RTCM 3 message types
pub fn message_name(msg_type: u16) -> &'static str {
    match msg_type {
        1005 => "Station ARP",
        1006 => "Station ARP + height",
        1033 => "Receiver and antenna descriptor",
        1074 => "GPS MSM4",
        1077 => "GPS MSM7",
        1084 => "GLONASS MSM4",
        1087 => "GLONASS MSM7",
        1094 => "Galileo MSM4",
        1097 => "Galileo MSM7",
        1124 => "BeiDou MSM4",
        1127 => "BeiDou MSM7",
        1230 => "GLONASS code-phase biases",
        4072 => "u-blox proprietary",
        _ => "",
    }
}

// ============ Frame detection ============

/// Finds complete RTCM 3 frames at the head of a buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct Rtcm3Detector;

impl FrameDetector for Rtcm3Detector {
    fn protocol(&self) -> Protocol {
        Protocol::Rtcm3
    }

    fn try_extract(&self, buf: &[u8]) -> Extract {
        if buf.is_empty() || buf[0] != PREAMBLE {
            return Extract::Unsynced;
        }
        if buf.len() < HEADER_LEN {
            return Extract::Incomplete;
        }

        let payload_len = (((buf[1] as usize) << 8) | buf[2] as usize) & MAX_PAYLOAD;
        let total = payload_len + HEADER_LEN + CRC_LEN;
        if buf.len() < total {
            return Extract::Incomplete;
        }

        if crc24q(&buf[..total]) == 0 {
            Extract::Frame(total)
        } else {
            Extract::Corrupt(total)
        }
    }

    fn declared_len(&self, buf: &[u8]) -> Option<usize> {
        (buf.len() >= HEADER_LEN).then(|| {
            ((((buf[1] as usize) << 8) | buf[2] as usize) & MAX_PAYLOAD) + HEADER_LEN + CRC_LEN
        })
    }
}

// ============ Station coordinates (1005 / 1006) ============

/// Antenna reference point broadcast by a reference station
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StationArp {
    pub msg_type: u16,
    pub station_id: u16,
    pub itrf_year: u8,
    pub gps: bool,
    pub glonass: bool,
    pub galileo: bool,
    pub reference_station: bool,
    pub single_oscillator: bool,
    pub quarter_cycle: u8,
    /// ECEF position of the ARP (m)
    pub ecef_x: f64,
    pub ecef_y: f64,
    pub ecef_z: f64,
    /// Antenna height above the marker (m), 1006 only
    pub antenna_height: Option<f64>,
}

impl StationArp {
    fn decode(bits: &mut BitReader<'_>, msg_type: u16) -> Result<Self, DecodeError> {
        let station_id = bits.read_bits(12)? as u16;
        let itrf_year = bits.read_bits(6)? as u8;
        let gps = bits.read_flag()?;
        let glonass = bits.read_flag()?;
        let galileo = bits.read_flag()?;
        let reference_station = bits.read_flag()?;
        let ecef_x = bits.read_signed(38)? as f64 * 1e-4;
        let single_oscillator = bits.read_flag()?;
        bits.read_bits(1)?;
        let ecef_y = bits.read_signed(38)? as f64 * 1e-4;
        let quarter_cycle = bits.read_bits(2)? as u8;
        let ecef_z = bits.read_signed(38)? as f64 * 1e-4;
        let antenna_height = if msg_type == 1006 {
            Some(bits.read_bits(16)? as f64 * 1e-4)
        } else {
            None
        };

        Ok(Self {
            msg_type,
            station_id,
            itrf_year,
            gps,
            glonass,
            galileo,
            reference_station,
            single_oscillator,
            quarter_cycle,
            ecef_x,
            ecef_y,
            ecef_z,
            antenna_height,
        })
    }
}

impl fmt::Display for StationArp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Station ID: {}", self.station_id)?;
        writeln!(f, "ECEF X: {:>15.4}", self.ecef_x)?;
        writeln!(f, "ECEF Y: {:>15.4}", self.ecef_y)?;
        write!(f, "ECEF Z: {:>15.4}", self.ecef_z)?;
        if let Some(height) = self.antenna_height {
            write!(f, "\nAntenna height: {:.4}", height)?;
        }
        Ok(())
    }
}

// ============ Decoding ============

/// Tallies RTCM 3 frames by message type
#[derive(Debug, Default)]
pub struct Rtcm3Codec {
    count: u64,
    messages: BTreeMap<u16, u64>,
    station: Tracked<StationArp>,
}

impl Rtcm3Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-type frame counts, iterated in ascending type order
    pub fn messages(&self) -> &BTreeMap<u16, u64> {
        &self.messages
    }

    /// Last decoded 1005/1006 station position
    pub fn station(&self) -> &Tracked<StationArp> {
        &self.station
    }

    /// Message type of a complete frame
    pub fn message_type(frame: &[u8]) -> Result<u16, DecodeError> {
        if frame.len() < HEADER_LEN + 2 + CRC_LEN {
            return Err(DecodeError::FrameTooShort(frame.len()));
        }
        Ok(((frame[3] as u16) << 4) | (frame[4] as u16 >> 4))
    }
}

impl FrameCodec for Rtcm3Codec {
    fn decode(&mut self, frame: &[u8]) {
        self.count += 1;

        let msg_type = match Self::message_type(frame) {
            Ok(t) => t,
            Err(e) => {
                warn!("RTCM3 frame without message type: {}", e);
                return;
            }
        };
        *self.messages.entry(msg_type).or_insert(0) += 1;
        debug!("RTCM3 {} {}", msg_type, message_name(msg_type));

        if msg_type == 1005 || msg_type == 1006 {
            let payload = &frame[HEADER_LEN..frame.len() - CRC_LEN];
            let mut bits = BitReader::new(payload);
            let decoded = bits
                .read_bits(12)
                .and_then(|_| StationArp::decode(&mut bits, msg_type));
            match decoded {
                Ok(arp) => self.station.update(arp),
                Err(e) => warn!("failed to decode RTCM3 {}: {}", msg_type, e),
            }
        }
    }

    fn count(&self) -> u64 {
        self.count
    }
}

/// Wrap a payload in an RTCM 3 frame
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(MAX_PAYLOAD);
    let mut frame = Vec::with_capacity(len + HEADER_LEN + CRC_LEN);
    frame.push(PREAMBLE);
    frame.push(((len >> 8) & 0x03) as u8);
    frame.push((len & 0xFF) as u8);
    frame.extend_from_slice(&payload[..len]);
    let crc = crc24q(&frame);
    frame.extend_from_slice(&crc.to_be_bytes()[1..]);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MSB-first bit packer for building test payloads
    struct BitWriter {
        bytes: Vec<u8>,
        bits: usize,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bytes: Vec::new(), bits: 0 }
        }

        fn put(&mut self, value: u64, count: usize) {
            for i in (0..count).rev() {
                if self.bits % 8 == 0 {
                    self.bytes.push(0);
                }
                let bit = ((value >> i) & 1) as u8;
                let last = self.bytes.len() - 1;
                self.bytes[last] |= bit << (7 - self.bits % 8);
                self.bits += 1;
            }
        }

        fn put_signed(&mut self, value: i64, count: usize) {
            self.put((value as u64) & ((1u64 << count) - 1), count);
        }
    }

    fn type_1005(x: i64, y: i64, z: i64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(1005, 12);
        w.put(2003, 12);
        w.put(0, 6);
        w.put(0b1101, 4);
        w.put_signed(x, 38);
        w.put(0, 2);
        w.put_signed(y, 38);
        w.put(0, 2);
        w.put_signed(z, 38);
        w.bytes
    }

    #[test]
    fn test_detect_frame() {
        let frame = encode_frame(&[0x3E, 0xD0, 0x00]);
        assert_eq!(Rtcm3Detector.try_extract(&frame), Extract::Frame(9));
        assert_eq!(Rtcm3Detector.try_extract(&frame[..8]), Extract::Incomplete);
        assert_eq!(Rtcm3Detector.try_extract(&frame[..2]), Extract::Incomplete);
    }

    #[test]
    fn test_detect_bad_crc() {
        let mut frame = encode_frame(&[0x3E, 0xD0, 0x00]);
        frame[4] ^= 0x10;
        assert_eq!(Rtcm3Detector.try_extract(&frame), Extract::Corrupt(9));
    }

    #[test]
    fn test_detect_zero_payload_frame() {
        let frame = encode_frame(&[]);
        assert_eq!(frame.len(), 6);
        assert_eq!(Rtcm3Detector.try_extract(&frame), Extract::Frame(6));
        assert_eq!(Rtcm3Detector.try_extract(&frame[..5]), Extract::Incomplete);
    }

    #[test]
    fn test_length_ignores_reserved_bits() {
        let mut frame = encode_frame(&[0x3E, 0xD0]);
        frame[1] |= 0xFC;
        // CRC now fails but the length is still read from the low 10 bits
        assert_eq!(Rtcm3Detector.try_extract(&frame), Extract::Corrupt(8));
    }

    #[test]
    fn test_tally_by_type() {
        let mut codec = Rtcm3Codec::new();
        codec.decode(&encode_frame(&[0x43, 0x50, 0, 0])); // 1077
        codec.decode(&encode_frame(&[0x43, 0x50, 0, 0]));
        codec.decode(&encode_frame(&[0x4C, 0xE0, 0, 0])); // 1230

        assert_eq!(codec.count(), 3);
        assert_eq!(codec.messages().get(&1077), Some(&2));
        assert_eq!(codec.messages().get(&1230), Some(&1));
        assert_eq!(codec.messages().keys().copied().collect::<Vec<_>>(), vec![1077, 1230]);
    }

    #[test]
    fn test_station_arp_1005() {
        let payload = type_1005(-26_946_854_733, -42_936_423_676, 38_578_789_234);
        assert_eq!(payload.len(), 19);

        let mut codec = Rtcm3Codec::new();
        codec.decode(&encode_frame(&payload));

        let arp = codec.station();
        assert!(arp.has_data());
        assert_eq!(arp.station_id, 2003);
        assert!(arp.gps && arp.glonass && !arp.galileo && arp.reference_station);
        assert!((arp.ecef_x + 2_694_685.4733).abs() < 1e-6);
        assert!((arp.ecef_y + 4_293_642.3676).abs() < 1e-6);
        assert!((arp.ecef_z - 3_857_878.9234).abs() < 1e-6);
        assert_eq!(arp.antenna_height, None);
    }

    #[test]
    fn test_empty_payload_counts_without_type() {
        let mut codec = Rtcm3Codec::new();
        codec.decode(&encode_frame(&[]));
        assert_eq!(codec.count(), 1);
        assert!(codec.messages().is_empty());
    }
}
