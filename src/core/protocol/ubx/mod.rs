//! UBX binary protocol
//!
//! Frame layout: `B5 62 | class | id | len (u16 LE) | payload | CK_A CK_B`.
//! The checksum covers class, id, length and payload.

pub mod generator;
pub mod messages;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::checksum::ubx_checksum;
use super::reader::PayloadReader;
use super::{DecodeError, Extract, FrameCodec, FrameDetector, Protocol, Tracked};

pub use generator::{PortRates, ResetMode, ResetType, UbxGenerator};
pub use messages::{
    AckAck, AckNak, CfgMsg, CfgPrt, CfgTmode3, MonHw, MonVer, NavPvt, NavSvin, RawMeasurement,
    RxmRawx, UbxMessage,
};

pub const SYNC_CHAR_1: u8 = 0xB5;
pub const SYNC_CHAR_2: u8 = 0x62;

/// Sync, class, id and length
pub const HEADER_LEN: usize = 6;
/// Header plus the two checksum bytes
pub const FRAME_OVERHEAD: usize = HEADER_LEN + 2;

/// Message classes
pub mod class {
    pub const NAV: u8 = 0x01;
    pub const RXM: u8 = 0x02;
    pub const INF: u8 = 0x04;
    pub const ACK: u8 = 0x05;
    pub const CFG: u8 = 0x06;
    pub const UPD: u8 = 0x09;
    pub const MON: u8 = 0x0A;
    pub const TIM: u8 = 0x0D;
    pub const NMEA_STD: u8 = 0xF0;
    pub const NMEA_PUBX: u8 = 0xF1;
    pub const RTCM3: u8 = 0xF5;
}

/// NAV message ids
pub mod nav {
    pub const PVT: u8 = 0x07;
    pub const VELNED: u8 = 0x12;
    pub const SAT: u8 = 0x35;
    pub const SVIN: u8 = 0x3B;
}

/// RXM message ids
pub mod rxm {
    pub const SFRBX: u8 = 0x13;
    pub const RAWX: u8 = 0x15;
}

/// ACK message ids
pub mod ack {
    pub const NAK: u8 = 0x00;
    pub const ACK: u8 = 0x01;
}

/// CFG message ids
pub mod cfg {
    pub const PRT: u8 = 0x00;
    pub const MSG: u8 = 0x01;
    pub const RST: u8 = 0x04;
    pub const RATE: u8 = 0x08;
    pub const CFG: u8 = 0x09;
    pub const NAV5: u8 = 0x24;
    pub const TMODE3: u8 = 0x71;
}

/// MON message ids
pub mod mon {
    pub const VER: u8 = 0x04;
    pub const HW: u8 = 0x09;
}

/// Standard NMEA sentence ids (class 0xF0) for CFG-MSG
pub mod nmea_std {
    pub const GGA: u8 = 0x00;
    pub const GLL: u8 = 0x01;
    pub const GSA: u8 = 0x02;
    pub const GSV: u8 = 0x03;
    pub const RMC: u8 = 0x04;
    pub const VTG: u8 = 0x05;
    pub const GRS: u8 = 0x06;
    pub const GST: u8 = 0x07;
    pub const ZDA: u8 = 0x08;
    pub const GBS: u8 = 0x09;
    pub const DTM: u8 = 0x0A;
    pub const GNS: u8 = 0x0D;
    pub const VLW: u8 = 0x0F;

    /// All standard sentences in output order
    pub const ALL: [u8; 13] = [GGA, GLL, GSA, GSV, RMC, VTG, GRS, GST, ZDA, GBS, DTM, GNS, VLW];
}

/// RTCM 3 output ids (class 0xF5) for CFG-MSG
pub mod rtcm {
    pub const TYPE1005: u8 = 0x05;
    pub const TYPE1074: u8 = 0x4A;
    pub const TYPE1077: u8 = 0x4D;
    pub const TYPE1084: u8 = 0x54;
    pub const TYPE1087: u8 = 0x57;
    pub const TYPE1094: u8 = 0x5E;
    pub const TYPE1097: u8 = 0x61;
    pub const TYPE1124: u8 = 0x7C;
    pub const TYPE1127: u8 = 0x7F;
    pub const TYPE1230: u8 = 0xE6;

    /// MSM4 observation messages (GPS, GLONASS, Galileo, BeiDou)
    pub const MSM4: [u8; 4] = [TYPE1074, TYPE1084, TYPE1094, TYPE1124];
    /// MSM7 observation messages (GPS, GLONASS, Galileo, BeiDou)
    pub const MSM7: [u8; 4] = [TYPE1077, TYPE1087, TYPE1097, TYPE1127];
}

/// Protocol mask bits for CFG-PRT inProtoMask / outProtoMask
pub mod proto_mask {
    pub const UBX: u16 = 0x01;
    pub const NMEA: u16 = 0x02;
    pub const RTCM2: u16 = 0x04;
    pub const RTCM3: u16 = 0x20;
}

/// Receiver I/O ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortId {
    I2c = 0,
    #[default]
    Uart1 = 1,
    Uart2 = 2,
    Usb = 3,
    Spi = 4,
}

impl PortId {
    pub fn all() -> &'static [PortId] {
        &[PortId::I2c, PortId::Uart1, PortId::Uart2, PortId::Usb, PortId::Spi]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PortId::I2c => "I2C",
            PortId::Uart1 => "UART1",
            PortId::Uart2 => "UART2",
            PortId::Usb => "USB",
            PortId::Spi => "SPI",
        }
    }

    pub fn from_u8(value: u8) -> Option<PortId> {
        Self::all().get(value as usize).copied()
    }
}

/// GNSS identifier letters, indexed by gnssId
pub const GNSS_ID: [&str; 8] = ["G", "S", "E", "B", "I", "Q", "R", "N"];

/// Signal names per gnssId, indexed by sigId
pub const SIGNAL_NAMES: [&[&str]; 8] = [
    &["L1C/A", "", "", "L2CL", "L2CM", "", "L5I", "L5Q"],
    &["L1C/A"],
    &["E1C", "E1B", "", "E5aI", "E5aQ", "E5bI", "E5bQ"],
    &["B1ID1", "B1ID2", "B2ID1", "B2ID2", "", "B1Cp", "B1Cd", "B2ap", "B2ad"],
    &[""],
    &["L1C/A", "L1S", "", "", "L2CM", "L2CL", "", "", "L5I", "L5Q"],
    &["L1OF", "", "L2OF"],
    &["L5A"],
];

/// GNSS letter for a gnssId, `?` when out of range
pub fn gnss_letter(gnss_id: u8) -> &'static str {
    GNSS_ID.get(gnss_id as usize).copied().unwrap_or("?")
}

/// Signal name for a (gnssId, sigId) pair, empty when unknown
pub fn signal_name(gnss_id: u8, sig_id: u8) -> &'static str {
    SIGNAL_NAMES
        .get(gnss_id as usize)
        .and_then(|sigs| sigs.get(sig_id as usize))
        .copied()
        .unwrap_or("")
}

/// Short name of a UBX message, empty when not known
pub fn message_name(msg_class: u8, msg_id: u8) -> &'static str {
    match (msg_class, msg_id) {
        (class::NAV, nav::PVT) => "NAV-PVT",
        (class::NAV, nav::VELNED) => "NAV-VELNED",
        (class::NAV, nav::SAT) => "NAV-SAT",
        (class::NAV, nav::SVIN) => "NAV-SVIN",
        (class::RXM, rxm::RAWX) => "RXM-RAWX",
        (class::RXM, rxm::SFRBX) => "RXM-SFRBX",
        (class::ACK, ack::ACK) => "ACK-ACK",
        (class::ACK, ack::NAK) => "ACK-NAK",
        (class::CFG, cfg::PRT) => "CFG-PRT",
        (class::CFG, cfg::MSG) => "CFG-MSG",
        (class::CFG, cfg::RST) => "CFG-RST",
        (class::CFG, cfg::RATE) => "CFG-RATE",
        (class::CFG, cfg::CFG) => "CFG-CFG",
        (class::CFG, cfg::NAV5) => "CFG-NAV5",
        (class::CFG, cfg::TMODE3) => "CFG-TMODE3",
        (class::MON, mon::VER) => "MON-VER",
        (class::MON, mon::HW) => "MON-HW",
        _ => "",
    }
}

// ============ Frame detection ============

/// Finds complete UBX frames at the head of a buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct UbxDetector;

impl FrameDetector for UbxDetector {
    fn protocol(&self) -> Protocol {
        Protocol::Ubx
    }

    fn try_extract(&self, buf: &[u8]) -> Extract {
        if buf.is_empty() || buf[0] != SYNC_CHAR_1 {
            return Extract::Unsynced;
        }
        if buf.len() < 2 {
            return Extract::Incomplete;
        }
        if buf[1] != SYNC_CHAR_2 {
            return Extract::Unsynced;
        }
        if buf.len() < FRAME_OVERHEAD {
            return Extract::Incomplete;
        }

        let payload_len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let total = payload_len + FRAME_OVERHEAD;
        if buf.len() < total {
            return Extract::Incomplete;
        }

        let expected = ubx_checksum(&buf[2..total - 2]);
        if buf[total - 2..total] == expected {
            Extract::Frame(total)
        } else {
            Extract::Corrupt(total)
        }
    }

    fn declared_len(&self, buf: &[u8]) -> Option<usize> {
        (buf.len() >= HEADER_LEN)
            .then(|| u16::from_le_bytes([buf[4], buf[5]]) as usize + FRAME_OVERHEAD)
    }
}

// ============ Decoding ============

/// Decodes UBX frames into typed records
#[derive(Debug, Default)]
pub struct UbxCodec {
    count: u64,
    nav_pvt: Tracked<NavPvt>,
    nav_svin: Tracked<NavSvin>,
    cfg_tmode3: Tracked<CfgTmode3>,
    cfg_prt: Tracked<CfgPrt>,
    cfg_msg: Tracked<CfgMsg>,
    mon_ver: Tracked<MonVer>,
    mon_hw: Tracked<MonHw>,
    rxm_rawx: Tracked<RxmRawx>,
    ack_ack: Tracked<AckAck>,
    ack_nak: Tracked<AckNak>,
    unhandled: BTreeMap<u16, u64>,
}

fn apply<T: UbxMessage>(slot: &mut Tracked<T>, payload: &[u8]) -> Result<(), DecodeError> {
    let mut reader = PayloadReader::new(payload);
    let value = T::decode(&mut reader)?;
    slot.update(value);
    Ok(())
}

impl UbxCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nav_pvt(&self) -> &Tracked<NavPvt> {
        &self.nav_pvt
    }

    pub fn nav_svin(&self) -> &Tracked<NavSvin> {
        &self.nav_svin
    }

    pub fn cfg_tmode3(&self) -> &Tracked<CfgTmode3> {
        &self.cfg_tmode3
    }

    pub fn cfg_prt(&self) -> &Tracked<CfgPrt> {
        &self.cfg_prt
    }

    pub fn cfg_msg(&self) -> &Tracked<CfgMsg> {
        &self.cfg_msg
    }

    pub fn mon_ver(&self) -> &Tracked<MonVer> {
        &self.mon_ver
    }

    pub fn mon_hw(&self) -> &Tracked<MonHw> {
        &self.mon_hw
    }

    pub fn rxm_rawx(&self) -> &Tracked<RxmRawx> {
        &self.rxm_rawx
    }

    pub fn ack_ack(&self) -> &Tracked<AckAck> {
        &self.ack_ack
    }

    pub fn ack_nak(&self) -> &Tracked<AckNak> {
        &self.ack_nak
    }

    /// Counts of frames without a typed record, keyed by `(class << 8) | id`
    pub fn unhandled(&self) -> &BTreeMap<u16, u64> {
        &self.unhandled
    }

    fn dispatch(&mut self, class: u8, id: u8, payload: &[u8]) -> Result<(), DecodeError> {
        match (class, id) {
            (class::NAV, nav::PVT) => apply(&mut self.nav_pvt, payload),
            (class::NAV, nav::SVIN) => apply(&mut self.nav_svin, payload),
            (class::CFG, cfg::TMODE3) => apply(&mut self.cfg_tmode3, payload),
            (class::CFG, cfg::PRT) => apply(&mut self.cfg_prt, payload),
            (class::CFG, cfg::MSG) => apply(&mut self.cfg_msg, payload),
            (class::MON, mon::VER) => apply(&mut self.mon_ver, payload),
            (class::MON, mon::HW) => apply(&mut self.mon_hw, payload),
            (class::RXM, rxm::RAWX) => apply(&mut self.rxm_rawx, payload),
            (class::ACK, ack::ACK) => apply(&mut self.ack_ack, payload),
            (class::ACK, ack::NAK) => {
                apply(&mut self.ack_nak, payload)?;
                warn!(
                    "receiver rejected UBX 0x{:02x} 0x{:02x}",
                    self.ack_nak.class_id, self.ack_nak.msg_id
                );
                Ok(())
            }
            _ => {
                debug!("unhandled UBX 0x{:02x} 0x{:02x}", class, id);
                *self
                    .unhandled
                    .entry(((class as u16) << 8) | id as u16)
                    .or_insert(0) += 1;
                Ok(())
            }
        }
    }
}

impl FrameCodec for UbxCodec {
    fn decode(&mut self, frame: &[u8]) {
        self.count += 1;
        if frame.len() < FRAME_OVERHEAD {
            warn!("{}", DecodeError::FrameTooShort(frame.len()));
            return;
        }

        let class = frame[2];
        let id = frame[3];
        let payload = &frame[HEADER_LEN..frame.len() - 2];
        if let Err(e) = self.dispatch(class, id, payload) {
            warn!("failed to decode UBX 0x{:02x} 0x{:02x}: {}", class, id, e);
        }
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
        UbxGenerator::new().generate_message(class, id, payload).to_vec()
    }

    #[test]
    fn test_detect_complete_frame() {
        let msg = frame(class::CFG, cfg::PRT, &[0x03]);
        assert_eq!(UbxDetector.try_extract(&msg), Extract::Frame(9));

        let mut with_tail = msg.clone();
        with_tail.extend_from_slice(b"$GP");
        assert_eq!(UbxDetector.try_extract(&with_tail), Extract::Frame(9));
    }

    #[test]
    fn test_detect_incomplete() {
        let msg = frame(class::NAV, nav::PVT, &[0u8; 92]);
        for cut in [1, 2, 5, 7, 50, msg.len() - 1] {
            assert_eq!(UbxDetector.try_extract(&msg[..cut]), Extract::Incomplete, "cut {cut}");
        }
    }

    #[test]
    fn test_detect_corrupt_and_unsynced() {
        let mut msg = frame(class::CFG, cfg::PRT, &[0x03]);
        msg[6] ^= 0x01;
        assert_eq!(UbxDetector.try_extract(&msg), Extract::Corrupt(9));

        assert_eq!(UbxDetector.try_extract(&[0xB5, 0x00, 0, 0, 0, 0, 0, 0]), Extract::Unsynced);
        assert_eq!(UbxDetector.try_extract(&[0xD3, 0x62]), Extract::Unsynced);
    }

    #[test]
    fn test_unhandled_tally() {
        let mut codec = UbxCodec::new();
        codec.decode(&frame(class::NAV, nav::SAT, &[0u8; 8]));
        codec.decode(&frame(class::NAV, nav::SAT, &[0u8; 8]));
        codec.decode(&frame(class::RXM, rxm::SFRBX, &[0u8; 8]));

        assert_eq!(codec.count(), 3);
        assert_eq!(codec.unhandled().get(&0x0135), Some(&2));
        assert_eq!(codec.unhandled().get(&0x0213), Some(&1));
    }

    #[test]
    fn test_short_payload_keeps_record() {
        let mut codec = UbxCodec::new();
        codec.decode(&frame(class::NAV, nav::PVT, &[0u8; 10]));

        assert_eq!(codec.count(), 1);
        assert!(!codec.nav_pvt().has_data());
        assert!(codec.unhandled().is_empty());
    }

    #[test]
    fn test_ack_records() {
        let mut codec = UbxCodec::new();
        codec.decode(&frame(class::ACK, ack::ACK, &[class::CFG, cfg::PRT]));
        codec.decode(&frame(class::ACK, ack::NAK, &[class::CFG, cfg::TMODE3]));

        assert_eq!(codec.ack_ack().class_id, class::CFG);
        assert_eq!(codec.ack_ack().msg_id, cfg::PRT);
        assert_eq!(codec.ack_nak().msg_id, cfg::TMODE3);
    }

    #[test]
    fn test_signal_lookup() {
        assert_eq!(gnss_letter(6), "R");
        assert_eq!(gnss_letter(42), "?");
        assert_eq!(signal_name(2, 5), "E5bI");
        assert_eq!(signal_name(1, 3), "");
        assert_eq!(PortId::from_u8(3), Some(PortId::Usb));
        assert_eq!(PortId::from_u8(9), None);
    }

    #[test]
    fn test_message_names() {
        assert_eq!(message_name(class::NAV, nav::PVT), "NAV-PVT");
        assert_eq!(message_name(0x06, 0x71), "CFG-TMODE3");
        assert_eq!(message_name(0x27, 0x03), "");
    }
}
