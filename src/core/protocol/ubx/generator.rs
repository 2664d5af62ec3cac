//! UBX command generator
//!
//! Builds complete, checksummed frames for the configuration and poll
//! commands a fixed base station needs.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::{cfg, class, proto_mask, PortId, FRAME_OVERHEAD, SYNC_CHAR_1, SYNC_CHAR_2};
use crate::core::protocol::checksum::ubx_checksum;

/// Battery-backed RAM sections to clear on reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetType {
    #[default]
    Hot,
    Warm,
    Cold,
}

impl ResetType {
    pub fn nav_bbr_mask(&self) -> u16 {
        match self {
            ResetType::Hot => 0x0000,
            ResetType::Warm => 0x0001,
            ResetType::Cold => 0xFFFF,
        }
    }
}

/// How the receiver performs a reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// Hardware reset via watchdog, immediately
    ForcedHw,
    /// Controlled software reset
    Controlled,
    /// Restart the GNSS subsystem only
    #[default]
    ControlledGnssOnly,
    /// Hardware reset via watchdog after shutdown
    ControlledHw,
}

impl ResetMode {
    pub fn code(&self) -> u8 {
        match self {
            ResetMode::ForcedHw => 0x00,
            ResetMode::Controlled => 0x01,
            ResetMode::ControlledGnssOnly => 0x02,
            ResetMode::ControlledHw => 0x04,
        }
    }
}

/// Per-port output rates for CFG-MSG (0 disables output on that port)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRates {
    pub i2c: u8,
    pub uart1: u8,
    pub uart2: u8,
    pub usb: u8,
    pub spi: u8,
}

impl PortRates {
    /// Same rate on every port
    pub fn uniform(rate: u8) -> Self {
        Self {
            i2c: rate,
            uart1: rate,
            uart2: rate,
            usb: rate,
            spi: rate,
        }
    }

    pub fn is_off(&self) -> bool {
        *self == Self::default()
    }
}

/// CFG-CFG device mask: BBR, flash, EEPROM and SPI flash
const CFG_DEVICE_MASK: u8 = 0x17;

/// Builds UBX command frames
#[derive(Debug, Clone, Copy, Default)]
pub struct UbxGenerator;

impl UbxGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Frame an arbitrary payload: sync, class, id, length, payload, checksum
    pub fn generate_message(&self, class: u8, id: u8, payload: &[u8]) -> Bytes {
        let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
        frame.put_u8(SYNC_CHAR_1);
        frame.put_u8(SYNC_CHAR_2);
        frame.put_u8(class);
        frame.put_u8(id);
        frame.put_u16_le(payload.len() as u16);
        frame.put_slice(payload);
        let ck = ubx_checksum(&frame[2..]);
        frame.put_slice(&ck);
        frame.freeze()
    }

    fn cfg_cfg(&self, clear: u32, save: u32, load: u32) -> Bytes {
        let mut payload = BytesMut::with_capacity(13);
        payload.put_u32_le(clear);
        payload.put_u32_le(save);
        payload.put_u32_le(load);
        payload.put_u8(CFG_DEVICE_MASK);
        self.generate_message(class::CFG, cfg::CFG, &payload)
    }

    /// Clear the configuration and load defaults
    pub fn reset_to_defaults(&self) -> Bytes {
        self.cfg_cfg(0x0000_FBFF, 0, 0x0000_FFFF)
    }

    /// Reload the configuration saved in non-volatile memory
    pub fn revert_to_saved(&self) -> Bytes {
        self.cfg_cfg(0, 0, 0x0000_FFFF)
    }

    /// Persist the current configuration
    pub fn save_config(&self) -> Bytes {
        self.cfg_cfg(0, 0x0000_FFFF, 0)
    }

    /// CFG-RST
    pub fn reboot(&self, reset_type: ResetType, reset_mode: ResetMode) -> Bytes {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u16_le(reset_type.nav_bbr_mask());
        payload.put_u8(reset_mode.code());
        payload.put_u8(0);
        self.generate_message(class::CFG, cfg::RST, &payload)
    }

    /// Poll CFG-PRT for one port
    pub fn poll_port(&self, port: PortId) -> Bytes {
        self.generate_message(class::CFG, cfg::PRT, &[port as u8])
    }

    /// Poll the CFG-MSG rates of one message
    pub fn poll_msg_rate(&self, msg_class: u8, msg_id: u8) -> Bytes {
        self.generate_message(class::CFG, cfg::MSG, &[msg_class, msg_id])
    }

    /// Configure a port as 8N1 with the given protocol masks.
    /// The baud rate is ignored for USB.
    pub fn config_port(&self, port: PortId, proto_in: u16, proto_out: u16, baud: u32) -> Bytes {
        let baud = if port == PortId::Usb { 0 } else { baud };
        let mut payload = BytesMut::with_capacity(20);
        payload.put_u8(port as u8);
        payload.put_u8(0);
        payload.put_u16_le(0); // txReady
        payload.put_u32_le(0x0000_08D0); // 8N1
        payload.put_u32_le(baud);
        payload.put_u16_le(proto_in);
        payload.put_u16_le(proto_out);
        payload.put_u16_le(0);
        payload.put_u16_le(0);
        self.generate_message(class::CFG, cfg::PRT, &payload)
    }

    /// UART1 with UBX, NMEA and RTCM3 in both directions
    pub fn config_port_default(&self, baud: u32) -> Bytes {
        let all = proto_mask::UBX | proto_mask::NMEA | proto_mask::RTCM3;
        self.config_port(PortId::Uart1, all, all, baud)
    }

    /// Measurement rate in milliseconds, one solution per measurement, GPS time
    pub fn config_rate(&self, rate_ms: u16) -> Bytes {
        let mut payload = BytesMut::with_capacity(6);
        payload.put_u16_le(rate_ms);
        payload.put_u16_le(1);
        payload.put_u16_le(1);
        self.generate_message(class::CFG, cfg::RATE, &payload)
    }

    /// CFG-NAV5 with the stationary dynamic model
    pub fn config_nav_stationary(&self, dgnss_enable: bool) -> Bytes {
        let mut payload = BytesMut::with_capacity(36);
        payload.put_u16_le(0xFFFF); // apply all
        payload.put_u8(2); // stationary
        payload.put_u8(3); // auto 2D/3D
        payload.put_i32_le(0); // fixedAlt
        payload.put_u32_le(10_000); // fixedAltVar
        payload.put_i8(15); // minElev
        payload.put_u8(0); // drLimit
        payload.put_u16_le(250); // pDop
        payload.put_u16_le(250); // tDop
        payload.put_u16_le(100); // pAcc
        payload.put_u16_le(300); // tAcc
        payload.put_u8(0); // staticHoldThresh
        payload.put_u8(if dgnss_enable { 0x3C } else { 0x00 });
        payload.put_u8(0); // cnoThreshNumSVs
        payload.put_u8(0x23); // cnoThresh
        payload.put_u16_le(10_000);
        payload.put_u16_le(0); // staticHoldMaxDist
        payload.put_u8(0); // utcStandard
        payload.put_slice(&[0; 5]);
        self.generate_message(class::CFG, cfg::NAV5, &payload)
    }

    fn tmode3(&self, mode: u8, lla: bool, fill: impl FnOnce(&mut BytesMut)) -> Bytes {
        let mut payload = BytesMut::with_capacity(40);
        payload.put_u8(0); // version
        payload.put_u8(0);
        payload.put_u8(mode);
        payload.put_u8(lla as u8);
        fill(&mut payload);
        payload.resize(40, 0);
        self.generate_message(class::CFG, cfg::TMODE3, &payload)
    }

    /// Start a survey-in with a minimum duration (s) and accuracy limit (m)
    pub fn start_survey_in(&self, duration_s: u32, acc_limit_m: f64) -> Bytes {
        self.tmode3(1, false, |p| {
            p.put_slice(&[0; 20]); // position and fixed accuracy unused
            p.put_u32_le(duration_s);
            p.put_u32_le((acc_limit_m * 1e4).trunc() as u32);
        })
    }

    /// Fixed mode at an ECEF position (m) with accuracy (m)
    pub fn config_fixed_mode_ecef(&self, x: f64, y: f64, z: f64, acc: f64) -> Bytes {
        self.tmode3(2, false, |p| {
            put_split(p, [x, y, z], [1e2, 1e2, 1e2], [1e4, 1e4, 1e4]);
            p.put_u32_le((acc * 1e4).trunc() as u32);
        })
    }

    /// Fixed mode at a geodetic position (deg, deg, m) with accuracy (m)
    pub fn config_fixed_mode_lla(&self, lat: f64, lon: f64, alt: f64, acc: f64) -> Bytes {
        self.tmode3(2, true, |p| {
            put_split(p, [lat, lon, alt], [1e7, 1e7, 1e2], [1e9, 1e9, 1e4]);
            p.put_u32_le((acc * 1e4).trunc() as u32);
        })
    }

    /// TMODE3 disabled, all fields zero
    pub fn disable_tmode3(&self) -> Bytes {
        self.generate_message(class::CFG, cfg::TMODE3, &[0u8; 40])
    }

    /// Set the output rate of one message on each port
    pub fn config_msg_rate(&self, msg_class: u8, msg_id: u8, rates: PortRates) -> Bytes {
        let payload = [
            msg_class,
            msg_id,
            rates.i2c,
            rates.uart1,
            rates.uart2,
            rates.usb,
            rates.spi,
            0,
        ];
        self.generate_message(class::CFG, cfg::MSG, &payload)
    }

    /// Disable one message on every port
    pub fn turn_off(&self, msg_class: u8, msg_id: u8) -> Bytes {
        self.config_msg_rate(msg_class, msg_id, PortRates::default())
    }

    /// Poll request: empty payload
    pub fn poll(&self, msg_class: u8, msg_id: u8) -> Bytes {
        self.generate_message(msg_class, msg_id, &[])
    }
}

/// Write three coordinates as truncated standard-precision i32 values
/// followed by their truncated high-precision i8 remainders.
fn put_split(p: &mut BytesMut, values: [f64; 3], scale: [f64; 3], hp_scale: [f64; 3]) {
    let base: [i32; 3] = std::array::from_fn(|i| (values[i] * scale[i]).trunc() as i32);
    for b in base {
        p.put_i32_le(b);
    }
    for i in 0..3 {
        let rest = values[i] - base[i] as f64 / scale[i];
        p.put_i8((rest * hp_scale[i]).trunc() as i8);
    }
    p.put_u8(0);
}
