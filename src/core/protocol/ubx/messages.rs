//! Typed UBX message records
//!
//! Each record decodes its payload front to back with a [`PayloadReader`];
//! scaled fields are stored in engineering units (seconds, degrees, metres).

use std::fmt;

use serde::Serialize;

use super::{ack, cfg, class, gnss_letter, mon, nav, proto_mask, rxm, signal_name, PortId};
use crate::core::protocol::reader::PayloadReader;
use crate::core::protocol::DecodeError;

/// A UBX message with a typed record
pub trait UbxMessage: Sized + Default {
    const CLASS: u8;
    const ID: u8;
    const NAME: &'static str;

    /// Decode the payload (frame header and checksum stripped)
    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, DecodeError>;
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

// ============ NAV-PVT ============

/// Navigation position velocity time solution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NavPvt {
    /// GPS time of week (s)
    pub i_tow: f64,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    pub valid: u8,
    /// Time accuracy estimate (ns)
    pub t_acc: u32,
    /// Fraction of second (s)
    pub nano: f64,
    pub fix_type: u8,
    pub flags: u8,
    pub flags2: u8,
    pub num_sv: u8,
    /// Longitude (deg)
    pub lon: f64,
    /// Latitude (deg)
    pub lat: f64,
    /// Height above ellipsoid (m)
    pub height: f64,
    /// Height above mean sea level (m)
    pub h_msl: f64,
    pub h_acc: f64,
    pub v_acc: f64,
    /// NED velocity (m/s)
    pub vel_n: f64,
    pub vel_e: f64,
    pub vel_d: f64,
    pub g_speed: f64,
    /// Heading of motion (deg)
    pub head_mot: f64,
    pub s_acc: f64,
    pub head_acc: f64,
    pub p_dop: f64,
    pub flags3: u16,
    pub head_veh: f64,
    pub mag_dec: f64,
    pub mag_acc: f64,
}

impl NavPvt {
    pub fn valid_date(&self) -> bool {
        self.valid & 0x01 != 0
    }

    pub fn valid_time(&self) -> bool {
        self.valid & 0x02 != 0
    }

    pub fn fully_resolved(&self) -> bool {
        self.valid & 0x04 != 0
    }

    pub fn gnss_fix_ok(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn diff_soln(&self) -> bool {
        self.flags & 0x02 != 0
    }

    pub fn psm_state(&self) -> u8 {
        (self.flags & 0x1C) >> 2
    }

    pub fn head_veh_valid(&self) -> bool {
        self.flags & 0x20 != 0
    }

    /// Carrier phase solution: 0 none, 1 float, 2 fixed
    pub fn carr_soln(&self) -> u8 {
        (self.flags & 0xC0) >> 6
    }

    pub fn invalid_llh(&self) -> bool {
        self.flags3 & 0x01 != 0
    }

    /// Age of the most recent differential correction, as a range index
    pub fn last_correction_age(&self) -> u8 {
        ((self.flags3 >> 1) & 0x0F) as u8
    }

    pub fn fix_type_name(&self) -> &'static str {
        match self.fix_type {
            0 => "NO FIX",
            1 => "DR",
            2 => "2D",
            3 => "3D",
            4 => "3D+DR",
            5 => "TIME",
            _ => "UNKNOWN",
        }
    }

    pub fn date_str(&self) -> String {
        let month = (self.month as usize)
            .checked_sub(1)
            .and_then(|i| MONTHS.get(i))
            .copied()
            .unwrap_or("???");
        format!("{} {} {}", self.day, month, self.year)
    }

    pub fn time_str(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hour, self.min, self.sec)
    }
}

impl UbxMessage for NavPvt {
    const CLASS: u8 = class::NAV;
    const ID: u8 = nav::PVT;
    const NAME: &'static str = "NAV-PVT";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let i_tow = r.read_u32()? as f64 * 1e-3;
        let year = r.read_u16()?;
        let month = r.read_u8()?;
        let day = r.read_u8()?;
        let hour = r.read_u8()?;
        let min = r.read_u8()?;
        let sec = r.read_u8()?;
        let valid = r.read_u8()?;
        let t_acc = r.read_u32()?;
        let nano = r.read_i32()? as f64 * 1e-9;
        let fix_type = r.read_u8()?;
        let flags = r.read_u8()?;
        let flags2 = r.read_u8()?;
        let num_sv = r.read_u8()?;
        let lon = r.read_i32()? as f64 * 1e-7;
        let lat = r.read_i32()? as f64 * 1e-7;
        let height = r.read_i32()? as f64 * 1e-3;
        let h_msl = r.read_i32()? as f64 * 1e-3;
        let h_acc = r.read_u32()? as f64 * 1e-3;
        let v_acc = r.read_u32()? as f64 * 1e-3;
        let vel_n = r.read_i32()? as f64 * 1e-3;
        let vel_e = r.read_i32()? as f64 * 1e-3;
        let vel_d = r.read_i32()? as f64 * 1e-3;
        let g_speed = r.read_i32()? as f64 * 1e-3;
        let head_mot = r.read_i32()? as f64 * 1e-5;
        let s_acc = r.read_u32()? as f64 * 1e-3;
        let head_acc = r.read_u32()? as f64 * 1e-5;
        let p_dop = r.read_u16()? as f64 * 1e-2;
        let flags3 = r.read_u16()?;
        r.skip(4)?;
        let head_veh = r.read_i32()? as f64 * 1e-5;
        let mag_dec = r.read_i16()? as f64 * 1e-2;
        let mag_acc = r.read_u16()? as f64 * 1e-2;

        Ok(Self {
            i_tow,
            year,
            month,
            day,
            hour,
            min,
            sec,
            valid,
            t_acc,
            nano,
            fix_type,
            flags,
            flags2,
            num_sv,
            lon,
            lat,
            height,
            h_msl,
            h_acc,
            v_acc,
            vel_n,
            vel_e,
            vel_d,
            g_speed,
            head_mot,
            s_acc,
            head_acc,
            p_dop,
            flags3,
            head_veh,
            mag_dec,
            mag_acc,
        })
    }
}

impl fmt::Display for NavPvt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let carr = ["", "/FLOAT", "/FIXED"]
            .get(self.carr_soln() as usize)
            .copied()
            .unwrap_or("");
        let valid = |v: bool| if v { "VALID" } else { "INVALID" };

        writeln!(f, "{:<16}: {:.3}", "GPS Time", self.i_tow)?;
        writeln!(
            f,
            "{:<16}: {} {} {:+.9}",
            "UTC Date/Time",
            self.date_str(),
            self.time_str(),
            self.nano
        )?;
        writeln!(
            f,
            "{:<16}: {} / {}",
            "Date/Time Status",
            valid(self.valid_date()),
            valid(self.valid_time())
        )?;
        writeln!(f, "{:<16}: {}ns", "Time accuracy", self.t_acc)?;
        writeln!(
            f,
            "{:<16}: {}{}{}",
            "Fix Type",
            self.fix_type_name(),
            if self.diff_soln() { "/DGNSS" } else { "" },
            carr
        )?;
        writeln!(
            f,
            "{:<16}: {}",
            "Fix Flags",
            if self.gnss_fix_ok() { "FixOK" } else { "FixNotOK" }
        )?;
        writeln!(f, "{:<16}: {}", "Satellites", self.num_sv)?;
        writeln!(
            f,
            "Lat/Lon/HAE/MSL : {:.7}, {:.7}, {:.1}, {:.1}",
            self.lat, self.lon, self.height, self.h_msl
        )?;
        writeln!(f, "{:<16}: {}", "Invalid Position", yes_no(self.invalid_llh()))?;
        writeln!(f, "Accuracy Hor/Ver: {:.1}m / {:.1}m", self.h_acc, self.v_acc)?;
        writeln!(
            f,
            "{:<16}: {:.3}, {:.3}, {:.3}",
            "Velocity NED", self.vel_n, self.vel_e, self.vel_d
        )?;
        writeln!(f, "Accuracy Vel/Hdg: {:.3}m/s / {:.1}deg", self.s_acc, self.head_acc)?;
        writeln!(f, "{:<16}: {:.3}", "Ground Speed", self.g_speed)?;
        writeln!(f, "{:<16}: {:.1}, {:.1}", "Hdg Motion/Veh", self.head_mot, self.head_veh)?;
        write!(f, "{:<16}: {:.2}", "PDOP", self.p_dop)
    }
}

// ============ NAV-SVIN ============

/// Survey-in status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NavSvin {
    pub version: u8,
    pub i_tow: f64,
    /// Elapsed observation time (s)
    pub dur: u32,
    /// Mean ECEF position including high precision part (m)
    pub mean_x: f64,
    pub mean_y: f64,
    pub mean_z: f64,
    /// Mean ECEF position at centimetre resolution (m)
    pub mean_x_cm: f64,
    pub mean_y_cm: f64,
    pub mean_z_cm: f64,
    /// Mean position accuracy (m)
    pub mean_acc: f64,
    /// Number of position observations used
    pub obs: u32,
    pub valid: bool,
    pub active: bool,
}

impl UbxMessage for NavSvin {
    const CLASS: u8 = class::NAV;
    const ID: u8 = nav::SVIN;
    const NAME: &'static str = "NAV-SVIN";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let version = r.read_u8()?;
        r.skip(3)?;
        let i_tow = r.read_u32()? as f64 * 1e-3;
        let dur = r.read_u32()?;
        let x = r.read_i32()? as f64 * 1e-2;
        let y = r.read_i32()? as f64 * 1e-2;
        let z = r.read_i32()? as f64 * 1e-2;
        let x_hp = r.read_i8()? as f64 * 1e-4;
        let y_hp = r.read_i8()? as f64 * 1e-4;
        let z_hp = r.read_i8()? as f64 * 1e-4;
        r.skip(1)?;
        let mean_acc = r.read_u32()? as f64 * 1e-4;
        let obs = r.read_u32()?;
        let valid = r.read_u8()? != 0;
        let active = r.read_u8()? != 0;
        r.skip(2)?;

        Ok(Self {
            version,
            i_tow,
            dur,
            mean_x: x + x_hp,
            mean_y: y + y_hp,
            mean_z: z + z_hp,
            mean_x_cm: x,
            mean_y_cm: y,
            mean_z_cm: z,
            mean_acc,
            obs,
            valid,
            active,
        })
    }
}

impl fmt::Display for NavSvin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.active {
            "In progress"
        } else {
            "Not started yet"
        };
        writeln!(f, "Time Of Week: {:>12.3}", self.i_tow)?;
        writeln!(f, "Status: {:>18}", status)?;
        writeln!(f, "Mean Position Valid: {:>5}", yes_no(self.valid))?;
        writeln!(f, "Observation Time: {:>8}", self.dur)?;
        writeln!(f, "Positions Used: {:>10}", self.obs)?;
        writeln!(f, "Mean ECEF X: {:>13.4}", self.mean_x)?;
        writeln!(f, "Mean ECEF Y: {:>13.4}", self.mean_y)?;
        writeln!(f, "Mean ECEF Z: {:>13.4}", self.mean_z)?;
        write!(f, "Mean 3D StdDev: {:>10.4}", self.mean_acc)
    }
}

// ============ CFG-TMODE3 ============

/// Time mode 3 (base station) configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CfgTmode3 {
    pub version: u8,
    /// 0 disabled, 1 survey-in, 2 fixed
    pub mode: u8,
    /// Fixed position given as lat/lon/alt rather than ECEF
    pub lla: bool,
    /// ECEF X (m) or latitude (deg), high precision part included
    pub ecef_x_or_lat: f64,
    /// ECEF Y (m) or longitude (deg), high precision part included
    pub ecef_y_or_lon: f64,
    /// ECEF Z or altitude (m), high precision part included
    pub ecef_z_or_alt: f64,
    /// Coordinates without the high precision part (cm or 1e-7 deg)
    pub base_x_or_lat: f64,
    pub base_y_or_lon: f64,
    pub base_z_or_alt: f64,
    /// Fixed position accuracy (m)
    pub fixed_pos_acc: f64,
    /// Survey-in minimum duration (s)
    pub svin_min_dur: u32,
    /// Survey-in accuracy limit (m)
    pub svin_acc_limit: f64,
}

impl CfgTmode3 {
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            0 => "Disabled",
            1 => "Survey-in",
            2 => "Fixed Mode",
            _ => "Reserved",
        }
    }
}

impl UbxMessage for CfgTmode3 {
    const CLASS: u8 = class::CFG;
    const ID: u8 = cfg::TMODE3;
    const NAME: &'static str = "CFG-TMODE3";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let version = r.read_u8()?;
        r.skip(1)?;
        let flags = r.read_u16()?;
        let mode = (flags & 0xFF) as u8;
        let lla = (flags >> 8) & 0x01 == 1;

        let (scale, hp_scale) = if lla { (1e-7, 1e-9) } else { (1e-2, 1e-4) };
        let x = r.read_i32()? as f64 * scale;
        let y = r.read_i32()? as f64 * scale;
        let z = r.read_i32()? as f64 * 1e-2;
        let x_hp = r.read_i8()? as f64 * hp_scale;
        let y_hp = r.read_i8()? as f64 * hp_scale;
        let z_hp = r.read_i8()? as f64 * 1e-4;
        r.skip(1)?;
        let fixed_pos_acc = r.read_u32()? as f64 * 1e-4;
        let svin_min_dur = r.read_u32()?;
        let svin_acc_limit = r.read_u32()? as f64 * 1e-4;
        r.skip(8)?;

        Ok(Self {
            version,
            mode,
            lla,
            ecef_x_or_lat: x + x_hp,
            ecef_y_or_lon: y + y_hp,
            ecef_z_or_alt: z + z_hp,
            base_x_or_lat: x,
            base_y_or_lon: y,
            base_z_or_alt: z,
            fixed_pos_acc,
            svin_min_dur,
            svin_acc_limit,
        })
    }
}

impl fmt::Display for CfgTmode3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dec = if self.lla { 9 } else { 4 };
        writeln!(f, "Mode: {:>14}", self.mode_name())?;
        writeln!(f, "Min Obs Time: {:>6}", self.svin_min_dur)?;
        writeln!(f, "Req Accuracy: {:>6.4}", self.svin_acc_limit)?;
        writeln!(f, "X: {:>17.*}", dec, self.ecef_x_or_lat)?;
        writeln!(f, "Y: {:>17.*}", dec, self.ecef_y_or_lon)?;
        writeln!(f, "Z: {:>17.4}", self.ecef_z_or_alt)?;
        write!(f, "Accuracy: {:>10.4}", self.fixed_pos_acc)
    }
}

// ============ CFG-PRT ============

/// Port configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CfgPrt {
    pub port_id: u8,
    pub tx_ready: u16,
    pub mode: u32,
    pub baud_rate: u32,
    pub in_proto_mask: u16,
    pub out_proto_mask: u16,
    pub flags: u16,
}

fn mask_names(mask: u16) -> String {
    [
        (proto_mask::UBX, "UBX"),
        (proto_mask::NMEA, "NMEA"),
        (proto_mask::RTCM2, "RTCM2"),
        (proto_mask::RTCM3, "RTCM3"),
    ]
    .iter()
    .filter(|(bit, _)| mask & bit != 0)
    .map(|(_, name)| *name)
    .collect::<Vec<_>>()
    .join(" ")
}

impl CfgPrt {
    pub fn port(&self) -> Option<PortId> {
        PortId::from_u8(self.port_id)
    }

    pub fn in_ubx(&self) -> bool {
        self.in_proto_mask & proto_mask::UBX != 0
    }

    pub fn in_nmea(&self) -> bool {
        self.in_proto_mask & proto_mask::NMEA != 0
    }

    pub fn in_rtcm3(&self) -> bool {
        self.in_proto_mask & proto_mask::RTCM3 != 0
    }

    pub fn out_ubx(&self) -> bool {
        self.out_proto_mask & proto_mask::UBX != 0
    }

    pub fn out_nmea(&self) -> bool {
        self.out_proto_mask & proto_mask::NMEA != 0
    }

    pub fn out_rtcm3(&self) -> bool {
        self.out_proto_mask & proto_mask::RTCM3 != 0
    }
}

impl UbxMessage for CfgPrt {
    const CLASS: u8 = class::CFG;
    const ID: u8 = cfg::PRT;
    const NAME: &'static str = "CFG-PRT";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let port_id = r.read_u8()?;
        r.skip(1)?;
        let tx_ready = r.read_u16()?;
        let mode = r.read_u32()?;
        let baud_rate = r.read_u32()?;
        let in_proto_mask = r.read_u16()?;
        let out_proto_mask = r.read_u16()?;
        let flags = r.read_u16()?;
        r.skip(2)?;

        Ok(Self {
            port_id,
            tx_ready,
            mode,
            baud_rate,
            in_proto_mask,
            out_proto_mask,
            flags,
        })
    }
}

impl fmt::Display for CfgPrt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self.port().map(|p| p.name()).unwrap_or("?");
        writeln!(f, "Port: {}", port)?;
        writeln!(f, "Baud Rate: {}", self.baud_rate)?;
        writeln!(f, "Input Protocols : {}", mask_names(self.in_proto_mask))?;
        write!(f, "Output Protocols: {}", mask_names(self.out_proto_mask))
    }
}

// ============ CFG-MSG ============

/// Output rate of one message on each port
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CfgMsg {
    pub msg_class: u8,
    pub msg_id: u8,
    /// Rates for I2C, UART1, UART2, USB, SPI
    pub rates: [u8; 5],
}

impl CfgMsg {
    pub fn rate(&self, port: PortId) -> u8 {
        self.rates[port as usize]
    }
}

impl UbxMessage for CfgMsg {
    const CLASS: u8 = class::CFG;
    const ID: u8 = cfg::MSG;
    const NAME: &'static str = "CFG-MSG";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            msg_class: r.read_u8()?,
            msg_id: r.read_u8()?,
            rates: r.read_array::<5>()?,
        })
    }
}

impl fmt::Display for CfgMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message: 0x{:02x} 0x{:02x} Rates:", self.msg_class, self.msg_id)?;
        for (port, rate) in PortId::all().iter().zip(self.rates) {
            write!(f, " {}={}", port.name(), rate)?;
        }
        Ok(())
    }
}

// ============ MON-VER ============

/// Receiver and firmware version strings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonVer {
    pub sw_version: String,
    pub hw_version: String,
    pub rom_base: String,
    pub fw_ver: String,
    pub prot_ver: String,
    pub module: String,
    /// Supported constellations, `;` separated
    pub gnss: String,
}

impl UbxMessage for MonVer {
    const CLASS: u8 = class::MON;
    const ID: u8 = mon::VER;
    const NAME: &'static str = "MON-VER";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let sw_version = r.read_fixed_str(30)?;
        let hw_version = r.read_fixed_str(10)?;

        let mut ext = Vec::new();
        while r.remaining() >= 30 {
            ext.push(r.read_fixed_str(30)?);
        }
        let mut ext = ext.into_iter();
        let mut next = || ext.next().unwrap_or_default();

        let rom_base = next();
        let fw_ver = next();
        let prot_ver = next();
        let module = next();
        let gnss_a = next();
        let gnss_b = next();

        Ok(Self {
            sw_version,
            hw_version,
            rom_base,
            fw_ver,
            prot_ver,
            module,
            gnss: format!("{};{}", gnss_a.trim(), gnss_b.trim()),
        })
    }
}

impl fmt::Display for MonVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "swVersion: {}", self.sw_version)?;
        writeln!(f, "hwVersion: {}", self.hw_version)?;
        writeln!(f, "romBase  : {}", self.rom_base)?;
        writeln!(f, "fwVer    : {}", self.fw_ver)?;
        writeln!(f, "protVer  : {}", self.prot_ver)?;
        writeln!(f, "mod      : {}", self.module)?;
        write!(f, "gnss     : {}", self.gnss)
    }
}

// ============ MON-HW ============

/// Hardware status: antenna, noise, jamming
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonHw {
    pub pin_sel: u32,
    pub pin_bank: u32,
    pub pin_dir: u32,
    pub pin_val: u32,
    pub noise_per_ms: u16,
    /// AGC monitor (% of full scale)
    pub agc_cnt: f64,
    pub a_status: u8,
    pub a_power: u8,
    pub flags: u8,
    pub used_mask: u32,
    pub vp: [u8; 17],
    /// CW jamming indicator (% of full scale)
    pub cw_suppression: f64,
    pub pin_irq: u32,
    pub pull_h: u32,
    pub pull_l: u32,
}

impl MonHw {
    pub fn rtc_calib(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn safe_boot(&self) -> bool {
        self.flags & 0x02 != 0
    }

    pub fn jamming_state(&self) -> u8 {
        (self.flags & 0x0C) >> 2
    }

    pub fn xtal_absent(&self) -> bool {
        self.flags & 0x10 != 0
    }

    pub fn antenna_status_name(&self) -> &'static str {
        ["INIT", "DONTKNOW", "OK", "SHORT", "OPEN"]
            .get(self.a_status as usize)
            .copied()
            .unwrap_or("?")
    }

    pub fn antenna_power_name(&self) -> &'static str {
        ["OFF", "ON", "DONTKNOW"]
            .get(self.a_power as usize)
            .copied()
            .unwrap_or("?")
    }
}

impl UbxMessage for MonHw {
    const CLASS: u8 = class::MON;
    const ID: u8 = mon::HW;
    const NAME: &'static str = "MON-HW";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let pin_sel = r.read_u32()?;
        let pin_bank = r.read_u32()?;
        let pin_dir = r.read_u32()?;
        let pin_val = r.read_u32()?;
        let noise_per_ms = r.read_u16()?;
        let agc_cnt = r.read_u16()? as f64 / 81.91;
        let a_status = r.read_u8()?;
        let a_power = r.read_u8()?;
        let flags = r.read_u8()?;
        r.skip(1)?;
        let used_mask = r.read_u32()?;
        let vp = r.read_array::<17>()?;
        let cw_suppression = r.read_u8()? as f64 / 2.55;
        r.skip(2)?;
        let pin_irq = r.read_u32()?;
        let pull_h = r.read_u32()?;
        let pull_l = r.read_u32()?;

        Ok(Self {
            pin_sel,
            pin_bank,
            pin_dir,
            pin_val,
            noise_per_ms,
            agc_cnt,
            a_status,
            a_power,
            flags,
            used_mask,
            vp,
            cw_suppression,
            pin_irq,
            pull_h,
            pull_l,
        })
    }
}

impl fmt::Display for MonHw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let jamming = ["unknown", "ok", "warning", "critical"][self.jamming_state() as usize];
        writeln!(
            f,
            "RTC Status: {}",
            if self.rtc_calib() { "calibrated" } else { "uncalibrated" }
        )?;
        writeln!(f, "Antenna State Status: {}", self.antenna_status_name())?;
        writeln!(f, "Antenna Power Status: {}", self.antenna_power_name())?;
        writeln!(
            f,
            "safeBoot Mode: {}",
            if self.safe_boot() { "active" } else { "inactive" }
        )?;
        writeln!(f, "Noise Level: {}", self.noise_per_ms)?;
        writeln!(f, "AGC Monitor: {:.1}%", self.agc_cnt)?;
        writeln!(f, "CW Jamming Indicator: {:.1}%", self.cw_suppression)?;
        write!(f, "Jamming Status: {}", jamming)
    }
}

// ============ RXM-RAWX ============

/// One raw measurement from RXM-RAWX
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawMeasurement {
    /// Pseudorange (m)
    pub pr_mes: f64,
    /// Carrier phase (cycles)
    pub cp_mes: f64,
    /// Doppler (Hz)
    pub do_mes: f32,
    pub gnss_id: u8,
    pub sv_id: u8,
    pub sig_id: u8,
    /// GLONASS frequency slot (-7..6)
    pub freq_id: i8,
    /// Carrier phase lock time (ms)
    pub locktime: u16,
    /// Carrier to noise ratio (dB-Hz)
    pub cno: u8,
    /// Pseudorange standard deviation (m)
    pub pr_std: f64,
    /// Carrier phase standard deviation (cycles)
    pub cp_std: f64,
    /// Doppler standard deviation (Hz)
    pub do_std: f64,
    pub trk_stat: u8,
}

impl RawMeasurement {
    pub const SIZE: usize = 32;

    pub fn pr_valid(&self) -> bool {
        self.trk_stat & 0x01 != 0
    }

    pub fn cp_valid(&self) -> bool {
        self.trk_stat & 0x02 != 0
    }

    pub fn half_cyc(&self) -> bool {
        self.trk_stat & 0x04 != 0
    }

    pub fn sub_half_cyc(&self) -> bool {
        self.trk_stat & 0x08 != 0
    }

    /// Satellite label such as `G05`
    pub fn sv_name(&self) -> String {
        format!("{}{:02}", gnss_letter(self.gnss_id), self.sv_id)
    }

    pub fn signal(&self) -> &'static str {
        signal_name(self.gnss_id, self.sig_id)
    }

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let pr_mes = r.read_f64()?;
        let cp_mes = r.read_f64()?;
        let do_mes = r.read_f32()?;
        let gnss_id = r.read_u8()?;
        let sv_id = r.read_u8()?;
        let sig_id = r.read_u8()?;
        let freq_id = r.read_u8()? as i16 - 7;
        let locktime = r.read_u16()?;
        let cno = r.read_u8()?;
        let pr_std = 0.01 * 2f64.powi((r.read_u8()? & 0x0F) as i32);
        let cp_std = 0.004 * (r.read_u8()? & 0x0F) as f64;
        let do_std = 0.002 * 2f64.powi((r.read_u8()? & 0x0F) as i32);
        let trk_stat = r.read_u8()?;
        r.skip(1)?;

        Ok(Self {
            pr_mes,
            cp_mes,
            do_mes,
            gnss_id,
            sv_id,
            sig_id,
            freq_id: freq_id as i8,
            locktime,
            cno,
            pr_std,
            cp_std,
            do_std,
            trk_stat,
        })
    }
}

impl fmt::Display for RawMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |v: bool| if v { "   Y   " } else { "   N   " };
        let freq = if self.gnss_id == 6 {
            format!("{:>5}", self.freq_id)
        } else {
            " ".repeat(5)
        };
        let cp_std = if self.cp_std < 0.06 {
            format!("{:.3}", self.cp_std)
        } else {
            "  -  ".to_string()
        };
        write!(
            f,
            "{:<4} {:<5} {} {:.2} {:>12.2} {:>7.1} {:>8} {:>3} {:>5.2} {} {:>6.3} {} {} {}",
            self.sv_name(),
            self.signal(),
            freq,
            self.pr_mes,
            self.cp_mes,
            self.do_mes,
            self.locktime,
            self.cno,
            self.pr_std,
            cp_std,
            self.do_std,
            flag(self.pr_valid()),
            flag(self.cp_valid()),
            flag(self.half_cyc())
        )
    }
}

/// Multi-GNSS raw measurements
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RxmRawx {
    /// Receiver time of week (s)
    pub rcv_tow: f64,
    pub week: u16,
    pub leap_s: i8,
    pub num_meas: u8,
    pub rec_stat: u8,
    pub version: u8,
    pub meas: Vec<RawMeasurement>,
}

impl RxmRawx {
    pub fn leap_sec_valid(&self) -> bool {
        self.rec_stat & 0x01 != 0
    }

    pub fn clk_reset(&self) -> bool {
        self.rec_stat & 0x02 != 0
    }
}

impl UbxMessage for RxmRawx {
    const CLASS: u8 = class::RXM;
    const ID: u8 = rxm::RAWX;
    const NAME: &'static str = "RXM-RAWX";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        let rcv_tow = r.read_f64()?;
        let week = r.read_u16()?;
        let leap_s = r.read_i8()?;
        let num_meas = r.read_u8()?;
        let rec_stat = r.read_u8()?;
        let version = r.read_u8()?;
        r.skip(2)?;

        let meas = (0..num_meas)
            .map(|_| RawMeasurement::decode(r))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rcv_tow,
            week,
            leap_s,
            num_meas,
            rec_stat,
            version,
            meas,
        })
    }
}

impl fmt::Display for RxmRawx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Time: {}:{:.3} (s)", self.week, self.rcv_tow)?;
        writeln!(
            f,
            "Leap seconds: {} ({})",
            self.leap_s,
            if self.leap_sec_valid() { "VALID" } else { "INVALID" }
        )?;
        writeln!(f, "Clock reset: {}", if self.clk_reset() { "YES" } else { "NO" })?;
        writeln!(f, "nMeas: {}", self.num_meas)?;
        writeln!(
            f,
            "SV   SigId  Freq PseudoRange CarrierPhase Doppler LockTime SNR prStd cpStd  doStd prValid crValid halfCyc"
        )?;
        write!(f, "{}", "-".repeat(105))?;
        for m in &self.meas {
            write!(f, "\n{}", m)?;
        }
        Ok(())
    }
}

// ============ ACK ============

/// Positive acknowledgement of a CFG message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AckAck {
    pub class_id: u8,
    pub msg_id: u8,
}

impl UbxMessage for AckAck {
    const CLASS: u8 = class::ACK;
    const ID: u8 = ack::ACK;
    const NAME: &'static str = "ACK-ACK";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            class_id: r.read_u8()?,
            msg_id: r.read_u8()?,
        })
    }
}

/// Negative acknowledgement of a CFG message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AckNak {
    pub class_id: u8,
    pub msg_id: u8,
}

impl UbxMessage for AckNak {
    const CLASS: u8 = class::ACK;
    const ID: u8 = ack::NAK;
    const NAME: &'static str = "ACK-NAK";

    fn decode(r: &mut PayloadReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            class_id: r.read_u8()?,
            msg_id: r.read_u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn decode<T: UbxMessage>(payload: &[u8]) -> Result<T, DecodeError> {
        T::decode(&mut PayloadReader::new(payload))
    }

    fn nav_pvt_payload() -> Vec<u8> {
        let mut p = Vec::with_capacity(92);
        p.put_u32_le(123_456_000); // iTOW
        p.put_u16_le(2024);
        p.put_slice(&[3, 15, 12, 30, 45, 0x07]);
        p.put_u32_le(25); // tAcc
        p.put_i32_le(-500); // nano
        p.put_slice(&[3, 0x83, 0, 12]); // fixType, flags, flags2, numSV
        p.put_i32_le(-1_220_000_000); // lon
        p.put_i32_le(370_000_000); // lat
        p.put_i32_le(45_123); // height
        p.put_i32_le(12_500); // hMSL
        p.put_u32_le(14); // hAcc
        p.put_u32_le(21); // vAcc
        p.put_i32_le(1);
        p.put_i32_le(-2);
        p.put_i32_le(3);
        p.put_i32_le(4); // gSpeed
        p.put_i32_le(9_000_000); // headMot
        p.put_u32_le(100); // sAcc
        p.put_u32_le(18_000_000); // headAcc
        p.put_u16_le(132); // pDOP
        p.put_u16_le(0x0005); // flags3
        p.put_u32_le(0);
        p.put_i32_le(0);
        p.put_i16_le(0);
        p.put_u16_le(0);
        p
    }

    #[test]
    fn test_nav_pvt_decode() {
        let payload = nav_pvt_payload();
        assert_eq!(payload.len(), 92);
        let pvt: NavPvt = decode(&payload).unwrap();

        assert!((pvt.i_tow - 123_456.0).abs() < 1e-9);
        assert_eq!(pvt.year, 2024);
        assert_eq!(pvt.fix_type, 3);
        assert_eq!(pvt.num_sv, 12);
        assert!((pvt.lat - 37.0).abs() < 1e-9);
        assert!((pvt.lon + 122.0).abs() < 1e-9);
        assert!((pvt.height - 45.123).abs() < 1e-9);
        assert!((pvt.head_mot - 90.0).abs() < 1e-9);
        assert!((pvt.p_dop - 1.32).abs() < 1e-9);
        assert!(pvt.gnss_fix_ok());
        assert!(pvt.diff_soln());
        assert_eq!(pvt.carr_soln(), 2);
        assert!(pvt.invalid_llh());
        assert_eq!(pvt.last_correction_age(), 2);
        assert_eq!(pvt.date_str(), "15 Mar 2024");
        assert_eq!(pvt.time_str(), "12:30:45");
        assert!(pvt.to_string().contains("3D/DGNSS/FIXED"));
    }

    #[test]
    fn test_nav_pvt_truncated() {
        let payload = nav_pvt_payload();
        assert!(matches!(
            decode::<NavPvt>(&payload[..60]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_nav_svin_high_precision() {
        let mut p = Vec::new();
        p.put_u8(0);
        p.put_slice(&[0; 3]);
        p.put_u32_le(5_000);
        p.put_u32_le(120);
        p.put_i32_le(-270_000_012);
        p.put_i32_le(-430_000_000);
        p.put_i32_le(380_000_000);
        p.put_i8(-55);
        p.put_i8(12);
        p.put_i8(0);
        p.put_u8(0);
        p.put_u32_le(25_000);
        p.put_u32_le(118);
        p.put_u8(1);
        p.put_u8(1);
        p.put_u16_le(0);

        let svin: NavSvin = decode(&p).unwrap();
        assert_eq!(svin.dur, 120);
        assert_eq!(svin.obs, 118);
        assert!(svin.valid && svin.active);
        assert!((svin.mean_x - (-2_700_000.12 - 0.0055)).abs() < 1e-6);
        assert!((svin.mean_y - (-4_300_000.0 + 0.0012)).abs() < 1e-6);
        assert!((svin.mean_x_cm + 2_700_000.12).abs() < 1e-6);
        assert!((svin.mean_y_cm + 4_300_000.0).abs() < 1e-6);
        assert!((svin.mean_acc - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_cfg_tmode3_lla_scaling() {
        let mut p = Vec::new();
        p.put_u8(0);
        p.put_u8(0);
        p.put_u16_le(0x0102); // fixed, lla
        p.put_i32_le(374_000_000);
        p.put_i32_le(-1_220_000_000);
        p.put_i32_le(1_234);
        p.put_i8(50);
        p.put_i8(-50);
        p.put_i8(7);
        p.put_u8(0);
        p.put_u32_le(100);
        p.put_u32_le(0);
        p.put_u32_le(0);
        p.put_slice(&[0; 8]);

        let t: CfgTmode3 = decode(&p).unwrap();
        assert_eq!(t.mode, 2);
        assert!(t.lla);
        assert_eq!(t.mode_name(), "Fixed Mode");
        assert!((t.ecef_x_or_lat - 37.400_000_05).abs() < 1e-12);
        assert!((t.ecef_y_or_lon + 122.000_000_05).abs() < 1e-12);
        assert!((t.ecef_z_or_alt - 12.3407).abs() < 1e-9);
        assert!((t.base_x_or_lat - 37.4).abs() < 1e-12);
        assert!((t.base_y_or_lon + 122.0).abs() < 1e-12);
        assert!((t.base_z_or_alt - 12.34).abs() < 1e-9);
        assert!((t.fixed_pos_acc - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_cfg_prt_masks() {
        let mut p = Vec::new();
        p.put_u8(3);
        p.put_u8(0);
        p.put_u16_le(0);
        p.put_u32_le(0);
        p.put_u32_le(0);
        p.put_u16_le(0x23);
        p.put_u16_le(0x21);
        p.put_u16_le(0);
        p.put_u16_le(0);

        let prt: CfgPrt = decode(&p).unwrap();
        assert_eq!(prt.port(), Some(PortId::Usb));
        assert!(prt.in_ubx() && prt.in_nmea() && prt.in_rtcm3());
        assert!(prt.out_ubx() && !prt.out_nmea() && prt.out_rtcm3());
        assert!(prt.to_string().contains("Output Protocols: UBX RTCM3"));
    }

    #[test]
    fn test_mon_ver_strings() {
        let mut p = Vec::new();
        let mut field = |s: &str, width: usize| {
            let mut f = s.as_bytes().to_vec();
            f.resize(width, 0);
            p.extend_from_slice(&f);
        };
        field("EXT CORE 1.00 (61b2dd)", 30);
        field("00190000", 10);
        field("ROM BASE 0x118B2060", 30);
        field("FWVER=HPG 1.13", 30);
        field("PROTVER=27.12", 30);
        field("MOD=ZED-F9P", 30);
        field("GPS;GLO;GAL;BDS", 30);
        field("QZSS", 30);

        let ver: MonVer = decode(&p).unwrap();
        assert_eq!(ver.hw_version, "00190000");
        assert_eq!(ver.fw_ver, "FWVER=HPG 1.13");
        assert_eq!(ver.module, "MOD=ZED-F9P");
        assert_eq!(ver.gnss, "GPS;GLO;GAL;BDS;QZSS");
    }

    #[test]
    fn test_mon_hw_decode() {
        let mut p = vec![0u8; 60];
        p[16..18].copy_from_slice(&87u16.to_le_bytes());
        p[18..20].copy_from_slice(&4095u16.to_le_bytes());
        p[20] = 2; // antenna OK
        p[21] = 1; // powered
        p[22] = 0x01 | (0x01 << 2);
        p[45] = 51;
        p[48..52].copy_from_slice(&0xAABBu32.to_le_bytes());

        let hw: MonHw = decode(&p).unwrap();
        assert_eq!(hw.noise_per_ms, 87);
        assert!((hw.agc_cnt - 4095.0 / 81.91).abs() < 1e-9);
        assert_eq!(hw.antenna_status_name(), "OK");
        assert_eq!(hw.antenna_power_name(), "ON");
        assert!(hw.rtc_calib());
        assert_eq!(hw.jamming_state(), 1);
        assert!((hw.cw_suppression - 20.0).abs() < 1e-9);
        assert_eq!(hw.pin_irq, 0xAABB);
    }

    #[test]
    fn test_rxm_rawx_measurements() {
        let mut p = Vec::new();
        p.put_f64_le(345_600.5);
        p.put_u16_le(2300);
        p.put_i8(18);
        p.put_u8(2);
        p.put_u8(0x01);
        p.put_u8(1);
        p.put_u16_le(0);
        for (gnss, sig) in [(0u8, 0u8), (6, 2)] {
            p.put_f64_le(21_000_000.25);
            p.put_f64_le(110_000_000.5);
            p.put_f32_le(-1234.5);
            p.put_u8(gnss);
            p.put_u8(5);
            p.put_u8(sig);
            p.put_u8(9); // freqId 2
            p.put_u16_le(64_000);
            p.put_u8(45);
            p.put_u8(3); // prStd 0.08
            p.put_u8(2); // cpStd 0.008
            p.put_u8(4); // doStd 0.032
            p.put_u8(0x07);
            p.put_u8(0);
        }

        let rawx: RxmRawx = decode(&p).unwrap();
        assert_eq!(rawx.week, 2300);
        assert_eq!(rawx.meas.len(), 2);
        assert!(rawx.leap_sec_valid());
        assert!(!rawx.clk_reset());

        let m = &rawx.meas[1];
        assert_eq!(m.sv_name(), "R05");
        assert_eq!(m.signal(), "L2OF");
        assert_eq!(m.freq_id, 2);
        assert!((m.pr_std - 0.08).abs() < 1e-12);
        assert!((m.cp_std - 0.008).abs() < 1e-12);
        assert!((m.do_std - 0.032).abs() < 1e-12);
        assert!(m.pr_valid() && m.cp_valid() && m.half_cyc() && !m.sub_half_cyc());
        assert_eq!(rawx.meas[0].signal(), "L1C/A");
    }

    #[test]
    fn test_rxm_rawx_short_measurement_block() {
        let mut p = Vec::new();
        p.put_f64_le(0.0);
        p.put_u16_le(0);
        p.put_i8(0);
        p.put_u8(3); // claims three measurements
        p.put_slice(&[0; 4]);
        p.put_slice(&[0; 40]);
        assert!(decode::<RxmRawx>(&p).is_err());
    }
}
