//! NMEA 0183 sentence detection and parsing
//!
//! A sentence is `$` or `!`, comma separated fields, `*hh` checksum and a
//! CR LF terminator. Every valid sentence is tallied by its address field
//! (talker + formatter, e.g. `GPGGA`).
//!
//! Typed sentences:
//! - GGA: Global Positioning System Fix Data
//! - RMC: Recommended Minimum Navigation Information
//! - GSV: Satellites in View
//! - GSA: GNSS DOP and Active Satellites
//! - VTG: Track Made Good and Ground Speed
//! - GLL: Geographic Position - Latitude/Longitude
//! - ZDA: Time & Date

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::debug;

use super::checksum::nmea_checksum;
use super::{Extract, FrameCodec, FrameDetector, Protocol, Tracked};

/// Shortest accepted sentence, `$xx*hh` plus terminator
pub const MIN_SENTENCE_LEN: usize = 8;
/// Bytes after `*`: two hex digits and CR LF
const TRAILER_LEN: usize = 5;

/// Sentence formatters with a typed record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NmeaSentenceType {
    GGA,
    RMC,
    GSV,
    GSA,
    VTG,
    GLL,
    ZDA,
    Unknown(String),
}

impl NmeaSentenceType {
    /// Classify an address field such as `GNGGA` by its last three letters
    pub fn from_address(address: &str) -> Self {
        let formatter = match address.len().checked_sub(3) {
            Some(start) if address.len() >= 5 && !address.starts_with('P') => {
                address.get(start..).unwrap_or(address)
            }
            _ => address,
        };
        match formatter.to_ascii_uppercase().as_str() {
            "GGA" => Self::GGA,
            "RMC" => Self::RMC,
            "GSV" => Self::GSV,
            "GSA" => Self::GSA,
            "VTG" => Self::VTG,
            "GLL" => Self::GLL,
            "ZDA" => Self::ZDA,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// GPS fix quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GpsFixQuality {
    #[default]
    Invalid = 0,
    GpsFix = 1,
    DgpsFix = 2,
    PpsFix = 3,
    Rtk = 4,
    FloatRtk = 5,
    Estimated = 6,
    Manual = 7,
    Simulation = 8,
}

impl From<u8> for GpsFixQuality {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::GpsFix,
            2 => Self::DgpsFix,
            3 => Self::PpsFix,
            4 => Self::Rtk,
            5 => Self::FloatRtk,
            6 => Self::Estimated,
            7 => Self::Manual,
            8 => Self::Simulation,
            _ => Self::Invalid,
        }
    }
}

/// GPS fix mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GpsFixMode {
    #[default]
    NotAvailable,
    Fix2D,
    Fix3D,
}

/// Geographic coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Coordinate {
    pub degrees: f64,
    /// N/S for latitude, E/W for longitude
    pub direction: char,
}

impl Coordinate {
    /// Parse NMEA coordinate format (DDDMM.MMMM)
    pub fn parse(value: &str, direction: &str) -> Option<Self> {
        if value.is_empty() || direction.is_empty() {
            return None;
        }

        let value: f64 = value.parse().ok()?;
        let dir = direction.chars().next()?;

        let degrees = (value / 100.0).floor();
        let minutes = value - (degrees * 100.0);

        Some(Self {
            degrees: degrees + (minutes / 60.0),
            direction: dir,
        })
    }

    /// Get signed decimal degrees
    pub fn to_decimal(&self) -> f64 {
        match self.direction {
            'S' | 'W' => -self.degrees,
            _ => self.degrees,
        }
    }
}

/// Satellite information
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SatelliteInfo {
    pub prn: u8,
    pub elevation: Option<u8>,
    pub azimuth: Option<u16>,
    pub snr: Option<u8>,
}

/// Parsed GGA sentence (Fix Data)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GgaData {
    pub time: Option<NaiveTime>,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub fix_quality: GpsFixQuality,
    pub satellites_used: u8,
    pub hdop: Option<f32>,
    pub altitude: Option<f32>,
    pub geoid_separation: Option<f32>,
    pub dgps_age: Option<f32>,
    pub dgps_station_id: Option<u16>,
}

/// Parsed RMC sentence (Recommended Minimum)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RmcData {
    pub time: Option<NaiveTime>,
    /// A=Active, V=Void
    pub status: char,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub speed_knots: Option<f32>,
    pub course: Option<f32>,
    pub date: Option<NaiveDate>,
    pub magnetic_variation: Option<f32>,
    pub mode: char,
}

/// Parsed GSV sentence (Satellites in View)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GsvData {
    pub total_messages: u8,
    pub message_number: u8,
    pub satellites_in_view: u8,
    pub satellites: Vec<SatelliteInfo>,
}

/// Parsed GSA sentence (DOP and Active Satellites)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GsaData {
    /// M=Manual, A=Automatic
    pub mode: char,
    pub fix_mode: GpsFixMode,
    pub satellite_prns: Vec<u8>,
    pub pdop: Option<f32>,
    pub hdop: Option<f32>,
    pub vdop: Option<f32>,
}

/// Parsed VTG sentence (Track and Ground Speed)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VtgData {
    pub track_true: Option<f32>,
    pub track_magnetic: Option<f32>,
    pub speed_knots: Option<f32>,
    pub speed_kmh: Option<f32>,
    pub mode: char,
}

/// Parsed GLL sentence (Geographic Position)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GllData {
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub time: Option<NaiveTime>,
    pub status: char,
    pub mode: char,
}

/// Parsed ZDA sentence (Time and Date)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZdaData {
    pub time: Option<NaiveTime>,
    pub day: Option<u8>,
    pub month: Option<u8>,
    pub year: Option<u16>,
    pub local_zone_hours: Option<i8>,
    pub local_zone_minutes: Option<u8>,
}

// ============ Frame detection ============

/// Finds complete, checksum-valid sentences at the head of a buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct NmeaDetector;

fn hex_value(digits: &[u8]) -> Option<u8> {
    if digits.len() != 2 || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    u8::from_str_radix(text, 16).ok()
}

impl FrameDetector for NmeaDetector {
    fn protocol(&self) -> Protocol {
        Protocol::Nmea
    }

    fn try_extract(&self, buf: &[u8]) -> Extract {
        if buf.is_empty() || (buf[0] != b'$' && buf[0] != b'!') {
            return Extract::Unsynced;
        }
        let Some(star) = buf.iter().position(|&b| b == b'*') else {
            return Extract::Incomplete;
        };
        let total = star + TRAILER_LEN;
        if buf.len() < total {
            return Extract::Incomplete;
        }
        if total < MIN_SENTENCE_LEN {
            return Extract::Rejected;
        }

        let terminated = buf[star + 3..total].iter().all(u8::is_ascii_whitespace);
        match hex_value(&buf[star + 1..star + 3]) {
            Some(expected) if terminated && nmea_checksum(&buf[1..star]) == expected => {
                Extract::Frame(total)
            }
            _ => Extract::Rejected,
        }
    }
}

// ============ Decoding ============

/// Tallies sentences and keeps the last value of each typed sentence
#[derive(Debug, Default)]
pub struct NmeaCodec {
    count: u64,
    sentences: BTreeMap<String, u64>,
    gga: Tracked<GgaData>,
    rmc: Tracked<RmcData>,
    gsv: Tracked<GsvData>,
    gsa: Tracked<GsaData>,
    vtg: Tracked<VtgData>,
    gll: Tracked<GllData>,
    zda: Tracked<ZdaData>,
    /// Accumulated satellites from the current GSV cycle
    satellites: Vec<SatelliteInfo>,
}

/// Field accessor tolerant of missing trailing fields
struct Fields<'a>(Vec<&'a str>);

impl<'a> Fields<'a> {
    fn get(&self, index: usize) -> &'a str {
        self.0.get(index).copied().unwrap_or("")
    }

    fn parse<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.get(index).parse().ok()
    }

    fn char_at(&self, index: usize, default: char) -> char {
        self.get(index).chars().next().unwrap_or(default)
    }

    fn coordinate(&self, value: usize) -> Option<Coordinate> {
        Coordinate::parse(self.get(value), self.get(value + 1))
    }

    fn time(&self, index: usize) -> Option<NaiveTime> {
        parse_time(self.get(index))
    }
}

/// Parse time from HHMMSS.sss format
fn parse_time(s: &str) -> Option<NaiveTime> {
    if s.len() < 6 {
        return None;
    }

    let hours: u32 = s.get(0..2)?.parse().ok()?;
    let minutes: u32 = s.get(2..4)?.parse().ok()?;
    let seconds: f64 = s.get(4..)?.parse().ok()?;

    let secs = seconds.floor() as u32;
    let nanos = ((seconds - seconds.floor()) * 1_000_000_000.0).round() as u32;

    NaiveTime::from_hms_nano_opt(hours, minutes, secs, nanos)
}

/// Parse date from DDMMYY format
fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 {
        return None;
    }

    let day: u32 = s.get(0..2)?.parse().ok()?;
    let month: u32 = s.get(2..4)?.parse().ok()?;
    let year: i32 = s.get(4..6)?.parse().ok()?;

    let full_year = if year > 80 { 1900 + year } else { 2000 + year };

    NaiveDate::from_ymd_opt(full_year, month, day)
}

impl NmeaCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-sentence counts keyed by address field
    pub fn sentences(&self) -> &BTreeMap<String, u64> {
        &self.sentences
    }

    pub fn gga(&self) -> &Tracked<GgaData> {
        &self.gga
    }

    pub fn rmc(&self) -> &Tracked<RmcData> {
        &self.rmc
    }

    pub fn gsv(&self) -> &Tracked<GsvData> {
        &self.gsv
    }

    pub fn gsa(&self) -> &Tracked<GsaData> {
        &self.gsa
    }

    pub fn vtg(&self) -> &Tracked<VtgData> {
        &self.vtg
    }

    pub fn gll(&self) -> &Tracked<GllData> {
        &self.gll
    }

    pub fn zda(&self) -> &Tracked<ZdaData> {
        &self.zda
    }

    /// Satellites collected across the GSV sentences seen so far
    pub fn satellites(&self) -> &[SatelliteInfo] {
        &self.satellites
    }

    /// Current position in signed decimal degrees, from GGA then RMC
    pub fn position(&self) -> Option<(f64, f64)> {
        if let (Some(lat), Some(lon)) = (&self.gga.latitude, &self.gga.longitude) {
            return Some((lat.to_decimal(), lon.to_decimal()));
        }
        if let (Some(lat), Some(lon)) = (&self.rmc.latitude, &self.rmc.longitude) {
            return Some((lat.to_decimal(), lon.to_decimal()));
        }
        None
    }

    /// Decode one sentence body (between the start character and `*`)
    fn parse_body(&mut self, body: &str) {
        let fields = Fields(body.split(',').collect());
        let address = fields.get(0);
        if address.is_empty() {
            debug!("NMEA sentence without address field");
            return;
        }
        *self.sentences.entry(address.to_string()).or_insert(0) += 1;

        match NmeaSentenceType::from_address(address) {
            NmeaSentenceType::GGA => self.gga.update(parse_gga(&fields)),
            NmeaSentenceType::RMC => self.rmc.update(parse_rmc(&fields)),
            NmeaSentenceType::GSV => {
                let gsv = parse_gsv(&fields);
                if gsv.message_number <= 1 {
                    self.satellites.clear();
                }
                self.satellites.extend(gsv.satellites.iter().cloned());
                self.gsv.update(gsv);
            }
            NmeaSentenceType::GSA => self.gsa.update(parse_gsa(&fields)),
            NmeaSentenceType::VTG => self.vtg.update(parse_vtg(&fields)),
            NmeaSentenceType::GLL => self.gll.update(parse_gll(&fields)),
            NmeaSentenceType::ZDA => self.zda.update(parse_zda(&fields)),
            NmeaSentenceType::Unknown(_) => {}
        }
    }
}

impl FrameCodec for NmeaCodec {
    fn decode(&mut self, frame: &[u8]) {
        self.count += 1;
        let end = frame.iter().position(|&b| b == b'*').unwrap_or(frame.len());
        let body = frame.get(1..end).unwrap_or_default();
        if !body.is_ascii() {
            debug!("NMEA sentence with non-ASCII body, fields not parsed");
            return;
        }
        let body = String::from_utf8_lossy(body);
        self.parse_body(&body);
    }

    fn count(&self) -> u64 {
        self.count
    }
}

fn parse_gga(f: &Fields<'_>) -> GgaData {
    GgaData {
        time: f.time(1),
        latitude: f.coordinate(2),
        longitude: f.coordinate(4),
        fix_quality: f.parse::<u8>(6).unwrap_or(0).into(),
        satellites_used: f.parse(7).unwrap_or(0),
        hdop: f.parse(8),
        altitude: f.parse(9),
        geoid_separation: f.parse(11),
        dgps_age: f.parse(13),
        dgps_station_id: f.parse(14),
    }
}

fn parse_rmc(f: &Fields<'_>) -> RmcData {
    let variation: Option<f32> = f.parse(10);
    RmcData {
        time: f.time(1),
        status: f.char_at(2, 'V'),
        latitude: f.coordinate(3),
        longitude: f.coordinate(5),
        speed_knots: f.parse(7),
        course: f.parse(8),
        date: parse_date(f.get(9)),
        magnetic_variation: variation.map(|v| if f.get(11) == "W" { -v } else { v }),
        mode: f.char_at(12, ' '),
    }
}

fn parse_gsv(f: &Fields<'_>) -> GsvData {
    let mut data = GsvData {
        total_messages: f.parse(1).unwrap_or(1),
        message_number: f.parse(2).unwrap_or(1),
        satellites_in_view: f.parse(3).unwrap_or(0),
        satellites: Vec::new(),
    };

    // Up to four satellites per sentence, an optional signal id may follow
    let mut i = 4;
    while i + 3 < f.0.len() {
        if let Some(prn) = f.parse(i) {
            data.satellites.push(SatelliteInfo {
                prn,
                elevation: f.parse(i + 1),
                azimuth: f.parse(i + 2),
                snr: f.parse(i + 3),
            });
        }
        i += 4;
    }

    data
}

fn parse_gsa(f: &Fields<'_>) -> GsaData {
    GsaData {
        mode: f.char_at(1, 'A'),
        fix_mode: match f.parse::<u8>(2).unwrap_or(1) {
            2 => GpsFixMode::Fix2D,
            3 => GpsFixMode::Fix3D,
            _ => GpsFixMode::NotAvailable,
        },
        satellite_prns: (3..=14)
            .filter_map(|i| f.parse::<u8>(i))
            .filter(|&prn| prn > 0)
            .collect(),
        pdop: f.parse(15),
        hdop: f.parse(16),
        vdop: f.parse(17),
    }
}

fn parse_vtg(f: &Fields<'_>) -> VtgData {
    VtgData {
        track_true: f.parse(1),
        track_magnetic: f.parse(3),
        speed_knots: f.parse(5),
        speed_kmh: f.parse(7),
        mode: f.char_at(9, ' '),
    }
}

fn parse_gll(f: &Fields<'_>) -> GllData {
    GllData {
        latitude: f.coordinate(1),
        longitude: f.coordinate(3),
        time: f.time(5),
        status: f.char_at(6, 'V'),
        mode: f.char_at(7, ' '),
    }
}

fn parse_zda(f: &Fields<'_>) -> ZdaData {
    ZdaData {
        time: f.time(1),
        day: f.parse(2),
        month: f.parse(3),
        year: f.parse(4),
        local_zone_hours: f.parse(5),
        local_zone_minutes: f.parse(6),
    }
}

/// Build a complete sentence with checksum and CR LF from its body
pub fn build_sentence(body: &str) -> String {
    format!("${}*{:02X}\r\n", body, nmea_checksum(body.as_bytes()))
}
