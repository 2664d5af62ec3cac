//! WGS-84 coordinate conversion
//!
//! Geodetic latitude/longitude/altitude to earth-centred earth-fixed (ECEF)
//! and back, plus parsing of user supplied coordinate text.

use regex::Regex;
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// Semi-minor axis (m)
pub const WGS84_B: f64 = 6_356_752.3142;

const FEET_PER_METRE: f64 = 3.28084;

fn e2() -> f64 {
    (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_A * WGS84_A)
}

fn ep2() -> f64 {
    (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B)
}

/// Coordinate parsing errors
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("no number in coordinate '{0}'")]
    NoNumber(String),

    #[error("invalid altitude '{0}'")]
    InvalidAltitude(String),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Earth-centred earth-fixed position (m)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Ecef {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Geodetic position (deg, deg, m above ellipsoid)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Lla {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// Prime vertical radius of curvature at `lat` (radians)
fn prime_vertical(lat: f64) -> f64 {
    let s = lat.sin();
    WGS84_A / (1.0 - e2() * s * s).sqrt()
}

/// Geodetic degrees to ECEF
pub fn project(lat: f64, lon: f64, alt: f64) -> Ecef {
    let lat = lat.to_radians();
    let lon = lon.to_radians();
    let n = prime_vertical(lat);
    let ratio = (WGS84_B * WGS84_B) / (WGS84_A * WGS84_A);

    Ecef {
        x: (n + alt) * lat.cos() * lon.cos(),
        y: (n + alt) * lat.cos() * lon.sin(),
        z: (ratio * n + alt) * lat.sin(),
    }
}

/// ECEF to geodetic degrees (Bowring, closed form)
pub fn unproject(ecef: Ecef) -> Lla {
    let Ecef { x, y, z } = ecef;
    let p = (x * x + y * y).sqrt();
    let theta = (z * WGS84_A).atan2(p * WGS84_B);
    let (st, ct) = theta.sin_cos();

    let lat = (z + ep2() * WGS84_B * st * st * st).atan2(p - e2() * WGS84_A * ct * ct * ct);
    let lon = y.atan2(x);
    let alt = if lat.cos().abs() > 1e-12 {
        p / lat.cos() - prime_vertical(lat)
    } else {
        z.abs() - WGS84_B
    };

    Lla {
        lat: lat * 180.0 / PI,
        lon: lon * 180.0 / PI,
        alt,
    }
}

static NUMBER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[-+]?\d*\.?\d+"));

/// Parse an angle written as decimal degrees or `D M S`, with optional
/// hemisphere letters (`S` and `W` negate).
pub fn parse_geodetic(text: &str) -> Result<f64, GeoError> {
    let upper = text.to_uppercase();
    let number = NUMBER.as_ref().map_err(|e| e.clone())?;
    let parts: Vec<f64> = number
        .find_iter(&upper)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();

    let Some(&first) = parts.first() else {
        return Err(GeoError::NoNumber(text.to_string()));
    };

    let mut sign = if upper.contains('S') || upper.contains('W') {
        -1.0
    } else {
        1.0
    };
    if first < 0.0 {
        sign = -sign;
    }

    let minutes = parts.get(1).map_or(0.0, |m| m / 60.0);
    let seconds = parts.get(2).map_or(0.0, |s| s / 3600.0);
    Ok((first.abs() + minutes + seconds) * sign)
}

/// Split decimal degrees into whole degrees (signed), minutes and seconds
pub fn deg_to_dms(deg: f64) -> (f64, f64, f64) {
    let sign = if deg < 0.0 { -1.0 } else { 1.0 };
    let abs = deg.abs();
    let d = abs.floor();
    let m = ((abs - d) * 60.0).floor();
    let s = (abs - d - m / 60.0) * 3600.0;
    (d * sign, m, s)
}

/// Format as `N 37° 30' 00.0000"` (or E/W when `is_lat` is false)
pub fn format_dms(deg: f64, is_lat: bool) -> String {
    let (d, m, s) = deg_to_dms(deg);
    let hemisphere = match (is_lat, deg < 0.0) {
        (true, false) => 'N',
        (true, true) => 'S',
        (false, false) => 'E',
        (false, true) => 'W',
    };
    format!("{} {:02}° {:02}' {:07.4}\"", hemisphere, d.abs(), m, s)
}

/// A position known in both representations
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Coordinate {
    pub lla: Lla,
    pub ecef: Ecef,
    /// Parsed from ECEF input rather than geodetic input
    pub was_ecef: bool,
}

impl Coordinate {
    pub fn from_lla(lat: f64, lon: f64, alt: f64) -> Self {
        Self {
            lla: Lla { lat, lon, alt },
            ecef: project(lat, lon, alt),
            was_ecef: false,
        }
    }

    pub fn from_ecef(x: f64, y: f64, z: f64) -> Self {
        let ecef = Ecef { x, y, z };
        Self {
            lla: unproject(ecef),
            ecef,
            was_ecef: true,
        }
    }

    /// Parse three text fields. Plain numbers with |x| or |y| above 180 are
    /// ECEF metres; anything else is latitude, longitude and altitude.
    pub fn parse(x: &str, y: &str, z: &str) -> Result<Self, GeoError> {
        let numeric = (
            x.trim().parse::<f64>(),
            y.trim().parse::<f64>(),
            z.trim().parse::<f64>(),
        );
        if let (Ok(x), Ok(y), Ok(z)) = numeric {
            if x.abs() > 180.0 || y.abs() > 180.0 {
                return Ok(Self::from_ecef(x, y, z));
            }
        }

        let lat = parse_geodetic(x)?;
        let lon = parse_geodetic(y)?;
        let alt = match z.trim() {
            "" => 0.0,
            text => text
                .parse()
                .map_err(|_| GeoError::InvalidAltitude(text.to_string()))?,
        };
        Ok(Self::from_lla(lat, lon, alt))
    }

    pub fn alt_feet(&self) -> f64 {
        self.lla.alt * FEET_PER_METRE
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lat:    {:>15.9}  {}", self.lla.lat, format_dms(self.lla.lat, true))?;
        writeln!(f, "Lon:    {:>15.9}  {}", self.lla.lon, format_dms(self.lla.lon, false))?;
        writeln!(f, "Alt:    {:>15.4} m", self.lla.alt)?;
        writeln!(f, "ECEF X: {:>15.4} m", self.ecef.x)?;
        writeln!(f, "ECEF Y: {:>15.4} m", self.ecef.y)?;
        write!(f, "ECEF Z: {:>15.4} m", self.ecef.z)
    }
}
