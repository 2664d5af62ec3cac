//! Stream capture
//!
//! Records validated frames to timestamped files so that a session can be
//! replayed through the engine later.

use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::protocol::Protocol;

/// Capture file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Received frames back to back, exactly as on the wire. Sent frames
    /// are left out so the file replays as receiver output.
    #[default]
    Raw,
    /// One timestamped hex line per frame
    Hex,
    /// One JSON object per frame
    JsonLines,
}

impl CaptureFormat {
    /// Get file extension for format
    pub fn extension(&self) -> &'static str {
        match self {
            CaptureFormat::Raw => "ubx",
            CaptureFormat::Hex => "hex",
            CaptureFormat::JsonLines => "jsonl",
        }
    }

    pub fn all() -> &'static [CaptureFormat] {
        &[CaptureFormat::Raw, CaptureFormat::Hex, CaptureFormat::JsonLines]
    }
}

/// Data direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Received,
    Sent,
}

impl Direction {
    fn tag(&self) -> &'static str {
        match self {
            Direction::Received => "RX",
            Direction::Sent => "TX",
        }
    }
}

/// A single captured frame
#[derive(Debug, Clone, Serialize)]
pub struct CaptureEntry<'a> {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub protocol: Option<Protocol>,
    #[serde(serialize_with = "as_hex")]
    pub data: &'a [u8],
}

fn as_hex<S: serde::Serializer>(data: &&[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(data))
}

impl CaptureEntry<'_> {
    /// Format as a hex line
    pub fn to_hex(&self) -> String {
        let hex: String = self.data.iter().map(|b| format!("{:02X} ", b)).collect();
        let protocol = self.protocol.map(|p| p.name()).unwrap_or("-");
        format!(
            "[{}] {} {:<5} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.direction.tag(),
            protocol,
            hex.trim_end()
        )
    }
}

/// Capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub prefix: String,
    pub format: CaptureFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("captures"),
            prefix: "rtkbase".to_string(),
            format: CaptureFormat::Raw,
        }
    }
}

/// Frame capture to disk
pub struct StreamLogger {
    file: Option<BufWriter<File>>,
    format: CaptureFormat,
    path: Option<PathBuf>,
    start_time: Option<DateTime<Local>>,
    bytes_logged: u64,
    frames_logged: u64,
}

impl Default for StreamLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamLogger {
    /// Create new logger (not capturing yet)
    pub fn new() -> Self {
        Self {
            file: None,
            format: CaptureFormat::Raw,
            path: None,
            start_time: None,
            bytes_logged: 0,
            frames_logged: 0,
        }
    }

    /// Open a capture file described by `config`
    pub fn from_config(config: &CaptureConfig) -> io::Result<Self> {
        let mut logger = Self::new();
        logger.start(&config.directory, &config.prefix, config.format)?;
        Ok(logger)
    }

    /// Start capturing into a new timestamped file in `dir`
    pub fn start(&mut self, dir: &Path, prefix: &str, format: CaptureFormat) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let now = Local::now();
        let path = dir.join(capture_filename(prefix, format, &now));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        self.file = Some(BufWriter::new(file));
        self.format = format;
        self.path = Some(path.clone());
        self.start_time = Some(now);
        self.bytes_logged = 0;
        self.frames_logged = 0;
        info!("capturing to {}", path.display());

        Ok(path)
    }

    /// Flush and close the capture file
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            debug!(
                "capture closed after {} frames, {} bytes",
                self.frames_logged, self.bytes_logged
            );
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.start_time
    }

    /// Bytes of frame data written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_logged
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_logged
    }

    /// Append one frame
    pub fn log(&mut self, direction: Direction, protocol: Option<Protocol>, data: &Bytes) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        if self.format == CaptureFormat::Raw && direction == Direction::Sent {
            return Ok(());
        }

        let entry = CaptureEntry {
            timestamp: Local::now(),
            direction,
            protocol,
            data,
        };
        match self.format {
            CaptureFormat::Raw => file.write_all(data)?,
            CaptureFormat::Hex => writeln!(file, "{}", entry.to_hex())?,
            CaptureFormat::JsonLines => {
                serde_json::to_writer(&mut *file, &entry).map_err(io::Error::other)?;
                file.write_all(b"\n")?;
            }
        }

        self.bytes_logged += data.len() as u64;
        self.frames_logged += 1;
        if self.frames_logged % 100 == 0 {
            file.flush()?;
        }
        Ok(())
    }

    pub fn log_rx(&mut self, protocol: Protocol, data: &Bytes) -> io::Result<()> {
        self.log(Direction::Received, Some(protocol), data)
    }

    pub fn log_tx(&mut self, data: &Bytes) -> io::Result<()> {
        self.log(Direction::Sent, None, data)
    }
}

impl Drop for StreamLogger {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Capture filename: `<prefix>-YYYYMMDD-HHMMSS.<ext>`
pub fn capture_filename(prefix: &str, format: CaptureFormat, at: &DateTime<Local>) -> String {
    format!("{}-{}.{}", prefix, at.format("%Y%m%d-%H%M%S"), format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_filename() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            capture_filename("base", CaptureFormat::Raw, &at),
            "base-20240309-070501.ubx"
        );
        assert_eq!(
            capture_filename("base", CaptureFormat::JsonLines, &at),
            "base-20240309-070501.jsonl"
        );
    }

    #[test]
    fn test_raw_capture_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let mut logger = StreamLogger::new();
        assert!(!logger.is_open());

        let path = logger.start(&nested, "test", CaptureFormat::Raw).unwrap();
        assert!(logger.is_open());
        assert!(logger.start_time().is_some());

        logger.log_rx(Protocol::Ubx, &Bytes::from_static(&[0xB5, 0x62, 1])).unwrap();
        logger.log_rx(Protocol::Rtcm3, &Bytes::from_static(&[0xD3, 0x00])).unwrap();
        assert_eq!(logger.bytes_written(), 5);
        logger.close().unwrap();
        assert!(!logger.is_open());

        assert_eq!(std::fs::read(&path).unwrap(), vec![0xB5, 0x62, 1, 0xD3, 0x00]);
        assert_eq!(logger.path(), Some(path.as_path()));
    }

    #[test]
    fn test_raw_capture_replays_without_sent_frames() {
        use crate::core::engine::Engine;
        use crate::core::protocol::ubx::{cfg, class, mon};
        use crate::core::protocol::UbxGenerator;

        let gen = UbxGenerator::new();
        let poll = gen.poll(class::CFG, cfg::TMODE3);
        let reply = gen.generate_message(class::MON, mon::VER, &[0u8; 40]);

        let dir = tempfile::tempdir().unwrap();
        let mut logger = StreamLogger::new();
        let path = logger.start(dir.path(), "poll", CaptureFormat::Raw).unwrap();
        for _ in 0..3 {
            logger.log_tx(&poll).unwrap();
            logger.log_rx(Protocol::Ubx, &reply).unwrap();
        }
        assert_eq!(logger.frames_written(), 3);
        logger.close().unwrap();

        let mut engine = Engine::default();
        engine.ingest(&std::fs::read(&path).unwrap());
        assert_eq!(engine.count(Protocol::Ubx), 3);
        assert_eq!(engine.ubx().mon_ver().count(), 3);
        assert!(!engine.ubx().cfg_tmode3().has_data());
    }

    #[test]
    fn test_hex_capture_keeps_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = StreamLogger::new();
        let path = logger.start(dir.path(), "h", CaptureFormat::Hex).unwrap();
        logger.log_tx(&Bytes::from_static(&[0xB5, 0x62])).unwrap();
        logger.log_rx(Protocol::Rtcm3, &Bytes::from_static(&[0xD3, 0x00])).unwrap();
        logger.close().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" TX "));
        assert!(lines[1].contains(" RX "));
    }

    #[test]
    fn test_jsonl_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = StreamLogger::new();
        let path = logger.start(dir.path(), "j", CaptureFormat::JsonLines).unwrap();
        logger.log_rx(Protocol::Rtcm3, &Bytes::from_static(&[0xD3, 0xAB])).unwrap();
        logger.close().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["protocol"], "Rtcm3");
        assert_eq!(value["direction"], "Received");
        assert_eq!(value["data"], "d3ab");
    }

    #[test]
    fn test_hex_line() {
        let entry = CaptureEntry {
            timestamp: Local::now(),
            direction: Direction::Sent,
            protocol: Some(Protocol::Ubx),
            data: &[0xB5, 0x62],
        };
        assert!(entry.to_hex().ends_with("TX UBX   B5 62"));
    }

    #[test]
    fn test_log_without_file_is_noop() {
        let mut logger = StreamLogger::new();
        logger.log_rx(Protocol::Nmea, &Bytes::from_static(b"$GP")).unwrap();
        assert_eq!(logger.frames_written(), 0);
    }
}
