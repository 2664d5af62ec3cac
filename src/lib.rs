//! # rtkbase Core Library
//!
//! Communication engine for a u-blox GNSS receiver running as an RTK fixed
//! base station:
//! - One receive buffer demultiplexed into UBX, RTCM 3 and NMEA frames
//! - Checksum/CRC validation of every frame in both directions
//! - Typed UBX records, RTCM 3 and NMEA tallies
//! - UBX command generation and periodic polling
//! - Fixed-base configuration sequence and WGS-84 coordinate conversion
//! - Serial transport, stream capture, TOML configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use rtkbase_core::{Engine, EngineConfig, EngineEvent, Protocol};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let mut events = engine.subscribe();
//!
//! engine.ingest(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n");
//!
//! while let Ok(event) = events.try_recv() {
//!     if let EngineEvent::Decoded { protocol, frame } = event {
//!         println!("{}: {} bytes", protocol.name(), frame.len());
//!     }
//! }
//! assert_eq!(engine.count(Protocol::Nmea), 1);
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{ConfigError, StationConfig};
pub use crate::core::base_config::{fixed_base_commands, BaseConfig, PortSelection};
pub use crate::core::engine::{Engine, EngineConfig, EngineEvent, EngineStats};
pub use crate::core::geo::{Coordinate, Ecef, GeoError, Lla};
pub use crate::core::logger::{CaptureConfig, CaptureFormat, StreamLogger};
pub use crate::core::protocol::{
    DecodeError, Extract, FrameCodec, FrameDetector, NmeaCodec, Protocol, Rtcm3Codec, UbxCodec,
    UbxGenerator,
};
pub use crate::core::scheduler::{PollConfig, PollEntry, PollScheduler};
pub use crate::core::station::{Station, StationSettings};
pub use crate::core::transport::{
    SerialConfig, SerialFlowControl, SerialParity, SerialTransport, TransportError, TransportTrait,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
