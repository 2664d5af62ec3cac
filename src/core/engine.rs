//! Receiver communication engine
//!
//! The engine owns two bounded buffers. Bytes read from the receiver go into
//! the receive buffer and are drained into the protocol codecs. Locally
//! generated frames go into the write buffer and are re-validated by the
//! same detectors before being announced as [`EngineEvent::Write`].
//!
//! `ingest` and `write` never fail. Incomplete frames wait for more input,
//! corrupt frames are skipped whole, and unrecognised bytes reset the buffer.

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::protocol::{
    hex_preview, Extract, FrameCodec, NmeaCodec, Protocol, Rtcm3Codec, UbxCodec, UbxGenerator,
};

/// Bytes shown in hex dumps of dropped data
const PREVIEW_LEN: usize = 32;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Receive buffer capacity in bytes
    pub rx_capacity: usize,
    /// Write buffer capacity in bytes
    pub tx_capacity: usize,
    /// Event channel capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rx_capacity: 4096,
            tx_capacity: 4096,
            event_capacity: 4096,
        }
    }
}

/// Buffer overflow; the buffer was reset and the chunk dropped
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("buffer overflow: {incoming} bytes into {used}/{capacity} used, buffer reset")]
pub struct BufferOverflow {
    pub used: usize,
    pub incoming: usize,
    pub capacity: usize,
}

/// Fixed-capacity byte arena that frames are drained from
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: BytesMut,
    capacity: usize,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a chunk. On overflow the buffer is emptied and the chunk dropped.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), BufferOverflow> {
        if self.data.len() + chunk.len() > self.capacity {
            let err = BufferOverflow {
                used: self.data.len(),
                incoming: chunk.len(),
                capacity: self.capacity,
            };
            self.reset();
            return Err(err);
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Remove and return the first `len` bytes
    pub fn consume(&mut self, len: usize) -> Bytes {
        let len = len.min(self.data.len());
        self.data.split_to(len).freeze()
    }

    /// Drop the first `len` bytes
    pub fn discard(&mut self, len: usize) {
        let len = len.min(self.data.len());
        self.data.advance(len);
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Notifications emitted synchronously from `ingest` and `write`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A checksum-valid frame was handed to its codec
    Decoded {
        protocol: Protocol,
        frame: Bytes,
    },
    /// Cumulative frame count of a protocol after a decode
    CountUpdated {
        protocol: Protocol,
        count: u64,
    },
    /// A validated outbound frame ready for the transport
    Write(Bytes),
}

/// Which pipeline a drain runs on, for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipeline {
    Read,
    Write,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipeline::Read => f.write_str("rx"),
            Pipeline::Write => f.write_str("tx"),
        }
    }
}

/// Recovery actions taken during one drain
#[derive(Debug, Default, Clone, Copy)]
struct DrainReport {
    corrupt: u64,
    resyncs: u64,
}

/// Extract every complete frame from the head of `buffer`, in order.
///
/// Each iteration either consumes at least one byte or stops.
fn drain<F>(buffer: &mut ReceiveBuffer, pipeline: Pipeline, mut on_frame: F) -> DrainReport
where
    F: FnMut(Protocol, Bytes),
{
    let mut report = DrainReport::default();

    while let Some(&lead) = buffer.as_slice().first() {
        let Some(protocol) = Protocol::from_lead_byte(lead) else {
            warn!(
                "{}: unrecognised data, dropping {} bytes: {}",
                pipeline,
                buffer.len(),
                hex_preview(buffer.as_slice(), PREVIEW_LEN)
            );
            report.resyncs += 1;
            buffer.reset();
            break;
        };

        let detector = protocol.detector();
        match detector.try_extract(buffer.as_slice()) {
            Extract::Frame(len) => {
                let frame = buffer.consume(len);
                trace!("{}: {} frame, {} bytes", pipeline, protocol, frame.len());
                on_frame(protocol, frame);
            }
            Extract::Corrupt(len) => {
                warn!(
                    "{}: {} checksum mismatch, skipping {} bytes: {}",
                    pipeline,
                    protocol,
                    len,
                    hex_preview(&buffer.as_slice()[..len], PREVIEW_LEN)
                );
                report.corrupt += 1;
                buffer.discard(len);
            }
            Extract::Incomplete => {
                if let Some(declared) = detector.declared_len(buffer.as_slice()) {
                    if declared > buffer.capacity() {
                        warn!(
                            "{}: {} frame of {} bytes cannot fit in {} byte buffer, dropping: {}",
                            pipeline,
                            protocol,
                            declared,
                            buffer.capacity(),
                            hex_preview(buffer.as_slice(), PREVIEW_LEN)
                        );
                        report.resyncs += 1;
                        buffer.reset();
                    }
                }
                break;
            }
            Extract::Rejected => {
                debug!(
                    "{}: {} sentence failed validation, waiting for more data",
                    pipeline, protocol
                );
                break;
            }
            Extract::Unsynced => {
                warn!(
                    "{}: lost {} sync, dropping {} bytes: {}",
                    pipeline,
                    protocol,
                    buffer.len(),
                    hex_preview(buffer.as_slice(), PREVIEW_LEN)
                );
                report.resyncs += 1;
                buffer.reset();
                break;
            }
        }
    }

    report
}

/// One codec per protocol
#[derive(Debug, Default)]
pub struct Codecs {
    pub ubx: UbxCodec,
    pub rtcm3: Rtcm3Codec,
    pub nmea: NmeaCodec,
}

impl Codecs {
    pub fn get(&self, protocol: Protocol) -> &dyn FrameCodec {
        match protocol {
            Protocol::Ubx => &self.ubx,
            Protocol::Rtcm3 => &self.rtcm3,
            Protocol::Nmea => &self.nmea,
        }
    }

    pub fn get_mut(&mut self, protocol: Protocol) -> &mut dyn FrameCodec {
        match protocol {
            Protocol::Ubx => &mut self.ubx,
            Protocol::Rtcm3 => &mut self.rtcm3,
            Protocol::Nmea => &mut self.nmea,
        }
    }
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStats {
    /// Bytes accepted into the receive buffer
    pub bytes_received: u64,
    /// Frames skipped for a bad checksum or CRC
    pub corrupt_frames: u64,
    /// Full buffer resets on unrecognised data
    pub resyncs: u64,
    /// Chunks dropped because a buffer was full
    pub overflows: u64,
    /// Outbound frames validated and emitted
    pub frames_written: u64,
    /// Outbound data rejected by the write pipeline
    pub write_rejects: u64,
}

/// Multi-protocol demultiplexer with a write-side validation pipeline
pub struct Engine {
    rx: ReceiveBuffer,
    tx: ReceiveBuffer,
    codecs: Codecs,
    generator: UbxGenerator,
    events: broadcast::Sender<EngineEvent>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            rx: ReceiveBuffer::new(config.rx_capacity),
            tx: ReceiveBuffer::new(config.tx_capacity),
            codecs: Codecs::default(),
            generator: UbxGenerator::new(),
            events,
            stats: EngineStats::default(),
        }
    }

    /// Feed raw bytes read from the receiver
    pub fn ingest(&mut self, data: &[u8]) {
        if let Err(e) = self.rx.append(data) {
            warn!("rx: {}", e);
            self.stats.overflows += 1;
            return;
        }
        self.stats.bytes_received += data.len() as u64;

        let Self {
            rx, codecs, events, ..
        } = self;
        let report = drain(rx, Pipeline::Read, |protocol, frame| {
            let codec = codecs.get_mut(protocol);
            codec.decode(&frame);
            let count = codec.count();
            let _ = events.send(EngineEvent::Decoded { protocol, frame });
            let _ = events.send(EngineEvent::CountUpdated { protocol, count });
        });
        self.stats.corrupt_frames += report.corrupt;
        self.stats.resyncs += report.resyncs;
    }

    /// Validate locally generated frames and emit them as write events
    pub fn write(&mut self, data: &[u8]) {
        if let Err(e) = self.tx.append(data) {
            warn!("tx: {}", e);
            self.stats.overflows += 1;
            return;
        }

        let Self {
            tx, events, stats, ..
        } = self;
        let report = drain(tx, Pipeline::Write, |protocol, frame| {
            debug!("tx: {} frame, {} bytes", protocol, frame.len());
            stats.frames_written += 1;
            let _ = events.send(EngineEvent::Write(frame));
        });
        self.stats.write_rejects += report.corrupt + report.resyncs;
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn generator(&self) -> &UbxGenerator {
        &self.generator
    }

    pub fn codecs(&self) -> &Codecs {
        &self.codecs
    }

    pub fn ubx(&self) -> &UbxCodec {
        &self.codecs.ubx
    }

    pub fn rtcm3(&self) -> &Rtcm3Codec {
        &self.codecs.rtcm3
    }

    pub fn nmea(&self) -> &NmeaCodec {
        &self.codecs.nmea
    }

    /// Cumulative frame count of one protocol
    pub fn count(&self, protocol: Protocol) -> u64 {
        self.codecs.get(protocol).count()
    }

    /// Bytes waiting in the receive buffer
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    /// Bytes waiting in the write buffer
    pub fn pending_write(&self) -> usize {
        self.tx.len()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("buffered", &self.rx.len())
            .field("pending_write", &self.tx.len())
            .field("stats", &self.stats)
            .finish()
    }
}
