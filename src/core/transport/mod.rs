//! Transport layer between the engine and the receiver
//!
//! The engine never touches I/O itself. A transport delivers raw byte
//! chunks and accepts validated outbound frames.

mod serial;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Remote end went away
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Writes performed
    pub packets_sent: u64,
    /// Non-empty reads
    pub packets_received: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Byte transport to a receiver
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Open the connection
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the connection
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Write all of `data`, returning the number of bytes written
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever is available; an empty chunk means nothing arrived yet
    async fn receive(&mut self) -> Result<Bytes, TransportError>;

    /// Human readable description of the connection
    fn connection_info(&self) -> String;

    fn stats(&self) -> TransportStats;
}
