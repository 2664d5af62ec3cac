//! Core module containing the receiver communication engine
//!
//! This module provides:
//! - Protocol detectors, codecs and the UBX command generator
//! - The demultiplexing engine with its write-side validation
//! - Periodic poll scheduling
//! - Station wiring of transport, engine and scheduler
//! - Transport layer (serial)
//! - Fixed-base configuration and coordinate conversion
//! - Stream capture to disk

pub mod base_config;
pub mod engine;
pub mod geo;
pub mod logger;
pub mod protocol;
pub mod scheduler;
pub mod station;
pub mod transport;
