//! Reference station
//!
//! Owns one receiver connection: the transport, the engine that decodes and
//! validates its traffic, the poll scheduler and an optional stream capture.
//! Everything that touches the engine runs on the station's own loop.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::base_config::{base_poll_entries, fixed_base_commands, BaseConfig};
use super::engine::{Engine, EngineConfig, EngineEvent};
use super::logger::{CaptureConfig, StreamLogger};
use super::scheduler::{PollConfig, PollScheduler};
use super::transport::{TransportError, TransportTrait};

/// Pause after a read that returned nothing
const IDLE_DELAY: Duration = Duration::from_millis(10);

/// Station configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSettings {
    pub engine: EngineConfig,
    pub poll: PollConfig,
    pub capture: CaptureConfig,
}

/// Outcome of one pass of the run loop
enum Step {
    Received(Bytes),
    Idle,
    Poll(Bytes),
    Failed(TransportError),
}

/// A receiver connection with its engine and scheduler
pub struct Station {
    transport: Box<dyn TransportTrait>,
    engine: Engine,
    scheduler: PollScheduler,
    poll_rx: mpsc::UnboundedReceiver<Bytes>,
    events: broadcast::Receiver<EngineEvent>,
    capture: Option<StreamLogger>,
}

impl Station {
    /// Build the engine and start the scheduler. Must be called inside a
    /// tokio runtime.
    pub fn new(settings: &StationSettings, transport: Box<dyn TransportTrait>) -> Self {
        let engine = Engine::new(settings.engine.clone());
        let events = engine.subscribe();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let scheduler = PollScheduler::start(&settings.poll, *engine.generator(), poll_tx);

        let capture = if settings.capture.enabled {
            match StreamLogger::from_config(&settings.capture) {
                Ok(logger) => Some(logger),
                Err(e) => {
                    warn!("capture disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            transport,
            engine,
            scheduler,
            poll_rx,
            events,
            capture,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &dyn TransportTrait {
        self.transport.as_ref()
    }

    pub fn capture(&self) -> Option<&StreamLogger> {
        self.capture.as_ref()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Open the transport if it is not connected yet
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if !self.transport.is_connected() {
            self.transport.connect().await?;
            info!("connected: {}", self.transport.connection_info());
        }
        Ok(())
    }

    /// Route an outbound frame through the write pipeline to the transport
    pub async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.engine.write(frame);
        self.pump_events().await
    }

    /// Send the fixed-base sequence and start polling the base records
    pub async fn configure_base(&mut self, config: &BaseConfig) -> Result<(), TransportError> {
        let frames = fixed_base_commands(config, self.engine.generator());
        info!("sending {} fixed-base commands", frames.len());
        for frame in frames {
            self.send(&frame).await?;
        }
        for entry in base_poll_entries() {
            self.scheduler.add_poll_msg(entry.class, entry.id);
        }
        self.scheduler.set_poll_interval(config.poll_interval_secs);
        Ok(())
    }

    /// Read, decode and write until `shutdown` fires or the transport fails
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), TransportError> {
        info!("station running on {}", self.transport.connection_info());

        let result = loop {
            let step = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                Some(frame) = self.poll_rx.recv() => Step::Poll(frame),
                received = self.transport.receive() => match received {
                    Ok(data) if data.is_empty() => Step::Idle,
                    Ok(data) => Step::Received(data),
                    Err(e) => Step::Failed(e),
                },
            };

            match step {
                Step::Received(data) => self.engine.ingest(&data),
                Step::Poll(frame) => self.engine.write(&frame),
                Step::Idle => tokio::time::sleep(IDLE_DELAY).await,
                Step::Failed(e) => {
                    error!("transport failed: {}", e);
                    break Err(e);
                }
            }

            if let Err(e) = self.pump_events().await {
                error!("send failed: {}", e);
                break Err(e);
            }
        };

        self.scheduler.stop();
        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.close() {
                warn!("failed to close capture: {}", e);
            }
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("disconnect failed: {}", e);
        }
        info!("station stopped");
        result
    }

    /// Forward write events to the transport and capture decoded frames
    async fn pump_events(&mut self) -> Result<(), TransportError> {
        loop {
            match self.events.try_recv() {
                Ok(EngineEvent::Write(frame)) => {
                    self.transport.send(&frame).await?;
                    if let Some(capture) = self.capture.as_mut() {
                        if let Err(e) = capture.log_tx(&frame) {
                            warn!("capture write failed: {}", e);
                        }
                    }
                }
                Ok(EngineEvent::Decoded { protocol, frame }) => {
                    if let Some(capture) = self.capture.as_mut() {
                        if let Err(e) = capture.log_rx(protocol, &frame) {
                            warn!("capture write failed: {}", e);
                        }
                    }
                }
                Ok(EngineEvent::CountUpdated { .. }) => {}
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("station lagged behind engine by {} events", missed);
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ubx::{cfg, class, mon};
    use crate::core::protocol::{nmea::build_sentence, Protocol, UbxGenerator};
    use crate::core::scheduler::PollEntry;
    use crate::core::transport::MockTransportTrait;
    use std::sync::{Arc, Mutex};

    fn settings() -> StationSettings {
        StationSettings::default()
    }

    fn quiet_mock() -> MockTransportTrait {
        let mut mock = MockTransportTrait::new();
        mock.expect_connection_info()
            .returning(|| "mock".to_string());
        mock.expect_disconnect().returning(|| Ok(()));
        mock
    }

    #[tokio::test]
    async fn test_send_validates_before_transport() {
        let sent = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let sink = sent.clone();
        let mut mock = quiet_mock();
        mock.expect_send().returning(move |data: &[u8]| {
            sink.lock().unwrap().push(data.to_vec());
            Ok(data.len())
        });

        let mut station = Station::new(&settings(), Box::new(mock));
        let poll = UbxGenerator::new().poll(class::MON, mon::VER);
        station.send(&poll).await.unwrap();
        station.send(b"not a frame").await.unwrap();

        assert_eq!(*sent.lock().unwrap(), vec![poll.to_vec()]);
        assert_eq!(station.engine().stats().write_rejects, 1);
    }

    #[tokio::test]
    async fn test_run_decodes_until_shutdown() {
        let sentence = build_sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let mut mock = quiet_mock();
        let first = Bytes::from(sentence.into_bytes());
        let mut calls = 0;
        mock.expect_receive().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(first.clone())
            } else {
                stop.cancel();
                Ok(Bytes::new())
            }
        });

        let mut station = Station::new(&settings(), Box::new(mock));
        let mut events = station.subscribe();
        station.run(shutdown).await.unwrap();

        assert_eq!(station.engine().count(Protocol::Nmea), 1);
        assert_eq!(station.engine().nmea().sentences().get("GPGGA"), Some(&1));
        assert!(matches!(
            events.try_recv(),
            Ok(EngineEvent::Decoded { protocol: Protocol::Nmea, .. })
        ));
        assert!(!station.scheduler().is_running());
    }

    #[tokio::test]
    async fn test_run_stops_on_transport_error() {
        let mut mock = quiet_mock();
        mock.expect_receive()
            .returning(|| Err(TransportError::Disconnected));

        let mut station = Station::new(&settings(), Box::new(mock));
        let result = station.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_polls_reach_transport() {
        let sent = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let sink = sent.clone();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let mut mock = quiet_mock();
        mock.expect_receive().returning(|| Ok(Bytes::new()));
        mock.expect_send().returning(move |data: &[u8]| {
            let mut sent = sink.lock().unwrap();
            sent.push(data.to_vec());
            stop.cancel();
            Ok(data.len())
        });

        let mut config = settings();
        config.poll.entries = vec![PollEntry::new(class::CFG, cfg::TMODE3)];
        let mut station = Station::new(&config, Box::new(mock));
        station.run(shutdown).await.unwrap();

        assert_eq!(
            *sent.lock().unwrap(),
            vec![UbxGenerator::new().poll(class::CFG, cfg::TMODE3).to_vec()]
        );
    }

    #[tokio::test]
    async fn test_configure_base_registers_polls() {
        let count = Arc::new(Mutex::new(0usize));
        let counter = count.clone();
        let mut mock = quiet_mock();
        mock.expect_send().returning(move |data: &[u8]| {
            *counter.lock().unwrap() += 1;
            Ok(data.len())
        });

        let mut station = Station::new(&settings(), Box::new(mock));
        station.configure_base(&BaseConfig::default()).await.unwrap();

        assert_eq!(*count.lock().unwrap(), 32);
        assert_eq!(station.scheduler().entries(), base_poll_entries());
        assert_eq!(station.scheduler().poll_interval(), 30);
    }
}
