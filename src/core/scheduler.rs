//! Poll scheduler
//!
//! Re-issues UBX poll requests for a configurable list of messages on a
//! repeating timer, so that slowly changing receiver state stays fresh
//! without continuous push traffic. Generated frames are handed to the
//! owner through a channel and go through the engine's write pipeline there.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::protocol::UbxGenerator;

/// Shortest poll period; shorter settings are raised to this
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;

fn clamp_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_POLL_INTERVAL_SECS))
}

/// One polled message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollEntry {
    pub class: u8,
    pub id: u8,
}

impl PollEntry {
    pub fn new(class: u8, id: u8) -> Self {
        Self { class, id }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Period between poll rounds in seconds
    pub interval_secs: u64,
    /// Delay before the first round in milliseconds
    pub initial_delay_ms: u64,
    /// Messages polled each round
    pub entries: Vec<PollEntry>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            initial_delay_ms: 1000,
            entries: Vec::new(),
        }
    }
}

/// Repeating poll task
pub struct PollScheduler {
    entries: Arc<RwLock<Vec<PollEntry>>>,
    interval: Arc<RwLock<Duration>>,
    restart: Arc<Notify>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollScheduler {
    /// Spawn the poll task. Must be called inside a tokio runtime.
    pub fn start(
        config: &PollConfig,
        generator: UbxGenerator,
        frames: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        let entries = Arc::new(RwLock::new(config.entries.clone()));
        let interval = Arc::new(RwLock::new(clamp_interval(config.interval_secs)));
        let restart = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(poll_task(
            entries.clone(),
            interval.clone(),
            restart.clone(),
            cancel.clone(),
            generator,
            frames,
            Duration::from_millis(config.initial_delay_ms),
        ));

        Self {
            entries,
            interval,
            restart,
            cancel,
            task: Some(task),
        }
    }

    /// Append a message to the poll list
    pub fn add_poll_msg(&self, class: u8, id: u8) {
        self.entries.write().push(PollEntry::new(class, id));
    }

    /// Remove every entry matching exactly this class and id
    pub fn del_poll_msg(&self, class: u8, id: u8) {
        self.entries
            .write()
            .retain(|entry| !(entry.class == class && entry.id == id));
    }

    /// Current poll list
    pub fn entries(&self) -> Vec<PollEntry> {
        self.entries.read().clone()
    }

    /// Poll period in seconds
    pub fn poll_interval(&self) -> u64 {
        self.interval.read().as_secs()
    }

    /// Change the period; a round fires immediately and the timer restarts.
    /// Periods below one second are raised to one second.
    pub fn set_poll_interval(&self, secs: u64) {
        *self.interval.write() = clamp_interval(secs);
        self.restart.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the timer
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.task.take();
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_task(
    entries: Arc<RwLock<Vec<PollEntry>>>,
    interval: Arc<RwLock<Duration>>,
    restart: Arc<Notify>,
    cancel: CancellationToken,
    generator: UbxGenerator,
    frames: mpsc::UnboundedSender<Bytes>,
    initial_delay: Duration,
) {
    info!("poll scheduler started");
    let mut delay = initial_delay;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = restart.notified() => debug!("poll interval changed, polling now"),
            _ = tokio::time::sleep(delay) => {}
        }

        let round = entries.read().clone();
        for entry in round {
            debug!("polling UBX 0x{:02x} 0x{:02x}", entry.class, entry.id);
            if frames.send(generator.poll(entry.class, entry.id)).is_err() {
                info!("poll receiver closed, scheduler exiting");
                return;
            }
        }
        delay = *interval.read();
    }

    info!("poll scheduler stopped");
}
