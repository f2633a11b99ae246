use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::HostEvent;

/// Events queued beyond this are dropped rather than stalling a worker.
pub const EVENT_CHANNEL_CAPACITY: usize = 8192;

/// Fire-and-continue publisher shared by all worker threads.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<HostEvent>,
    dropped: Arc<AtomicU64>,
}

pub fn event_channel(capacity: usize) -> (EventSender, Receiver<HostEvent>) {
    let (tx, rx) = bounded(capacity);
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl EventSender {
    pub fn emit(&self, event: HostEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    log::warn!("Event queue full, dropping events");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Logs `message` and forwards it to the UI.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{message}");
        self.emit(HostEvent::Log(message));
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
