//! Fault reporting
//!
//! Per-avatar encode errors and failed observer units are handed to an
//! [`ExceptionHandler`] instead of failing the tick.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::info::ObserverId;

use super::error::BroadcastError;

/// One reported failure
#[derive(Debug, Clone)]
pub struct AvatarFault {
    pub tick: u32,
    /// Observer whose unit hit the error; `None` for tick-wide work
    pub observer: Option<ObserverId>,
    pub avatar: Option<u16>,
    pub error: BroadcastError,
}

/// Receives faults from worker threads
pub trait ExceptionHandler: Send + Sync {
    fn on_fault(&self, fault: AvatarFault);
}

/// Logs every fault
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn on_fault(&self, fault: AvatarFault) {
        warn!(
            tick = fault.tick,
            observer = ?fault.observer.map(|o| o.0),
            avatar = ?fault.avatar,
            "broadcast fault: {}",
            fault.error
        );
    }
}

/// Queues faults for the game layer to drain between ticks.
///
/// Non-blocking: when the queue is full the fault is dropped and counted.
pub struct ChannelExceptionHandler {
    sender: Sender<AvatarFault>,
    dropped: AtomicU64,
}

impl ChannelExceptionHandler {
    /// Handler plus the receiving end of its queue
    pub fn new(capacity: usize) -> (Self, Receiver<AvatarFault>) {
        let (sender, receiver) = bounded(capacity);
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Faults dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ExceptionHandler for ChannelExceptionHandler {
    fn on_fault(&self, fault: AvatarFault) {
        match self.sender.try_send(fault) {
            Ok(()) => {}
            Err(TrySendError::Full(fault)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(tick = fault.tick, "fault queue full, dropping: {}", fault.error);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
