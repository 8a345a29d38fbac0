use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::RwLock;

use tracing::warn;

use super::{Event, EventSink};
use crate::error::Result;

pub type EventHook = fn(&Event);

/// Dispatches events to registered hooks.
///
/// Hooks run synchronously on the manager's thread and therefore must
/// not block; use a `ChannelSink` for subscribers that do real work.
pub struct Listener {
    no_hooks: AtomicBool,
    hooks: RwLock<Vec<EventHook>>,
}

impl Listener {
    pub fn new() -> Listener {
        Listener {
            no_hooks: AtomicBool::new(true),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_hook(&self, hook: EventHook) -> Result<()> {
        let mut guard = self.hooks.write()?;
        self.no_hooks.store(false, Ordering::SeqCst);
        guard.push(hook);
        Ok(())
    }

    pub fn run_hooks(&self, event: &Event) -> Result<()> {
        if self.no_hooks.load(Ordering::SeqCst) {
            return Ok(());
        }

        let guard = self.hooks.read()?;

        for hook in guard.deref().iter() {
            hook(event);
        }

        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Listener {
        Listener::new()
    }
}

impl EventSink for Listener {
    fn publish(&self, event: Event) {
        let _ = self.run_hooks(&event);
    }
}

/// Delivers events over a bounded channel.
///
/// When the subscriber lags far enough that the buffer fills, further
/// events are dropped rather than blocking the manager.
pub struct ChannelSink {
    sender: SyncSender<Event>,
}

impl ChannelSink {
    /// Creates a sink and its receiving half with the given buffer capacity.
    pub fn new(capacity: usize) -> (ChannelSink, Receiver<Event>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (ChannelSink { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => (),
            Err(TrySendError::Full(event)) => {
                warn!(event = %event, "subscriber lagging; event dropped");
            }
            Err(TrySendError::Disconnected(_)) => (),
        }
    }
}
