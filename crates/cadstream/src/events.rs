//! Typed streamer notifications delivered over channels.
//!
//! Each call to [`EventBus::subscribe`] returns a fresh receiver. A
//! subscription lasts exactly as long as that receiver: once it is dropped the
//! bus prunes the sender on the next publish.

use std::sync::Arc;

use crate::error::Error;
use crate::loader::LoadingState;
use crate::metadata::{LevelOfDetail, SectorKey};

/// Something observable happened to a sector or to the loader.
#[derive(Debug, Clone)]
pub enum StreamerEvent {
    SectorLoaded {
        key: SectorKey,
        lod: LevelOfDetail,
    },
    SectorFailed {
        key: SectorKey,
        lod: LevelOfDetail,
        error: Arc<Error>,
    },
    SectorCancelled {
        key: SectorKey,
    },
    SectorEvicted {
        key: SectorKey,
    },
    LoadingStateChanged(LoadingState),
}

/// Fan-out of [`StreamerEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<async_channel::Sender<StreamerEvent>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> async_channel::Receiver<StreamerEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, dropping closed ones.
    pub fn publish(&mut self, event: &StreamerEvent) {
        self.subscribers
            .retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
