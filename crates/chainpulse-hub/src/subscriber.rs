//! `ChannelSubscriber` — a bounded-channel transport handle.
//!
//! The transport (WebSocket, SSE, stdout writer...) owns the receiving end
//! and drains it at its own pace. A full or closed channel fails the
//! delivery immediately instead of stalling the fan-out.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::hub::{DeliveryError, Subscriber};

pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    /// Create a handle plus the receiver its transport drains.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self { tx }), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, message: &Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(message)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
