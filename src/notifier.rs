//! In-process change notifier.
//!
//! Poll events go out on a single broadcast channel. Delivery is at-most-once:
//! a slow receiver lags and misses events, and nothing is persisted. Consumers
//! that need the current state re-read the poll.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{PollClosed, TallyUpdate};
use crate::services::ChangeNotifier;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    TallyUpdated(TallyUpdate),
    PollClosed(PollClosed),
}

impl PollEvent {
    pub fn event_id(&self) -> Uuid {
        match self {
            PollEvent::TallyUpdated(update) => update.event_id,
            PollEvent::PollClosed(closed) => closed.event_id,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            PollEvent::TallyUpdated(_) => "tally_updated",
            PollEvent::PollClosed(_) => "poll_closed",
        }
    }
}

#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<PollEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of receivers the event reached.
    fn emit(&self, event: PollEvent) -> usize {
        // No receivers is not an error.
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn publish_tally_update(&self, update: TallyUpdate) -> anyhow::Result<()> {
        let reached = self.emit(PollEvent::TallyUpdated(update));
        tracing::trace!(reached, "tally update published");
        Ok(())
    }

    async fn publish_poll_closed(&self, closed: PollClosed) -> anyhow::Result<()> {
        let reached = self.emit(PollEvent::PollClosed(closed));
        tracing::trace!(reached, "poll closed published");
        Ok(())
    }
}
