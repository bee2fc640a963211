//! Realtime transport interface: connections, topic channels, ephemeral events.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

/// Socket readiness. Only `Open` may carry outbound pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn is_open(self) -> bool {
        self == ReadyState::Open
    }
}

/// Identity parameters sent when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub user_id: Uuid,
}

pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;
pub type ReadyStateHandler = Arc<dyn Fn(ReadyState) + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Start connecting. Returns immediately; watch `ready_state` for progress.
    fn connect(&self, endpoint: &str, params: ConnectParams) -> Arc<dyn Connection>;
}

pub trait Connection: Send + Sync {
    /// Create a channel handle for `topic`. The channel is not joined yet.
    fn channel(&self, topic: &str) -> Arc<dyn RealtimeChannel>;

    fn ready_state(&self) -> ReadyState;

    /// Register a callback for readiness transitions. Implementations may
    /// invoke it from any thread.
    fn on_ready_state(&self, handler: ReadyStateHandler);

    fn disconnect(&self);
}

pub trait RealtimeChannel: Send + Sync {
    fn topic(&self) -> &str;

    fn join(&self);

    fn leave(&self);

    /// Register a handler for inbound `event`s on this topic.
    fn on(&self, event: &str, handler: EventHandler);

    /// Broadcast `event` to the other members of this topic. Best effort.
    fn push(&self, event: &str, payload: Value);
}
