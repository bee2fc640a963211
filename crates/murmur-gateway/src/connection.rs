use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use murmur_sync::{Connection, EventHandler, ReadyState, ReadyStateHandler, RealtimeChannel};

use crate::hub::Hub;

/// What the hub queues for a connection. Each connection drains its queue on
/// its own task, so deliveries arrive in the order the hub produced them.
#[derive(Debug)]
pub(crate) enum Delivery {
    Event {
        topic: String,
        event: String,
        payload: Value,
    },
    Ready(ReadyState),
}

pub(crate) struct ConnShared {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    state: Mutex<ReadyState>,
    ready_handlers: Mutex<Vec<ReadyStateHandler>>,
    channels: Mutex<Vec<Arc<ChannelShared>>>,
}

impl ConnShared {
    pub(crate) fn new(user_id: Uuid, state: ReadyState) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            state: Mutex::new(state),
            ready_handlers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        }
    }

    fn set_ready_state(&self, state: ReadyState) {
        *self.state.lock() = state;
        let handlers = self.ready_handlers.lock().clone();
        for handler in handlers {
            handler(state);
        }
    }

    fn dispatch(&self, topic: &str, event: &str, payload: Value) {
        let handlers: Vec<EventHandler> = self
            .channels
            .lock()
            .iter()
            .filter(|c| c.topic == topic && c.joined.load(Ordering::SeqCst))
            .flat_map(|c| c.handlers.lock().get(event).cloned().unwrap_or_default())
            .collect();

        if handlers.is_empty() {
            trace!("no handler for {} on {}", event, topic);
        }
        for handler in handlers {
            handler(payload.clone());
        }
    }
}

/// Drain one connection's delivery queue until the hub drops its sender.
pub(crate) async fn pump(conn: Arc<ConnShared>, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Ready(state) => conn.set_ready_state(state),
            Delivery::Event {
                topic,
                event,
                payload,
            } => conn.dispatch(&topic, &event, payload),
        }
    }
    trace!("delivery queue for {} of {} closed", conn.id, conn.user_id);
}

/// A client connection to the [`Hub`].
pub struct LocalConnection {
    shared: Arc<ConnShared>,
    hub: Hub,
}

impl LocalConnection {
    pub(crate) fn new(shared: Arc<ConnShared>, hub: Hub) -> Self {
        Self { shared, hub }
    }
}

impl Connection for LocalConnection {
    fn channel(&self, topic: &str) -> Arc<dyn RealtimeChannel> {
        let shared = Arc::new(ChannelShared {
            topic: topic.to_string(),
            handlers: Mutex::new(HashMap::new()),
            joined: AtomicBool::new(false),
        });
        Arc::new(LocalChannel {
            shared,
            conn: self.shared.clone(),
            hub: self.hub.clone(),
        })
    }

    fn ready_state(&self) -> ReadyState {
        *self.shared.state.lock()
    }

    fn on_ready_state(&self, handler: ReadyStateHandler) {
        self.shared.ready_handlers.lock().push(handler);
    }

    fn disconnect(&self) {
        *self.shared.state.lock() = ReadyState::Closed;
        self.hub.disconnect(self.shared.id);
    }
}

struct ChannelShared {
    topic: String,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    joined: AtomicBool,
}

/// One topic subscription on a [`LocalConnection`].
pub struct LocalChannel {
    shared: Arc<ChannelShared>,
    conn: Arc<ConnShared>,
    hub: Hub,
}

impl RealtimeChannel for LocalChannel {
    fn topic(&self) -> &str {
        &self.shared.topic
    }

    fn join(&self) {
        if self.shared.joined.swap(true, Ordering::SeqCst) {
            return;
        }
        // Only joined channels are routed to.
        self.conn.channels.lock().push(self.shared.clone());
        self.hub.join(self.conn.id, &self.shared.topic);
    }

    fn leave(&self) {
        if !self.shared.joined.swap(false, Ordering::SeqCst) {
            return;
        }
        self.conn
            .channels
            .lock()
            .retain(|c| !Arc::ptr_eq(c, &self.shared));
        self.hub.leave(self.conn.id, &self.shared.topic);
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.shared
            .handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn push(&self, event: &str, payload: Value) {
        if !self.shared.joined.load(Ordering::SeqCst) {
            debug!("push of {} on {} before join, dropped", event, self.shared.topic);
            return;
        }
        self.hub.push(self.conn.id, &self.shared.topic, event, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed(shared: &ConnShared) -> usize {
        shared.channels.lock().len()
    }

    #[tokio::test]
    async fn only_joined_channels_are_kept() {
        let hub = Hub::new().unwrap();
        let shared = Arc::new(ConnShared::new(Uuid::new_v4(), ReadyState::Open));
        let conn = LocalConnection::new(shared.clone(), hub);

        let idle = conn.channel("idle");
        let room = conn.channel("room");
        assert_eq!(routed(&shared), 0);

        room.join();
        room.join();
        assert_eq!(routed(&shared), 1);

        idle.leave();
        room.leave();
        assert_eq!(routed(&shared), 0);

        room.join();
        assert_eq!(routed(&shared), 1);
    }
}
