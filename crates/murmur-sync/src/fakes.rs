//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use murmur_types::events::{ChangeEvent, Record};
use murmur_types::models::{
    Channel, Message, MessageWithAuthor, NewChannel, NewMessage, UserRecord,
};

use crate::error::{Result, SyncError};
use crate::records::{ChangeFilter, ChangeHandler, ChangeStream, RecordStore, Subscription};
use crate::transport::{
    ConnectParams, Connection, EventHandler, ReadyState, ReadyStateHandler, RealtimeChannel,
    Transport,
};

// -- Transport --

pub struct FakeTransport {
    initial: Mutex<ReadyState>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::starting(ReadyState::Open)
    }

    pub fn starting(initial: ReadyState) -> Arc<Self> {
        Arc::new(Self {
            initial: Mutex::new(initial),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().clone()
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        self.connections
            .lock()
            .last()
            .cloned()
            .expect("no connection was opened")
    }
}

impl Transport for FakeTransport {
    fn connect(&self, endpoint: &str, params: ConnectParams) -> Arc<dyn Connection> {
        let connection = Arc::new(FakeConnection {
            endpoint: endpoint.to_string(),
            params,
            state: Mutex::new(*self.initial.lock()),
            handlers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        });
        self.connections.lock().push(connection.clone());
        connection
    }
}

pub struct FakeConnection {
    pub endpoint: String,
    pub params: ConnectParams,
    state: Mutex<ReadyState>,
    handlers: Mutex<Vec<ReadyStateHandler>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    disconnects: AtomicUsize,
}

impl FakeConnection {
    pub fn set_ready_state(&self, state: ReadyState) {
        *self.state.lock() = state;
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(state);
        }
    }

    /// Most recent channel opened for `topic`.
    pub fn channel_for(&self, topic: &str) -> Option<Arc<FakeChannel>> {
        self.channels
            .lock()
            .iter()
            .rev()
            .find(|c| c.topic == topic)
            .cloned()
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.channels.lock().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Connection for FakeConnection {
    fn channel(&self, topic: &str) -> Arc<dyn RealtimeChannel> {
        let channel = FakeChannel::new(topic);
        self.channels.lock().push(channel.clone());
        channel
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn on_ready_state(&self, handler: ReadyStateHandler) {
        self.handlers.lock().push(handler);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ReadyState::Closed;
    }
}

pub struct FakeChannel {
    topic: String,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    pushes: Mutex<Vec<(String, Value)>>,
}

impl FakeChannel {
    pub fn new(topic: &str) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
            handlers: Mutex::new(HashMap::new()),
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
        })
    }

    /// Deliver an inbound event to the registered handlers.
    pub fn emit(&self, event: &str, payload: Value) {
        let handlers = self.handlers.lock().get(event).cloned().unwrap_or_default();
        for handler in handlers {
            handler(payload.clone());
        }
    }

    pub fn pushes(&self) -> Vec<(String, Value)> {
        self.pushes.lock().clone()
    }

    pub fn is_joined(&self) -> bool {
        self.joins.load(Ordering::SeqCst) > self.leaves.load(Ordering::SeqCst)
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
}

impl RealtimeChannel for FakeChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn join(&self) {
        self.joins.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.leaves.fetch_add(1, Ordering::SeqCst);
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn push(&self, event: &str, payload: Value) {
        self.pushes.lock().push((event.to_string(), payload));
    }
}

// -- Records --

struct Subscriber {
    id: u64,
    stream: ChangeStream,
    filter: ChangeFilter,
    handler: ChangeHandler,
}

#[derive(Default)]
pub struct FakeRecords {
    pub channels: Mutex<Vec<Channel>>,
    pub users: Mutex<Vec<UserRecord>>,
    pub history: Mutex<Vec<MessageWithAuthor>>,
    pub inserted: Mutex<Vec<NewMessage>>,
    pub fail_channels: AtomicBool,
    pub fail_users: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// While set, `select_user` waits for a permit before answering.
    pub user_gate: Mutex<Option<Arc<Notify>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl FakeRecords {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, event: ChangeEvent) {
        let handlers: Vec<ChangeHandler> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.stream.matches(&event.record) && s.filter.matches(event.kind))
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    pub fn active_streams(&self) -> Vec<ChangeStream> {
        self.subscribers.lock().iter().map(|s| s.stream).collect()
    }

    pub fn gate_user_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.user_gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn select_channels(&self) -> Result<Vec<Channel>> {
        if self.fail_channels.load(Ordering::SeqCst) {
            return Err(SyncError::Store("channels unavailable".into()));
        }
        Ok(self.channels.lock().clone())
    }

    async fn select_users(&self) -> Result<Vec<UserRecord>> {
        if self.fail_users.load(Ordering::SeqCst) {
            return Err(SyncError::Store("users unavailable".into()));
        }
        Ok(self.users.lock().clone())
    }

    async fn select_user(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let gate = self.user_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.users.lock().iter().find(|u| u.id == id).cloned())
    }

    async fn select_messages(&self, channel_id: Uuid) -> Result<Vec<MessageWithAuthor>> {
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|row| row.message.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn insert_channel(&self, channel: NewChannel) -> Result<Channel> {
        let channel = Channel {
            id: Uuid::new_v4(),
            slug: channel.slug,
            created_by: channel.created_by,
            inserted_at: Utc::now(),
        };
        self.channels.lock().push(channel.clone());
        self.emit(ChangeEvent::insert(Record::Channel(channel.clone())));
        Ok(channel)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        self.inserted.lock().push(message.clone());
        let message = Message {
            id: Uuid::new_v4(),
            channel_id: message.channel_id,
            author_id: message.author_id,
            body: message.body,
            inserted_at: Utc::now(),
        };
        self.emit(ChangeEvent::insert(Record::Message(message.clone())));
        Ok(message)
    }

    fn subscribe(
        &self,
        stream: ChangeStream,
        filter: ChangeFilter,
        handler: ChangeHandler,
    ) -> Result<Subscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(SyncError::Store("subscribe refused".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push(Subscriber {
            id,
            stream,
            filter,
            handler,
        });
        let subscribers = self.subscribers.clone();
        Ok(Subscription::new(move || {
            subscribers.lock().retain(|s| s.id != id);
        }))
    }
}
