//! Persistent record store interface.
//!
//! The store is a shared collaborator: the sync engine never owns it, it only
//! queries it, inserts into it, and holds the subscriptions it hands out.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use murmur_types::events::{ChangeEvent, ChangeKind, Record};
use murmur_types::models::{Channel, Message, MessageWithAuthor, NewChannel, NewMessage, UserRecord};

use crate::error::Result;

/// Which record change stream to listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStream {
    Users,
    Channels,
    Messages,
    /// Messages whose `channel_id` matches.
    MessagesIn(Uuid),
}

impl ChangeStream {
    pub fn matches(&self, record: &Record) -> bool {
        match (self, record) {
            (Self::Users, Record::User(_)) => true,
            (Self::Channels, Record::Channel(_)) => true,
            (Self::Messages, Record::Message(_)) => true,
            (Self::MessagesIn(channel_id), Record::Message(message)) => {
                message.channel_id == *channel_id
            }
            _ => false,
        }
    }
}

/// Which change kinds a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeFilter {
    Insert,
    Update,
    Any,
}

impl ChangeFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (Self::Any, _) | (Self::Insert, ChangeKind::Insert) | (Self::Update, ChangeKind::Update)
        )
    }
}

pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select_channels(&self) -> Result<Vec<Channel>>;

    async fn select_users(&self) -> Result<Vec<UserRecord>>;

    async fn select_user(&self, id: Uuid) -> Result<Option<UserRecord>>;

    /// Messages of one channel, oldest first, joined with their authors.
    async fn select_messages(&self, channel_id: Uuid) -> Result<Vec<MessageWithAuthor>>;

    async fn insert_channel(&self, channel: NewChannel) -> Result<Channel>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    fn subscribe(
        &self,
        stream: ChangeStream,
        filter: ChangeFilter,
        handler: ChangeHandler,
    ) -> Result<Subscription>;
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle for a live change subscription.
///
/// `unsubscribe` runs the teardown at most once; dropping the handle
/// unsubscribes as well.
pub struct Subscription {
    teardown: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A subscription that never delivers anything, used when subscribing failed.
    pub fn inert() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_active(&self) -> bool {
        self.teardown.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
