//! Record change listeners.
//!
//! Users and channels are global and live as long as the store. Messages are
//! scoped to the open conversation and re-subscribed on every switch.

use std::sync::{Arc, Weak};

use futures_util::future::join;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_types::events::{ChangeEvent, Record};
use murmur_types::models::UserPatch;

use crate::lifecycle::Detach;
use crate::records::{ChangeFilter, ChangeHandler, ChangeStream, RecordStore, Subscription};
use crate::state::StateHandle;

fn subscribe_or_inert(
    records: &dyn RecordStore,
    stream: ChangeStream,
    filter: ChangeFilter,
    handler: ChangeHandler,
) -> Subscription {
    match records.subscribe(stream, filter, handler) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("subscribe to {:?} failed: {}", stream, e);
            Subscription::inert()
        }
    }
}

/// Subscriptions to the user and channel tables.
pub struct GlobalListeners {
    users: Subscription,
    channels: Subscription,
}

impl GlobalListeners {
    pub fn attach(records: &dyn RecordStore, state: StateHandle) -> Self {
        let users = {
            let state = state.clone();
            subscribe_or_inert(
                records,
                ChangeStream::Users,
                ChangeFilter::Any,
                Arc::new(move |event: ChangeEvent| match event.record {
                    Record::User(user) => state.update_user(user.id, UserPatch::from(&user)),
                    other => debug!("unexpected record on users stream: {:?}", other),
                }),
            )
        };

        let channels = subscribe_or_inert(
            records,
            ChangeStream::Channels,
            ChangeFilter::Insert,
            Arc::new(move |event: ChangeEvent| match event.record {
                Record::Channel(channel) => state.add_channels([channel]),
                other => debug!("unexpected record on channels stream: {:?}", other),
            }),
        );

        Self { users, channels }
    }

    pub fn is_active(&self) -> bool {
        self.users.is_active() || self.channels.is_active()
    }
}

impl Detach for GlobalListeners {
    fn detach(self) {
        self.users.unsubscribe();
        self.channels.unsubscribe();
    }
}

/// Message inserts for one conversation.
pub struct ConversationListener {
    channel_id: Uuid,
    subscription: Subscription,
}

impl ConversationListener {
    /// Subscribe to inserts in `channel_id`. Messages are appended at once;
    /// an author not yet known is fetched in the background.
    pub fn attach(
        records: &Arc<dyn RecordStore>,
        channel_id: Uuid,
        state: StateHandle,
        runtime: Handle,
    ) -> Self {
        // The store keeps this handler alive, so it must not keep the store alive.
        let weak: Weak<dyn RecordStore> = Arc::downgrade(records);

        let handler: ChangeHandler = Arc::new(move |event: ChangeEvent| {
            let Record::Message(message) = event.record else {
                debug!("unexpected record on messages stream");
                return;
            };
            let author_id = message.author_id;
            let unknown = !state.knows_user(author_id);

            if !state.append_message(message) {
                debug!("dropped message outside the open conversation");
                return;
            }
            if unknown {
                if let Some(records) = weak.upgrade() {
                    runtime.spawn(fetch_author(records, author_id, state.clone()));
                }
            }
        });

        let subscription = subscribe_or_inert(
            records.as_ref(),
            ChangeStream::MessagesIn(channel_id),
            ChangeFilter::Insert,
            handler,
        );
        debug!("listening for messages in {}", channel_id);

        Self {
            channel_id,
            subscription,
        }
    }
}

impl Detach for ConversationListener {
    fn detach(self) {
        self.subscription.unsubscribe();
        debug!("stopped listening for messages in {}", self.channel_id);
    }
}

/// Resolve one message author and merge it into the user map.
pub async fn fetch_author(records: Arc<dyn RecordStore>, user_id: Uuid, state: StateHandle) {
    match records.select_user(user_id).await {
        Ok(Some(user)) => state.update_user(user.id, UserPatch::from(&user)),
        Ok(None) => debug!("author {} not found", user_id),
        Err(e) => warn!("failed to fetch author {}: {}", user_id, e),
    }
}

/// Load a conversation's existing messages and their authors.
pub async fn fetch_history(records: Arc<dyn RecordStore>, channel_id: Uuid, state: StateHandle) {
    let rows = match records.select_messages(channel_id).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("failed to fetch history for {}: {}", channel_id, e);
            return;
        }
    };
    if state.read(|s| s.conversation != Some(channel_id)) {
        debug!("discarding history for {}: conversation closed", channel_id);
        return;
    }

    state.update_users(
        rows.iter()
            .filter_map(|row| row.author.as_ref())
            .map(|author| (author.id, UserPatch::from(author))),
    );
    let count = rows.len();
    let messages = rows.into_iter().map(|row| row.message).collect();
    if state.install_history(channel_id, messages) {
        debug!("installed {} messages of history for {}", count, channel_id);
    }
}

/// One-time load of every channel and user, both queries in flight at once.
/// Either may fail without affecting the other.
pub async fn fetch_directory(records: Arc<dyn RecordStore>, state: StateHandle) {
    let (channels, users) = join(records.select_channels(), records.select_users()).await;

    match channels {
        Ok(channels) => {
            info!("loaded {} channels", channels.len());
            state.add_channels(channels);
        }
        Err(e) => warn!("failed to fetch channels: {}", e),
    }
    match users {
        Ok(users) => {
            info!("loaded {} users", users.len());
            state.update_users(users.iter().map(|user| (user.id, UserPatch::from(user))));
        }
        Err(e) => warn!("failed to fetch users: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use chrono::Utc;
    use murmur_types::models::{Channel, Message, MessageWithAuthor, UserRecord};
    use tokio::time::timeout;

    use super::*;
    use crate::fakes::FakeRecords;

    fn message(channel_id: Uuid, author_id: Uuid, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            channel_id,
            author_id,
            body: body.into(),
            inserted_at: Utc::now(),
        }
    }

    fn channel(slug: &str) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            slug: slug.into(),
            created_by: None,
            inserted_at: Utc::now(),
        }
    }

    #[test]
    fn user_changes_merge_into_known_users() {
        let records = FakeRecords::new();
        let state = StateHandle::new();
        let listeners = GlobalListeners::attach(records.as_ref(), state.clone());

        let id = Uuid::new_v4();
        state.update_user(id, UserPatch::typing(true));
        records.emit(ChangeEvent::update(Record::User(UserRecord {
            id,
            username: "dana".into(),
        })));

        let user = state.read(|s| s.user(&id).cloned()).unwrap();
        assert_eq!(user.username.as_deref(), Some("dana"));
        assert!(user.is_typing);

        listeners.detach();
        assert!(records.active_streams().is_empty());
    }

    #[test]
    fn channel_inserts_are_deduplicated() {
        let records = FakeRecords::new();
        let state = StateHandle::new();
        let _listeners = GlobalListeners::attach(records.as_ref(), state.clone());

        let dev = channel("dev");
        records.emit(ChangeEvent::insert(Record::Channel(dev.clone())));
        records.emit(ChangeEvent::insert(Record::Channel(dev)));
        records.emit(ChangeEvent::update(Record::Channel(channel("ignored"))));

        assert_eq!(state.read(|s| s.channels.len()), 1);
    }

    #[test]
    fn failed_subscribe_yields_inert_handles() {
        let records = FakeRecords::new();
        records.fail_subscribe.store(true, Ordering::SeqCst);

        let listeners = GlobalListeners::attach(records.as_ref(), StateHandle::new());
        assert!(!listeners.is_active());
        listeners.detach();
    }

    #[tokio::test]
    async fn unknown_author_is_fetched_after_append() {
        let fake = FakeRecords::new();
        let author = UserRecord {
            id: Uuid::new_v4(),
            username: "erin".into(),
        };
        fake.users.lock().push(author.clone());
        let records: Arc<dyn RecordStore> = fake.clone();

        let state = StateHandle::new();
        let open = Uuid::new_v4();
        state.open_conversation(Some(open));
        let listener = ConversationListener::attach(&records, open, state.clone(), Handle::current());

        fake.emit(ChangeEvent::insert(Record::Message(message(open, author.id, "hi"))));
        assert_eq!(state.read(|s| s.messages.len()), 1);

        let mut rx = state.watch();
        timeout(Duration::from_secs(1), rx.wait_for(|s| s.knows_user(&author.id)))
            .await
            .expect("author was never fetched")
            .unwrap();
        assert_eq!(
            state.read(|s| s.user(&author.id).and_then(|u| u.username.clone())),
            Some("erin".to_string())
        );

        listener.detach();
        assert!(fake.active_streams().is_empty());
    }

    #[tokio::test]
    async fn history_is_installed_ahead_of_live_messages() {
        let fake = FakeRecords::new();
        let open = Uuid::new_v4();
        let author = UserRecord {
            id: Uuid::new_v4(),
            username: "finn".into(),
        };
        let old = message(open, author.id, "old");
        fake.history.lock().push(MessageWithAuthor {
            message: old.clone(),
            author: Some(author.clone()),
        });
        let records: Arc<dyn RecordStore> = fake;

        let state = StateHandle::new();
        state.open_conversation(Some(open));
        state.append_message(message(open, author.id, "live"));

        fetch_history(records, open, state.clone()).await;

        let bodies: Vec<String> = state.read(|s| s.messages.iter().map(|m| m.body.clone()).collect());
        assert_eq!(bodies, vec!["old", "live"]);
        assert!(state.knows_user(author.id));
    }

    #[tokio::test]
    async fn directory_failures_are_independent() {
        let fake = FakeRecords::new();
        fake.fail_channels.store(true, Ordering::SeqCst);
        fake.users.lock().push(UserRecord {
            id: Uuid::new_v4(),
            username: "gus".into(),
        });

        let state = StateHandle::new();
        fetch_directory(fake, state.clone()).await;

        assert!(state.read(|s| s.channels.is_empty()));
        assert_eq!(state.read(|s| s.users.len()), 1);
    }
}
