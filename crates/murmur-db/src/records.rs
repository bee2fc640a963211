use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{error, info};
use uuid::Uuid;

use murmur_sync::{ChangeFilter, ChangeHandler, ChangeStream, RecordStore, Subscription, SyncError};
use murmur_types::events::{ChangeEvent, Record};
use murmur_types::models::{
    Channel, Message, MessageWithAuthor, NewChannel, NewMessage, UserRecord,
};

use crate::Database;
use crate::feed::ChangeFeed;

/// Most recent messages loaded when a conversation opens.
pub const HISTORY_LIMIT: u32 = 500;

/// [`RecordStore`] over SQLite. Queries run on the blocking pool; committed
/// writes are published to the change feed.
pub struct SqliteRecords {
    db: Arc<Database>,
    feed: ChangeFeed,
}

impl SqliteRecords {
    /// Must be called inside a Tokio runtime.
    pub fn new(db: Database) -> anyhow::Result<Self> {
        let runtime = Handle::try_current().map_err(|_| anyhow!("SqliteRecords needs a tokio runtime"))?;
        Ok(Self {
            db: Arc::new(db),
            feed: ChangeFeed::new(runtime),
        })
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Self::new(Database::open(path)?)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::new(Database::open_in_memory()?)
    }

    async fn blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("database task failed: {}", e)
            })?
    }

    /// Find the user called `username`, creating it if needed.
    pub async fn ensure_user(&self, username: &str) -> anyhow::Result<UserRecord> {
        let name = username.to_string();
        let (row, created) = self
            .blocking(move |db| match db.get_user_by_username(&name)? {
                Some(row) => Ok((row, false)),
                None => Ok((db.create_user(&Uuid::new_v4().to_string(), &name)?, true)),
            })
            .await?;

        let user = UserRecord::try_from(row)?;
        if created {
            info!("Created user {} ({})", user.username, user.id);
            self.feed.publish(ChangeEvent::insert(Record::User(user.clone())));
        }
        Ok(user)
    }

    pub async fn rename_user(&self, id: Uuid, username: &str) -> anyhow::Result<Option<UserRecord>> {
        let name = username.to_string();
        let row = self
            .blocking(move |db| db.rename_user(&id.to_string(), &name))
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user = UserRecord::try_from(row)?;
        self.feed.publish(ChangeEvent::update(Record::User(user.clone())));
        Ok(Some(user))
    }
}

fn store_error(e: anyhow::Error) -> SyncError {
    SyncError::Store(format!("{:#}", e))
}

#[async_trait]
impl RecordStore for SqliteRecords {
    async fn select_channels(&self) -> murmur_sync::Result<Vec<Channel>> {
        self.blocking(|db| db.list_channels()?.into_iter().map(Channel::try_from).collect())
            .await
            .map_err(store_error)
    }

    async fn select_users(&self) -> murmur_sync::Result<Vec<UserRecord>> {
        self.blocking(|db| db.list_users()?.into_iter().map(UserRecord::try_from).collect())
            .await
            .map_err(store_error)
    }

    async fn select_user(&self, id: Uuid) -> murmur_sync::Result<Option<UserRecord>> {
        self.blocking(move |db| {
            db.get_user_by_id(&id.to_string())?
                .map(UserRecord::try_from)
                .transpose()
        })
        .await
        .map_err(store_error)
    }

    async fn select_messages(&self, channel_id: Uuid) -> murmur_sync::Result<Vec<MessageWithAuthor>> {
        self.blocking(move |db| {
            db.get_messages(&channel_id.to_string(), HISTORY_LIMIT)?
                .into_iter()
                .map(MessageWithAuthor::try_from)
                .collect()
        })
        .await
        .map_err(store_error)
    }

    async fn insert_channel(&self, channel: NewChannel) -> murmur_sync::Result<Channel> {
        let channel = self
            .blocking(move |db| {
                let created_by = channel.created_by.map(|id| id.to_string());
                let row = db.insert_channel(
                    &Uuid::new_v4().to_string(),
                    &channel.slug,
                    created_by.as_deref(),
                )?;
                Channel::try_from(row)
            })
            .await
            .map_err(store_error)?;

        self.feed.publish(ChangeEvent::insert(Record::Channel(channel.clone())));
        Ok(channel)
    }

    async fn insert_message(&self, message: NewMessage) -> murmur_sync::Result<Message> {
        let message = self
            .blocking(move |db| {
                let row = db.insert_message(
                    &Uuid::new_v4().to_string(),
                    &message.channel_id.to_string(),
                    &message.author_id.to_string(),
                    &message.body,
                )?;
                Ok(MessageWithAuthor::try_from(row)?.message)
            })
            .await
            .map_err(store_error)?;

        self.feed.publish(ChangeEvent::insert(Record::Message(message.clone())));
        Ok(message)
    }

    fn subscribe(
        &self,
        stream: ChangeStream,
        filter: ChangeFilter,
        handler: ChangeHandler,
    ) -> murmur_sync::Result<Subscription> {
        Ok(self.feed.subscribe(stream, filter, handler))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::migrations::GENERAL_CHANNEL_ID;

    fn collect(
        records: &SqliteRecords,
        stream: ChangeStream,
        filter: ChangeFilter,
    ) -> (Subscription, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = records
            .subscribe(
                stream,
                filter,
                Arc::new(move |event: ChangeEvent| {
                    let _ = tx.send(event);
                }),
            )
            .unwrap();
        (subscription, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no change event")
            .expect("feed closed")
    }

    fn general() -> Uuid {
        Uuid::parse_str(GENERAL_CHANNEL_ID).unwrap()
    }

    #[tokio::test]
    async fn history_includes_author_names() {
        let records = SqliteRecords::open_in_memory().unwrap();
        let alice = records.ensure_user("alice").await.unwrap();

        records
            .insert_message(NewMessage {
                channel_id: general(),
                author_id: alice.id,
                body: "hello".into(),
            })
            .await
            .unwrap();

        let history = records.select_messages(general()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message.body, "hello");
        assert_eq!(history[0].author, Some(alice));
    }

    #[tokio::test]
    async fn ensure_user_is_idempotent() {
        let records = SqliteRecords::open_in_memory().unwrap();
        let first = records.ensure_user("bob").await.unwrap();
        let second = records.ensure_user("bob").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(records.select_users().await.unwrap(), vec![first.clone()]);
        assert_eq!(records.select_user(first.id).await.unwrap(), Some(first));
        assert_eq!(records.select_user(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn message_feed_is_scoped_to_its_channel() {
        let records = SqliteRecords::open_in_memory().unwrap();
        let alice = records.ensure_user("alice").await.unwrap();
        let dev = records
            .insert_channel(NewChannel {
                slug: "dev".into(),
                created_by: Some(alice.id),
            })
            .await
            .unwrap();
        assert_eq!(dev.created_by, Some(alice.id));

        let (_sub, mut rx) = collect(&records, ChangeStream::MessagesIn(dev.id), ChangeFilter::Insert);

        for channel_id in [general(), dev.id] {
            records
                .insert_message(NewMessage {
                    channel_id,
                    author_id: alice.id,
                    body: format!("to {}", channel_id),
                })
                .await
                .unwrap();
        }

        let event = next(&mut rx).await;
        match event.record {
            Record::Message(message) => assert_eq!(message.channel_id, dev.id),
            other => panic!("unexpected record {:?}", other),
        }
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn user_feed_sees_inserts_and_updates() {
        let records = SqliteRecords::open_in_memory().unwrap();
        let (_sub, mut rx) = collect(&records, ChangeStream::Users, ChangeFilter::Any);

        let carol = records.ensure_user("carol").await.unwrap();
        records.rename_user(carol.id, "caroline").await.unwrap();

        assert_eq!(next(&mut rx).await, ChangeEvent::insert(Record::User(carol.clone())));
        let renamed = UserRecord {
            id: carol.id,
            username: "caroline".into(),
        };
        assert_eq!(next(&mut rx).await, ChangeEvent::update(Record::User(renamed)));
    }

    #[tokio::test]
    async fn unsubscribed_handlers_stop_receiving() {
        let records = SqliteRecords::open_in_memory().unwrap();
        let (sub, mut rx) = collect(&records, ChangeStream::Channels, ChangeFilter::Insert);

        sub.unsubscribe();
        records
            .insert_channel(NewChannel {
                slug: "quiet".into(),
                created_by: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            timeout(Duration::from_millis(50), rx.recv()).await,
            Ok(None) | Err(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_slug_is_a_store_error() {
        let records = SqliteRecords::open_in_memory().unwrap();
        let err = records
            .insert_channel(NewChannel {
                slug: "general".into(),
                created_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
    }
}
