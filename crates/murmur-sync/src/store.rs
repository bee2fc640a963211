//! The reconciled chat store.
//!
//! `ChatStore` owns the shared [`ChatState`] and every subscription feeding
//! it. Attachments are re-derived whenever their parameter changes: the
//! presence session follows the current user, the message listener follows
//! the active conversation, and the typing channel follows both plus the
//! connection's readiness.
//!
//! Event handlers only ever touch the state handle. Anything that needs the
//! lifecycle lock re-enters through a spawned task.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_types::models::{NewChannel, NewMessage};

use crate::composer::Composer;
use crate::config::SyncConfig;
use crate::debounce::ActivitySignals;
use crate::error::{Result, SyncError};
use crate::lifecycle::{Attachment, Detach};
use crate::listener::{ConversationListener, GlobalListeners, fetch_directory, fetch_history};
use crate::presence::PresenceSession;
use crate::records::RecordStore;
use crate::state::{ChatState, StateHandle};
use crate::transport::{ReadyState, ReadyStateHandler, Transport};
use crate::typing::{TypingChannel, TypingKey};
use crate::view::ChatView;

#[derive(Default)]
struct Lifecycle {
    current_user: Option<Uuid>,
    active_channel: Option<Uuid>,
    globals: Option<GlobalListeners>,
    session: Attachment<Uuid, PresenceSession>,
    conversation: Attachment<Uuid, ConversationListener>,
    typing: Attachment<TypingKey, TypingChannel>,
    closed: bool,
}

struct StoreInner {
    records: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    state: StateHandle,
    runtime: Handle,
    signals: ActivitySignals,
    lifecycle: Mutex<Lifecycle>,
}

impl StoreInner {
    fn emit_typing(&self, is_typing: bool) {
        let lifecycle = self.lifecycle.lock();
        match lifecycle.typing.handle() {
            Some(typing) => {
                typing.send(is_typing);
            }
            None => debug!("no typing channel, dropping typing={}", is_typing),
        }
    }

    fn ready_handler(self: &Arc<Self>, user_id: Uuid) -> ReadyStateHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |ready: ReadyState| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!("connection for {} is {:?}", user_id, ready);
            let runtime = inner.runtime.clone();
            runtime.spawn(async move {
                let mut lifecycle = inner.lifecycle.lock();
                if lifecycle.session.params() != Some(&user_id) {
                    debug!("ignoring readiness of a replaced session");
                    return;
                }
                inner.sync_typing(&mut lifecycle);
            });
        })
    }

    /// Attach the typing channel iff there is a conversation and an open
    /// connection for the current user.
    fn sync_typing(&self, lifecycle: &mut Lifecycle) {
        let target = match (lifecycle.session.handle(), lifecycle.active_channel) {
            (Some(session), Some(channel_id)) if session.connection().ready_state().is_open() => {
                let key = TypingKey {
                    channel_id,
                    user_id: session.user_id(),
                };
                Some((key, session.connection().clone()))
            }
            _ => None,
        };

        match target {
            Some((key, connection)) => {
                let attached = lifecycle.typing.sync(Some(key), |key| {
                    TypingChannel::open(connection, &self.config, *key, self.state.clone())
                });
                if attached {
                    info!("typing attached for {} in {}", key.user_id, key.channel_id);
                }
            }
            None => lifecycle.typing.detach(),
        }
    }
}

/// Client-side chat state synchronized with the record store and the
/// realtime transport.
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

impl ChatStore {
    /// Build a store on the current Tokio runtime, subscribe to the global
    /// change streams and start the initial channel and user fetch.
    pub fn new(
        records: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let state = StateHandle::new();

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let weak = weak.clone();
            let signals = ActivitySignals::new(config.typing_debounce, runtime.clone(), move |is_typing| {
                if let Some(inner) = weak.upgrade() {
                    inner.emit_typing(is_typing);
                }
            });
            StoreInner {
                records,
                transport,
                config,
                state,
                runtime,
                signals,
                lifecycle: Mutex::new(Lifecycle::default()),
            }
        });

        let globals = GlobalListeners::attach(inner.records.as_ref(), inner.state.clone());
        inner.lifecycle.lock().globals = Some(globals);
        inner
            .runtime
            .spawn(fetch_directory(inner.records.clone(), inner.state.clone()));

        Ok(Self { inner })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn current_user(&self) -> Option<Uuid> {
        self.inner.lifecycle.lock().current_user
    }

    pub fn active_channel(&self) -> Option<Uuid> {
        self.inner.lifecycle.lock().active_channel
    }

    /// Switch identity. The old presence session leaves and disconnects
    /// before the new one connects.
    pub fn set_current_user(&self, user_id: Option<Uuid>) {
        let inner = &self.inner;
        if inner.lifecycle.lock().current_user == user_id {
            return;
        }
        // The pending stop belongs to the old identity's typing channel.
        inner.signals.stop().flush();
        inner.signals.cancel();

        let mut lifecycle = inner.lifecycle.lock();
        if lifecycle.closed || lifecycle.current_user == user_id {
            return;
        }
        lifecycle.current_user = user_id;

        lifecycle.typing.detach();
        lifecycle.session.sync(user_id, |id| {
            PresenceSession::open(
                inner.transport.as_ref(),
                &inner.config,
                *id,
                inner.state.clone(),
                inner.ready_handler(*id),
            )
        });
        inner.sync_typing(&mut lifecycle);
    }

    /// Open another conversation, or none. Its message list starts empty and
    /// is filled by history and live inserts.
    pub fn set_active_channel(&self, channel_id: Option<Uuid>) {
        let inner = &self.inner;
        if inner.lifecycle.lock().active_channel == channel_id {
            return;
        }
        // Tell the old conversation we stopped before leaving it.
        inner.signals.stop().flush();
        inner.signals.cancel();

        let mut lifecycle = inner.lifecycle.lock();
        if lifecycle.closed || lifecycle.active_channel == channel_id {
            return;
        }
        lifecycle.active_channel = channel_id;

        lifecycle.typing.detach();
        inner.state.open_conversation(channel_id);
        lifecycle.conversation.sync(channel_id, |id| {
            ConversationListener::attach(&inner.records, *id, inner.state.clone(), inner.runtime.clone())
        });
        if let Some(id) = channel_id {
            inner
                .runtime
                .spawn(fetch_history(inner.records.clone(), id, inner.state.clone()));
            info!("opened conversation {}", id);
        }
        inner.sync_typing(&mut lifecycle);
    }

    pub fn view(&self) -> ChatView {
        self.inner.state.read(ChatView::derive)
    }

    pub fn watch(&self) -> watch::Receiver<ChatState> {
        self.inner.state.watch()
    }

    pub fn state(&self) -> &StateHandle {
        &self.inner.state
    }

    pub fn signals(&self) -> ActivitySignals {
        self.inner.signals.clone()
    }

    pub fn composer(&self) -> Composer {
        Composer::new(self.signals())
    }

    /// Whether typing events can currently be sent.
    pub fn is_typing_ready(&self) -> bool {
        self.inner.lifecycle.lock().typing.is_attached()
    }

    /// Post `body` to the active conversation as the current user. Any
    /// pending stop signal goes out first. Returns whether an insert was
    /// started.
    pub fn send_message(&self, body: impl Into<String>) -> bool {
        let inner = &self.inner;
        inner.signals.stop().flush();

        let body = body.into().trim().to_string();
        if body.is_empty() {
            return false;
        }
        let (author_id, channel_id) = {
            let lifecycle = inner.lifecycle.lock();
            match (lifecycle.current_user, lifecycle.active_channel) {
                (Some(user), Some(channel)) => (user, channel),
                _ => {
                    debug!("not sending: no user or conversation");
                    return false;
                }
            }
        };

        let records = inner.records.clone();
        inner.runtime.spawn(async move {
            let message = NewMessage {
                channel_id,
                author_id,
                body,
            };
            match records.insert_message(message).await {
                Ok(message) => debug!("sent message {}", message.id),
                Err(e) => warn!("failed to send message: {}", e),
            }
        });
        true
    }

    pub fn add_channel(&self, slug: impl Into<String>) {
        let inner = &self.inner;
        let channel = NewChannel {
            slug: slug.into(),
            created_by: self.current_user(),
        };
        let records = inner.records.clone();
        inner.runtime.spawn(async move {
            let slug = channel.slug.clone();
            match records.insert_channel(channel).await {
                Ok(channel) => info!("created channel {} ({})", channel.slug, channel.id),
                Err(e) => warn!("failed to create channel {}: {}", slug, e),
            }
        });
    }

    /// Cancel pending timers and tear down every attachment. Idempotent.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.signals.cancel();

        let mut lifecycle = inner.lifecycle.lock();
        if lifecycle.closed {
            return;
        }
        lifecycle.closed = true;
        lifecycle.typing.detach();
        lifecycle.conversation.detach();
        lifecycle.session.detach();
        if let Some(globals) = lifecycle.globals.take() {
            globals.detach();
        }
        info!("chat store shut down");
    }
}

impl Drop for ChatStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
