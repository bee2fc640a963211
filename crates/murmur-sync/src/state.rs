//! Shared client state and its update functions.
//!
//! Every update is a closure over the current snapshot applied through
//! `watch::Sender::send_if_modified`, so concurrent event callbacks cannot
//! overwrite each other with stale copies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use murmur_types::models::{Channel, Message, User, UserPatch};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub users: HashMap<Uuid, User>,
    /// Arrival order; sorted only in the derived view.
    pub channels: Vec<Channel>,
    /// Conversation the message list belongs to.
    pub conversation: Option<Uuid>,
    pub messages: Vec<Message>,
}

impl ChatState {
    pub fn user(&self, id: &Uuid) -> Option<&User> {
        self.users.get(id)
    }

    pub fn knows_user(&self, id: &Uuid) -> bool {
        self.users.contains_key(id)
    }
}

#[derive(Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<ChatState>>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ChatState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn watch(&self) -> watch::Receiver<ChatState> {
        self.tx.subscribe()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn snapshot(&self) -> ChatState {
        self.tx.borrow().clone()
    }

    pub fn knows_user(&self, id: Uuid) -> bool {
        self.read(|state| state.knows_user(&id))
    }

    /// Merge `patch` into the user, creating the entry if needed.
    pub fn update_user(&self, id: Uuid, patch: UserPatch) {
        self.update_users([(id, patch)]);
    }

    pub fn update_users(&self, patches: impl IntoIterator<Item = (Uuid, UserPatch)>) {
        let patches: Vec<_> = patches.into_iter().collect();
        if patches.is_empty() {
            return;
        }
        self.tx.send_if_modified(|state| {
            let mut changed = false;
            for (id, patch) in patches {
                let user = state.users.entry(id).or_insert_with(|| User::new(id));
                let before = user.clone();
                user.merge(patch);
                changed |= *user != before;
            }
            changed
        });
    }

    /// Set the typing flag of a known user. Unknown users are ignored.
    pub fn set_typing(&self, id: Uuid, is_typing: bool) -> bool {
        self.tx.send_if_modified(|state| match state.users.get_mut(&id) {
            Some(user) if user.is_typing != is_typing => {
                user.is_typing = is_typing;
                true
            }
            _ => false,
        })
    }

    /// Append channels not seen before. The set only grows.
    pub fn add_channels(&self, channels: impl IntoIterator<Item = Channel>) {
        let channels: Vec<_> = channels.into_iter().collect();
        self.tx.send_if_modified(|state| {
            let mut known: HashSet<Uuid> = state.channels.iter().map(|c| c.id).collect();
            let before = state.channels.len();
            for channel in channels {
                if known.insert(channel.id) {
                    state.channels.push(channel);
                }
            }
            state.channels.len() != before
        });
    }

    /// Switch the message list to another conversation, starting empty.
    pub fn open_conversation(&self, conversation: Option<Uuid>) {
        self.tx.send_if_modified(|state| {
            if state.conversation == conversation {
                return false;
            }
            state.conversation = conversation;
            state.messages.clear();
            true
        });
    }

    /// Append a live message to the open conversation.
    ///
    /// Messages for any other conversation, and repeats, are dropped.
    pub fn append_message(&self, message: Message) -> bool {
        self.tx.send_if_modified(|state| {
            if state.conversation != Some(message.channel_id)
                || state.messages.iter().any(|m| m.id == message.id)
            {
                return false;
            }
            state.messages.push(message);
            true
        })
    }

    /// Put fetched history ahead of live messages that already arrived.
    pub fn install_history(&self, channel_id: Uuid, history: Vec<Message>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.conversation != Some(channel_id) {
                return false;
            }
            let fetched: HashSet<Uuid> = history.iter().map(|m| m.id).collect();
            let live = std::mem::take(&mut state.messages);
            state.messages = history;
            state
                .messages
                .extend(live.into_iter().filter(|m| !fetched.contains(&m.id)));
            true
        })
    }
}
