use std::cmp::Ordering;

use murmur_types::models::{Channel, Message, User};

use crate::state::ChatState;

/// A message joined with its author's current record.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    /// `None` until the author's record has arrived.
    pub author: Option<User>,
}

/// What the UI renders, derived from [`ChatState`] on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub messages: Vec<MessageView>,
    pub channels: Vec<Channel>,
    pub users: Vec<User>,
}

impl ChatView {
    pub fn derive(state: &ChatState) -> Self {
        let messages = state
            .messages
            .iter()
            .map(|message| MessageView {
                message: message.clone(),
                author: state.users.get(&message.author_id).cloned(),
            })
            .collect();

        let mut channels = state.channels.clone();
        channels.sort_by(|a, b| collate(&a.slug, &b.slug));

        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| user.username.is_some())
            .cloned()
            .collect();
        users.sort_by(|a, b| {
            collate(
                a.username.as_deref().unwrap_or_default(),
                b.username.as_deref().unwrap_or_default(),
            )
            .then_with(|| a.id.cmp(&b.id))
        });

        Self {
            messages,
            channels,
            users,
        }
    }

    pub fn typing_summary(&self) -> Option<String> {
        typing_summary(&self.users)
    }

    pub fn online_users(&self) -> impl Iterator<Item = &User> {
        self.users.iter().filter(|user| user.is_online())
    }
}

impl From<&ChatState> for ChatView {
    fn from(state: &ChatState) -> Self {
        Self::derive(state)
    }
}

/// Case-insensitive ordering; on a tie lowercase sorts first, as in the
/// root collation ("alice" < "Alice" < "bob").
pub fn collate(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| b.cmp(a))
}

/// "alice is typing" / "alice, bob are typing".
pub fn typing_summary(users: &[User]) -> Option<String> {
    let typing: Vec<&str> = users
        .iter()
        .filter(|user| user.is_typing)
        .filter_map(|user| user.username.as_deref())
        .collect();

    match typing.len() {
        0 => None,
        1 => Some(format!("{} is typing", typing[0])),
        _ => Some(format!("{} are typing", typing.join(", "))),
    }
}
