use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use murmur_types::events::{TYPING_EVENT, TypingEvent};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lifecycle::Detach;
use crate::state::StateHandle;
use crate::transport::{Connection, RealtimeChannel};

/// Which typing channel is live: one per conversation, bound to the
/// connection of the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingKey {
    pub channel_id: Uuid,
    pub user_id: Uuid,
}

/// Ephemeral typing broadcast for one conversation.
pub struct TypingChannel {
    key: TypingKey,
    connection: Arc<dyn Connection>,
    channel: Arc<dyn RealtimeChannel>,
}

impl TypingChannel {
    pub fn open(
        connection: Arc<dyn Connection>,
        config: &SyncConfig,
        key: TypingKey,
        state: StateHandle,
    ) -> Self {
        let channel = connection.channel(&config.typing_topic(key.channel_id));

        channel.on(
            TYPING_EVENT,
            Arc::new(move |payload: Value| match serde_json::from_value::<TypingEvent>(payload) {
                Ok(event) => {
                    if !state.set_typing(event.user_id, event.is_typing) {
                        debug!("typing event for {} changed nothing", event.user_id);
                    }
                }
                Err(e) => debug!("ignoring {}", SyncError::payload(TYPING_EVENT, e)),
            }),
        );
        channel.join();
        debug!("typing channel {} joined", channel.topic());

        Self {
            key,
            connection,
            channel,
        }
    }

    /// Announce the current user's typing state. Dropped unless the
    /// connection is open.
    pub fn send(&self, is_typing: bool) -> bool {
        if !self.connection.ready_state().is_open() {
            debug!("dropping typing={} on {}: not connected", is_typing, self.channel.topic());
            return false;
        }
        let event = TypingEvent {
            user_id: self.key.user_id,
            is_typing,
        };
        match serde_json::to_value(event) {
            Ok(payload) => {
                self.channel.push(TYPING_EVENT, payload);
                true
            }
            Err(e) => {
                warn!("failed to encode typing event: {}", e);
                false
            }
        }
    }
}

impl Detach for TypingChannel {
    fn detach(self) {
        self.channel.leave();
        debug!("typing channel {} left", self.channel.topic());
    }
}
