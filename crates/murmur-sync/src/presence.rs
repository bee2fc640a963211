//! Presence: the roster helper over a presence channel, and the session that
//! turns roster changes into user status updates.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use murmur_types::events::{
    PRESENCE_DIFF_EVENT, PRESENCE_STATE_EVENT, PresenceDiff, PresenceEntry, PresenceMeta,
    PresenceState,
};
use murmur_types::models::{UserPatch, UserStatus};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lifecycle::Detach;
use crate::state::StateHandle;
use crate::transport::{
    ConnectParams, Connection, ReadyStateHandler, RealtimeChannel, Transport,
};

type SyncCallback = Arc<dyn Fn(&Presence) + Send + Sync>;
type LeaveCallback = Arc<dyn Fn(&str, &PresenceEntry, &PresenceEntry) + Send + Sync>;

struct Roster {
    state: PresenceState,
    synced: bool,
    /// Diffs that arrived before the first full state.
    pending: Vec<PresenceDiff>,
}

struct LeaveNotice {
    key: String,
    current: PresenceEntry,
    left: PresenceEntry,
}

struct PresenceInner {
    roster: Mutex<Roster>,
    on_sync: Mutex<Option<SyncCallback>>,
    on_leave: Mutex<Option<LeaveCallback>>,
}

/// Client-side roster of a presence-tracked channel.
///
/// A `presence_state` event replaces the roster; `presence_diff` events add
/// and remove connection metas. Only diff leaves produce leave callbacks: a
/// key missing from a later full state is not treated as having left.
#[derive(Clone)]
pub struct Presence {
    inner: Arc<PresenceInner>,
}

impl Presence {
    pub fn new(channel: &dyn RealtimeChannel) -> Self {
        let presence = Self {
            inner: Arc::new(PresenceInner {
                roster: Mutex::new(Roster {
                    state: PresenceState::new(),
                    synced: false,
                    pending: Vec::new(),
                }),
                on_sync: Mutex::new(None),
                on_leave: Mutex::new(None),
            }),
        };

        let on_state = presence.clone();
        channel.on(
            PRESENCE_STATE_EVENT,
            Arc::new(move |payload: Value| {
                if let Some(state) = decode_roster(PRESENCE_STATE_EVENT, payload) {
                    on_state.apply_state(state);
                }
            }),
        );

        let on_diff = presence.clone();
        channel.on(
            PRESENCE_DIFF_EVENT,
            Arc::new(move |payload: Value| {
                if let Some(diff) = decode_diff(payload) {
                    on_diff.apply_diff(diff);
                }
            }),
        );

        presence
    }

    pub fn on_sync(&self, callback: impl Fn(&Presence) + Send + Sync + 'static) {
        *self.inner.on_sync.lock() = Some(Arc::new(callback));
    }

    /// `callback(key, current, left)`; `current` holds the metas still present.
    pub fn on_leave(
        &self,
        callback: impl Fn(&str, &PresenceEntry, &PresenceEntry) + Send + Sync + 'static,
    ) {
        *self.inner.on_leave.lock() = Some(Arc::new(callback));
    }

    pub fn list(&self) -> Vec<(String, PresenceEntry)> {
        self.inner
            .roster
            .lock()
            .state
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    pub fn apply_state(&self, state: PresenceState) {
        let notices = {
            let mut roster = self.inner.roster.lock();
            roster.state = state;
            roster.synced = true;
            let pending = std::mem::take(&mut roster.pending);
            let mut notices = Vec::new();
            for diff in pending {
                notices.extend(merge_diff(&mut roster.state, diff));
            }
            notices
        };
        self.notify(notices);
    }

    pub fn apply_diff(&self, diff: PresenceDiff) {
        let notices = {
            let mut roster = self.inner.roster.lock();
            if !roster.synced {
                roster.pending.push(diff);
                return;
            }
            merge_diff(&mut roster.state, diff)
        };
        self.notify(notices);
    }

    fn notify(&self, notices: Vec<LeaveNotice>) {
        let on_leave = self.inner.on_leave.lock().clone();
        if let Some(on_leave) = on_leave {
            for notice in &notices {
                on_leave(&notice.key, &notice.current, &notice.left);
            }
        }
        let on_sync = self.inner.on_sync.lock().clone();
        if let Some(on_sync) = on_sync {
            on_sync(self);
        }
    }
}

impl fmt::Debug for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roster = self.inner.roster.lock();
        f.debug_struct("Presence")
            .field("keys", &roster.state.len())
            .field("synced", &roster.synced)
            .finish()
    }
}

fn merge_diff(state: &mut PresenceState, diff: PresenceDiff) -> Vec<LeaveNotice> {
    for (key, joined) in diff.joins {
        let entry = state.entry(key).or_default();
        let known: HashSet<String> = entry.metas.iter().map(|m| m.phx_ref.clone()).collect();
        entry
            .metas
            .extend(joined.metas.into_iter().filter(|m| !known.contains(&m.phx_ref)));
    }

    let mut notices = Vec::new();
    for (key, left) in diff.leaves {
        let Some(current) = state.get_mut(&key) else {
            continue;
        };
        let gone: HashSet<&str> = left.metas.iter().map(|m| m.phx_ref.as_str()).collect();
        current.metas.retain(|m| !gone.contains(m.phx_ref.as_str()));
        let current = current.clone();
        if current.metas.is_empty() {
            state.remove(&key);
        }
        notices.push(LeaveNotice { key, current, left });
    }
    notices
}

fn decode<T: DeserializeOwned>(event: &str, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("ignoring {}", SyncError::payload(event, e));
            None
        }
    }
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    metas: Vec<Value>,
}

#[derive(Deserialize)]
struct RawDiff {
    #[serde(default)]
    joins: BTreeMap<String, Value>,
    #[serde(default)]
    leaves: BTreeMap<String, Value>,
}

/// Decode a roster entry by entry. Malformed entries and metas are dropped
/// without discarding the rest of the payload.
fn decode_roster(event: &str, payload: Value) -> Option<PresenceState> {
    let entries: BTreeMap<String, Value> = decode(event, payload)?;
    Some(roster_entries(event, entries))
}

fn decode_diff(payload: Value) -> Option<PresenceDiff> {
    let raw: RawDiff = decode(PRESENCE_DIFF_EVENT, payload)?;
    Some(PresenceDiff {
        joins: roster_entries(PRESENCE_DIFF_EVENT, raw.joins),
        leaves: roster_entries(PRESENCE_DIFF_EVENT, raw.leaves),
    })
}

fn roster_entries(event: &str, entries: BTreeMap<String, Value>) -> PresenceState {
    entries
        .into_iter()
        .filter_map(|(key, entry)| {
            let raw: RawEntry = decode(event, entry)?;
            let had_metas = !raw.metas.is_empty();
            let metas: Vec<PresenceMeta> = raw
                .metas
                .into_iter()
                .filter_map(|meta| decode::<PresenceMeta>(event, meta))
                .collect();
            if had_metas && metas.is_empty() {
                debug!("ignoring presence entry {:?} with no usable metas", key);
                return None;
            }
            Some((key, PresenceEntry { metas }))
        })
        .collect()
}

/// Connection plus presence attachment for one current-user identity.
pub struct PresenceSession {
    user_id: Uuid,
    connection: Arc<dyn Connection>,
    channel: Arc<dyn RealtimeChannel>,
}

impl PresenceSession {
    /// Connect as `user_id`, join the presence topic and start folding
    /// roster changes into `state`.
    pub fn open(
        transport: &dyn Transport,
        config: &SyncConfig,
        user_id: Uuid,
        state: StateHandle,
        on_ready: ReadyStateHandler,
    ) -> Self {
        let connection = transport.connect(&config.socket_url, ConnectParams { user_id });
        connection.on_ready_state(on_ready);

        let channel = connection.channel(&config.presence_topic);
        let presence = Presence::new(channel.as_ref());

        let leave_state = state.clone();
        presence.on_leave(move |key, current, _left| {
            if !current.metas.is_empty() {
                return;
            }
            match key.parse::<Uuid>() {
                Ok(id) => leave_state.update_user(id, UserPatch::went_offline()),
                Err(_) => debug!("ignoring presence leave for non-user key {:?}", key),
            }
        });

        presence.on_sync(move |presence| {
            let online = presence.list().into_iter().filter_map(|(_, entry)| {
                let id = entry.metas.first().and_then(|meta| meta.user_id)?;
                Some((id, UserPatch::status(UserStatus::Online)))
            });
            state.update_users(online);
        });

        channel.join();
        info!("presence attached for {} on {}", user_id, config.presence_topic);

        Self {
            user_id,
            connection,
            channel,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

}

impl Detach for PresenceSession {
    fn detach(self) {
        self.channel.leave();
        self.connection.disconnect();
        info!("presence detached for {}", self.user_id);
    }
}
