use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_sync::{ConnectParams, Connection, ReadyState, SyncError, Transport};
use murmur_types::events::{
    PRESENCE_DIFF_EVENT, PRESENCE_STATE_EVENT, PresenceDiff, PresenceEntry, PresenceMeta,
    PresenceState,
};

use crate::connection::{ConnShared, Delivery, LocalConnection, pump};

struct Route {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Member {
    user_id: Uuid,
    meta: PresenceMeta,
}

#[derive(Default)]
struct HubState {
    /// conn_id -> delivery queue
    routes: HashMap<Uuid, Route>,
    /// topic -> conn_id -> member
    topics: HashMap<String, HashMap<Uuid, Member>>,
    tracked: HashSet<String>,
    next_ref: u64,
}

impl HubState {
    fn deliver(&self, conn_id: Uuid, topic: &str, event: &str, payload: Value) {
        if let Some(route) = self.routes.get(&conn_id) {
            let _ = route.tx.send(Delivery::Event {
                topic: topic.to_string(),
                event: event.to_string(),
                payload,
            });
        }
    }

    fn others(&self, topic: &str, conn_id: Uuid) -> Vec<Uuid> {
        self.topics
            .get(topic)
            .map(|members| members.keys().copied().filter(|id| *id != conn_id).collect())
            .unwrap_or_default()
    }

    fn snapshot(&self, topic: &str) -> PresenceState {
        let mut state = PresenceState::new();
        if let Some(members) = self.topics.get(topic) {
            for member in members.values() {
                state
                    .entry(member.user_id.to_string())
                    .or_default()
                    .metas
                    .push(member.meta.clone());
            }
        }
        state
    }

    /// Remove `conn_id` from `topic`, telling the remaining members of a
    /// tracked topic that it left.
    fn remove_member(&mut self, conn_id: Uuid, topic: &str) {
        let Some(members) = self.topics.get_mut(topic) else {
            return;
        };
        let Some(member) = members.remove(&conn_id) else {
            return;
        };
        if members.is_empty() {
            self.topics.remove(topic);
        }
        debug!("{} left {}", member.user_id, topic);

        if self.tracked.contains(topic) {
            let diff = PresenceDiff {
                joins: PresenceState::new(),
                leaves: single(&member),
            };
            if let Some(payload) = encode(&diff) {
                for other in self.others(topic, conn_id) {
                    self.deliver(other, topic, PRESENCE_DIFF_EVENT, payload.clone());
                }
            }
        }
    }
}

fn single(member: &Member) -> PresenceState {
    PresenceState::from([(
        member.user_id.to_string(),
        PresenceEntry {
            metas: vec![member.meta.clone()],
        },
    )])
}

fn encode<T: serde::Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("failed to encode presence payload: {}", e);
            None
        }
    }
}

struct HubInner {
    runtime: Handle,
    accepting: AtomicBool,
    state: Mutex<HubState>,
}

/// Routes channel events between local connections.
///
/// Every connection gets its own delivery queue pumped by its own task. A
/// push reaches the other joined members of the topic. Topics registered with
/// [`Hub::track_presence`] also send `presence_state` to a joiner and
/// `presence_diff` to everyone else on joins, leaves and disconnects.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new() -> murmur_sync::Result<Self> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(HubInner {
                runtime,
                accepting: AtomicBool::new(true),
                state: Mutex::new(HubState::default()),
            }),
        })
    }

    pub fn track_presence(&self, topic: impl Into<String>) {
        self.inner.state.lock().tracked.insert(topic.into());
    }

    /// While false, new connections start and stay `Closed`.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Drop every connection of `user_id`, as a network loss would.
    /// Returns how many were dropped.
    pub fn kick(&self, user_id: Uuid) -> usize {
        let conn_ids: Vec<Uuid> = self
            .inner
            .state
            .lock()
            .routes
            .iter()
            .filter(|(_, route)| route.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();

        for conn_id in &conn_ids {
            self.disconnect(*conn_id);
        }
        if !conn_ids.is_empty() {
            info!("kicked {} ({} connections)", user_id, conn_ids.len());
        }
        conn_ids.len()
    }

    /// Users with at least one joined connection on `topic`.
    pub fn members(&self, topic: &str) -> Vec<Uuid> {
        let state = self.inner.state.lock();
        let mut users: Vec<Uuid> = state
            .topics
            .get(topic)
            .map(|members| members.values().map(|m| m.user_id).collect())
            .unwrap_or_default();
        users.sort();
        users.dedup();
        users
    }

    pub(crate) fn join(&self, conn_id: Uuid, topic: &str) {
        let mut state = self.inner.state.lock();
        let Some(user_id) = state.routes.get(&conn_id).map(|route| route.user_id) else {
            debug!("join of {} on a closed connection, ignored", topic);
            return;
        };
        if state
            .topics
            .get(topic)
            .is_some_and(|members| members.contains_key(&conn_id))
        {
            return;
        }

        state.next_ref += 1;
        let member = Member {
            user_id,
            meta: PresenceMeta {
                phx_ref: state.next_ref.to_string(),
                user_id: Some(user_id),
                online_at: Some(Utc::now()),
            },
        };
        let diff = PresenceDiff {
            joins: single(&member),
            leaves: PresenceState::new(),
        };
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id, member);
        debug!("{} joined {}", user_id, topic);

        if !state.tracked.contains(topic) {
            return;
        }
        if let Some(payload) = encode(&state.snapshot(topic)) {
            state.deliver(conn_id, topic, PRESENCE_STATE_EVENT, payload);
        }
        if let Some(payload) = encode(&diff) {
            for other in state.others(topic, conn_id) {
                state.deliver(other, topic, PRESENCE_DIFF_EVENT, payload.clone());
            }
        }
    }

    pub(crate) fn leave(&self, conn_id: Uuid, topic: &str) {
        self.inner.state.lock().remove_member(conn_id, topic);
    }

    pub(crate) fn push(&self, conn_id: Uuid, topic: &str, event: &str, payload: Value) {
        let state = self.inner.state.lock();
        let joined = state
            .topics
            .get(topic)
            .is_some_and(|members| members.contains_key(&conn_id));
        if !joined {
            debug!("push of {} on {} from a non-member, dropped", event, topic);
            return;
        }
        for other in state.others(topic, conn_id) {
            state.deliver(other, topic, event, payload.clone());
        }
    }

    pub(crate) fn disconnect(&self, conn_id: Uuid) {
        let mut state = self.inner.state.lock();
        if !state.routes.contains_key(&conn_id) {
            return;
        }

        let topics: Vec<String> = state
            .topics
            .iter()
            .filter(|(_, members)| members.contains_key(&conn_id))
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in topics {
            state.remove_member(conn_id, &topic);
        }

        // Dropping the route closes the queue once Closed is delivered.
        if let Some(route) = state.routes.remove(&conn_id) {
            let _ = route.tx.send(Delivery::Ready(ReadyState::Closed));
            info!("{} disconnected", route.user_id);
        }
    }
}

impl Transport for Hub {
    fn connect(&self, endpoint: &str, params: ConnectParams) -> Arc<dyn Connection> {
        let user_id = params.user_id;
        if !self.inner.accepting.load(Ordering::SeqCst) {
            warn!("refusing connection from {} to {}", user_id, endpoint);
            let shared = Arc::new(ConnShared::new(user_id, ReadyState::Closed));
            return Arc::new(LocalConnection::new(shared, self.clone()));
        }

        let shared = Arc::new(ConnShared::new(user_id, ReadyState::Connecting));
        let (tx, rx) = mpsc::unbounded_channel();
        // Opening is reported through the queue, like any other transition.
        let _ = tx.send(Delivery::Ready(ReadyState::Open));
        self.inner
            .state
            .lock()
            .routes
            .insert(shared.id, Route { user_id, tx });
        self.inner.runtime.spawn(pump(shared.clone(), rx));

        info!("{} connected to {}", user_id, endpoint);
        Arc::new(LocalConnection::new(shared, self.clone()))
    }
}
