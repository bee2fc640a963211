//! Change feed: every committed insert or update is broadcast to the
//! subscribers whose stream and filter match it.

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use murmur_sync::{ChangeFilter, ChangeHandler, ChangeStream, Subscription};
use murmur_types::events::ChangeEvent;

const FEED_CAPACITY: usize = 1024;

pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
    runtime: Handle,
}

impl ChangeFeed {
    pub fn new(runtime: Handle) -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx, runtime }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.tx.send(event);
    }

    /// Deliver matching events to `handler`, in publish order, until the
    /// returned subscription is dropped or unsubscribed.
    pub fn subscribe(
        &self,
        stream: ChangeStream,
        filter: ChangeFilter,
        handler: ChangeHandler,
    ) -> Subscription {
        // Receiver exists before this returns, so nothing published after
        // the subscribe call is missed.
        let mut rx = self.tx.subscribe();
        let task = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if stream.matches(&event.record) && filter.matches(event.kind) {
                            handler(event);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("{:?} subscriber lagged, skipped {} changes", stream, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("{:?} feed closed", stream);
        });
        Subscription::new(move || task.abort())
    }
}
