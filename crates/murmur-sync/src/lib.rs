//! Client-side chat state synchronization.
//!
//! Reconciles persisted record changes, presence and typing events into one
//! [`ChatView`], and compresses local keystrokes into debounced typing
//! signals.

pub mod composer;
pub mod config;
pub mod debounce;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod presence;
pub mod records;
pub mod state;
pub mod store;
pub mod transport;
pub mod typing;
pub mod view;

#[cfg(test)]
mod fakes;

pub use composer::{Composer, Key};
pub use config::SyncConfig;
pub use debounce::{ActivitySignals, Debouncer, Edge};
pub use error::{Result, SyncError};
pub use records::{ChangeFilter, ChangeHandler, ChangeStream, RecordStore, Subscription};
pub use state::{ChatState, StateHandle};
pub use store::ChatStore;
pub use transport::{
    ConnectParams, Connection, EventHandler, ReadyState, ReadyStateHandler, RealtimeChannel,
    Transport,
};
pub use view::{ChatView, MessageView};
