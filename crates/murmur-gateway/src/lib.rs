//! In-process realtime hub: topic channels, broadcast between connections,
//! and presence tracking, behind the `murmur_sync` transport traits.

pub mod connection;
pub mod hub;

pub use connection::{LocalChannel, LocalConnection};
pub use hub::Hub;
