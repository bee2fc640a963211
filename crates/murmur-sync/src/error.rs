use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("record store: {0}")]
    Store(String),

    #[error("malformed `{event}` payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no tokio runtime is running on this thread")]
    NoRuntime,
}

impl SyncError {
    pub fn payload(event: &str, source: serde_json::Error) -> Self {
        Self::Payload {
            event: event.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
