use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("VAPID credentials missing: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("payload is not valid UTF-8 JSON: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Push delivery is not configured. Analysis is unaffected.
    #[error("push credentials not configured (missing: {})", .missing.join(", "))]
    MissingCredentials { missing: Vec<&'static str> },

    #[error("user '{user_id}' has no push subscription")]
    NoSubscription { user_id: String },

    #[error("stored push subscription is malformed: {0}")]
    MalformedSubscription(String),

    #[error("push service rejected the message with status {status}")]
    Rejected { status: u16 },

    #[error("storage error: {0:#}")]
    Store(anyhow::Error),

    #[error("failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
