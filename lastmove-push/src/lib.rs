//! lastmove-push: web push delivery for queued LastMove notifications

pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod transport;

pub use credentials::VapidCredentials;
pub use dispatcher::{DispatchSettings, DispatchSummary, Dispatcher, ImmediateMessage};
pub use error::{DispatchError, TransportError};
pub use payload::{PushPayload, SendOptions, Urgency};
pub use transport::{GatewayTransport, PushResponse, PushTransport};
