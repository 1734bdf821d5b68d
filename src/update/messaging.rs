//! The messaging collaborator as seen by the update engine.
//!
//! The transport (connection, reconnects, handshake) lives outside this crate.
//! It implements [`Messenger`] for outgoing events and hands incoming
//! [`UPDATE_RESPONSE_EVENT`] payloads to
//! [`ManifestResolver::deliver_response`](crate::ManifestResolver::deliver_response).

use async_trait::async_trait;

/// Event emitted to ask for an update.
pub const UPDATE_CHECK_EVENT: &str = "is_update_available";

/// Event carrying the reply.
pub const UPDATE_RESPONSE_EVENT: &str = "update_check_response";

/// Error type returned by transports.
pub type MessagingError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outgoing side of the bidirectional event transport.
#[async_trait]
pub trait Messenger: Send + Sync + 'static {
    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Sends one event with a JSON payload.
    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), MessagingError>;
}
