//! Out-of-band exchange of session descriptions
//!
//! A signaling service is a tiny store keyed by session name: the offerer
//! publishes its SDP, the answerer retrieves it and publishes a reply, and the
//! offerer polls until that reply appears. Every operation here is a single
//! request/response cycle; retrying belongs to the negotiation layer.

pub mod http;
pub mod memory;
pub mod server;

use async_trait::async_trait;

use crate::error::SignalingError;

pub use http::HttpSignalingClient;
pub use memory::MemorySignaling;

/// Acknowledgement of a successful publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// Result of asking for a published offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// Nothing published under this name
    NotFound,
    /// Something is published, but the password does not match
    Forbidden,
    /// The offer SDP
    Found(String),
}

/// The four operations of the signaling service
#[async_trait]
pub trait SignalingService: Send + Sync {
    async fn publish_offer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError>;

    async fn publish_answer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError>;

    async fn fetch_offer(&self, name: &str, password: &str) -> Result<RetrievalOutcome, SignalingError>;

    /// `Ok(None)` means the answer is not available yet
    async fn fetch_answer(&self, name: &str) -> Result<Option<String>, SignalingError>;
}

#[async_trait]
impl<S: SignalingService + ?Sized> SignalingService for std::sync::Arc<S> {
    async fn publish_offer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
        (**self).publish_offer(name, password, sdp).await
    }

    async fn publish_answer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
        (**self).publish_answer(name, password, sdp).await
    }

    async fn fetch_offer(&self, name: &str, password: &str) -> Result<RetrievalOutcome, SignalingError> {
        (**self).fetch_offer(name, password).await
    }

    async fn fetch_answer(&self, name: &str) -> Result<Option<String>, SignalingError> {
        (**self).fetch_answer(name).await
    }
}
