//! Peer transport boundary
//!
//! The negotiation layer only needs four things from the media engine:
//! produce a local description, accept a remote one, report when ICE
//! gathering has finished, and report connection state. [`WebRtcTransport`]
//! provides them on top of webrtc-rs.

pub mod webrtc;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::TransportError;
use crate::session::SessionDescription;

pub use self::webrtc::{MediaEndpoints, WebRtcTransport};

/// Connection state reported by the media engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Start generating a local offer for the send-recv audio track
    async fn create_offer(&self) -> Result<(), TransportError>;

    /// Apply a remote description. Accepting an offer also starts generating
    /// the local answer.
    async fn accept_remote(&self, description: &SessionDescription) -> Result<(), TransportError>;

    /// Wait for ICE gathering to complete and return the full local
    /// description, candidates included. There is no timeout; callers race
    /// this against their own shutdown signal.
    async fn local_description(&self) -> Result<SessionDescription, TransportError>;

    /// Watch the connection state
    fn state(&self) -> watch::Receiver<TransportState>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: PeerTransport + ?Sized> PeerTransport for Arc<T> {
    async fn create_offer(&self) -> Result<(), TransportError> {
        (**self).create_offer().await
    }

    async fn accept_remote(&self, description: &SessionDescription) -> Result<(), TransportError> {
        (**self).accept_remote(description).await
    }

    async fn local_description(&self) -> Result<SessionDescription, TransportError> {
        (**self).local_description().await
    }

    fn state(&self) -> watch::Receiver<TransportState> {
        (**self).state()
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }
}
