//! Session identity, session descriptions and connection state

use std::fmt;

/// A named, password-gated meeting point on the signaling service.
///
/// Immutable for the lifetime of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    name: String,
    password: String,
}

impl Session {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Which half of the offer/answer exchange an SDP belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    /// JSON field name used when publishing
    pub fn field_name(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// An opaque SDP string tagged with its role in the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Which side of the negotiation this peer ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// Negotiation progress of a single connection attempt.
///
/// Progress is monotonic. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    GatheringLocalDescription,
    AwaitingRemoteDescription,
    PublishingAnswer,
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Position along the happy path. The two role-specific waiting states
    /// share a rank since a peer only ever visits one of them.
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::New => 0,
            ConnectionState::GatheringLocalDescription => 1,
            ConnectionState::AwaitingRemoteDescription | ConnectionState::PublishingAnswer => 2,
            ConnectionState::Connecting => 3,
            ConnectionState::Connected => 4,
            ConnectionState::Closed | ConnectionState::Failed => 5,
        }
    }

    /// Whether moving from `self` to `next` respects monotonic progress
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::GatheringLocalDescription => "gathering-local-description",
            ConnectionState::AwaitingRemoteDescription => "awaiting-remote-description",
            ConnectionState::PublishingAnswer => "publishing-answer",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}
