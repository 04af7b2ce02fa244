//! In-process signaling store
//!
//! Implements the same password gating as the hosted service. Backs the local
//! signaling server and lets two peers in one process find each other.
//!
//! A session lives from its offer until the offerer has fetched the answer.
//! Sessions nobody finishes expire after [`SESSION_TTL`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::error::SignalingError;
use crate::signaling::{Ack, RetrievalOutcome, SignalingService};

/// Matches the offerer's polling ceiling; nobody asks for a session after that
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

struct StoredSession {
    password: String,
    offer: String,
    answer: Option<String>,
    published_at: Instant,
}

/// Number of requests served per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub publish_offer: usize,
    pub publish_answer: usize,
    pub fetch_offer: usize,
    pub fetch_answer: usize,
}

#[derive(Default)]
struct Counters {
    publish_offer: AtomicUsize,
    publish_answer: AtomicUsize,
    fetch_offer: AtomicUsize,
    fetch_answer: AtomicUsize,
}

/// Signaling store held in memory
#[derive(Default)]
pub struct MemorySignaling {
    sessions: Mutex<HashMap<String, StoredSession>>,
    counters: Counters,
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> OperationCounts {
        OperationCounts {
            publish_offer: self.counters.publish_offer.load(Ordering::Relaxed),
            publish_answer: self.counters.publish_answer.load(Ordering::Relaxed),
            fetch_offer: self.counters.fetch_offer.load(Ordering::Relaxed),
            fetch_answer: self.counters.fetch_answer.load(Ordering::Relaxed),
        }
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Lock the session map with expired sessions already dropped
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, StoredSession>> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.published_at.elapsed() < SESSION_TTL);
        if sessions.len() < before {
            tracing::debug!("Expired {} signaling session(s)", before - sessions.len());
        }
        sessions
    }
}

fn status(status: u16, body: &str) -> SignalingError {
    SignalingError::UnexpectedStatus {
        status,
        body: body.to_string(),
    }
}

#[async_trait]
impl SignalingService for MemorySignaling {
    async fn publish_offer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
        self.counters.publish_offer.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get(name) {
            if existing.password != password {
                return Err(status(403, "session name is taken"));
            }
        }

        // A new offer starts a new attempt, so any stale answer goes with it
        sessions.insert(
            name.to_string(),
            StoredSession {
                password: password.to_string(),
                offer: sdp.to_string(),
                answer: None,
                published_at: Instant::now(),
            },
        );
        Ok(Ack)
    }

    async fn publish_answer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
        self.counters.publish_answer.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| status(404, "no offer published for this session"))?;

        if session.password != password {
            return Err(status(403, "incorrect password"));
        }
        session.answer = Some(sdp.to_string());
        Ok(Ack)
    }

    async fn fetch_offer(&self, name: &str, password: &str) -> Result<RetrievalOutcome, SignalingError> {
        self.counters.fetch_offer.fetch_add(1, Ordering::Relaxed);

        let sessions = self.sessions();
        Ok(match sessions.get(name) {
            None => RetrievalOutcome::NotFound,
            Some(session) if session.password != password => RetrievalOutcome::Forbidden,
            Some(session) => RetrievalOutcome::Found(session.offer.clone()),
        })
    }

    async fn fetch_answer(&self, name: &str) -> Result<Option<String>, SignalingError> {
        self.counters.fetch_answer.fetch_add(1, Ordering::Relaxed);

        // Delivering the answer completes the exchange
        let mut sessions = self.sessions();
        let answered = sessions.get(name).map_or(false, |s| s.answer.is_some());
        if !answered {
            return Ok(None);
        }
        Ok(sessions.remove(name).and_then(|s| s.answer))
    }
}
