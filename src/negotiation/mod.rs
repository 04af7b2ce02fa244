//! Session negotiation
//!
//! Decides whether this peer offers or answers, drives the transport through
//! SDP generation and acceptance, and moves the descriptions through the
//! signaling service.
//!
//! ```text
//!   fetch offer ──NotFound──▶ create offer ─▶ gather ─▶ publish offer ─▶ poll answer ─▶ accept answer ─┐
//!        │                                                                                          ├─▶ Connecting ─▶ Connected
//!        ├──Found(sdp)──▶ accept offer ─▶ gather ─▶ publish answer ────────────────────────────────┘
//!        │
//!        └──Forbidden──▶ Closed
//! ```

pub mod schedule;
pub mod shutdown;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{NegotiationError, TransportError};
use crate::session::{ConnectionState, Role, Session, SessionDescription};
use crate::signaling::{RetrievalOutcome, SignalingService};
use crate::transport::{PeerTransport, TransportState};

pub use schedule::AnswerPollSchedule;
pub use shutdown::ShutdownSignal;

/// Offer/answer state machine for one connection attempt
pub struct Negotiator<S, T> {
    signaling: S,
    transport: T,
    schedule: AnswerPollSchedule,
    shutdown: ShutdownSignal,
    state: watch::Sender<ConnectionState>,
    role: Mutex<Option<Role>>,
    started: AtomicBool,
}

impl<S, T> Negotiator<S, T>
where
    S: SignalingService,
    T: PeerTransport,
{
    pub fn new(signaling: S, transport: T) -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        Self {
            signaling,
            transport,
            schedule: AnswerPollSchedule::default(),
            shutdown: ShutdownSignal::new(),
            state,
            role: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_schedule(mut self, schedule: AnswerPollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Share an externally owned shutdown signal
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle that cancels an in-flight [`connect`](Self::connect)
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn role(&self) -> Option<Role> {
        *self.role.lock()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the negotiation to completion.
    ///
    /// Returns `Connected` on success. On failure the state is left at
    /// `Closed` (password rejection, timeout, cancellation) or `Failed`
    /// (signaling or transport error) and the transport is closed.
    pub async fn connect(&self, session: &Session) -> Result<ConnectionState, NegotiationError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NegotiationError::AlreadyStarted(self.state()));
        }

        tracing::info!(session = session.name(), "Starting negotiation");

        match self.run(session).await {
            Ok(()) => Ok(self.state()),
            Err(e) => {
                let terminal = match e {
                    NegotiationError::Authorization
                    | NegotiationError::Timeout { .. }
                    | NegotiationError::Cancelled => ConnectionState::Closed,
                    _ => ConnectionState::Failed,
                };
                tracing::warn!(session = session.name(), error = %e, "Negotiation ended in {}", terminal);
                self.advance(terminal);

                if let Err(close_err) = self.transport.close().await {
                    tracing::debug!("Transport close after failed negotiation: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Cancel any in-flight negotiation and close the transport
    pub async fn close(&self) {
        self.shutdown.trigger();
        self.advance(ConnectionState::Closed);
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Transport close: {}", e);
        }
    }

    async fn run(&self, session: &Session) -> Result<(), NegotiationError> {
        let outcome = self
            .cancellable(self.signaling.fetch_offer(session.name(), session.password()))
            .await??;

        match outcome {
            RetrievalOutcome::NotFound => self.run_offerer(session).await,
            RetrievalOutcome::Found(sdp) => self.run_answerer(session, sdp).await,
            RetrievalOutcome::Forbidden => Err(NegotiationError::Authorization),
        }
    }

    async fn run_offerer(&self, session: &Session) -> Result<(), NegotiationError> {
        *self.role.lock() = Some(Role::Offerer);
        tracing::info!(session = session.name(), "No existing offer, acting as offerer");

        self.advance(ConnectionState::GatheringLocalDescription);
        self.transport.create_offer().await?;
        let offer = self.wait_local_description().await?;

        self.cancellable(self.signaling.publish_offer(session.name(), session.password(), &offer.sdp))
            .await??;
        self.advance(ConnectionState::AwaitingRemoteDescription);

        let answer = self.poll_answer(session.name()).await?;
        self.transport
            .accept_remote(&SessionDescription::answer(answer))
            .await?;

        self.advance(ConnectionState::Connecting);
        self.wait_connected().await
    }

    async fn run_answerer(&self, session: &Session, offer: String) -> Result<(), NegotiationError> {
        *self.role.lock() = Some(Role::Answerer);
        tracing::info!(session = session.name(), "Found existing offer, acting as answerer");

        self.transport
            .accept_remote(&SessionDescription::offer(offer))
            .await?;
        self.advance(ConnectionState::GatheringLocalDescription);
        let answer = self.wait_local_description().await?;

        self.advance(ConnectionState::PublishingAnswer);
        self.cancellable(self.signaling.publish_answer(session.name(), session.password(), &answer.sdp))
            .await??;

        self.advance(ConnectionState::Connecting);
        self.wait_connected().await
    }

    /// Poll for the answer following the backoff schedule.
    ///
    /// The first request goes out immediately. Only a not-yet-available
    /// reply is retried; any other failure ends the attempt.
    async fn poll_answer(&self, name: &str) -> Result<String, NegotiationError> {
        let mut elapsed = Duration::ZERO;

        loop {
            if self.shutdown.is_triggered() {
                return Err(NegotiationError::Cancelled);
            }

            if let Some(answer) = self.cancellable(self.signaling.fetch_answer(name)).await?? {
                tracing::info!(session = name, waited = ?elapsed, "Answer received");
                return Ok(answer);
            }

            let interval = self.schedule.interval_after(elapsed);
            tracing::debug!(session = name, waited = ?elapsed, next = ?interval, "No answer yet");
            self.cancellable(tokio::time::sleep(interval)).await?;
            elapsed += interval;

            if elapsed >= self.schedule.max_duration() {
                return Err(NegotiationError::Timeout { waited: elapsed });
            }
        }
    }

    /// Gathering may never finish, so this wait is raced against shutdown
    async fn wait_local_description(&self) -> Result<SessionDescription, NegotiationError> {
        let description = self.cancellable(self.transport.local_description()).await??;
        tracing::debug!(
            sdp_type = %description.sdp_type,
            bytes = description.sdp.len(),
            "Local description complete"
        );
        Ok(description)
    }

    async fn wait_connected(&self) -> Result<(), NegotiationError> {
        let mut states = self.transport.state();

        loop {
            let current = *states.borrow_and_update();
            match current {
                TransportState::Connected => {
                    self.advance(ConnectionState::Connected);
                    return Ok(());
                }
                TransportState::Failed => {
                    return Err(TransportError::Setup("peer connection failed".to_string()).into());
                }
                TransportState::Closed => return Err(TransportError::Closed.into()),
                _ => {}
            }

            if self.cancellable(states.changed()).await?.is_err() {
                return Err(TransportError::Closed.into());
            }
        }
    }

    /// Race `fut` against the shutdown signal
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, NegotiationError> {
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => Err(NegotiationError::Cancelled),
            output = fut => Ok(output),
        }
    }

    fn advance(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                tracing::debug!("Connection state {} -> {}", current, next);
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignalingError;
    use crate::signaling::{Ack, MemorySignaling};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Transport that completes gathering instantly and connects as soon as
    /// both descriptions are in place
    struct ScriptedTransport {
        label: &'static str,
        gathers: bool,
        local: watch::Sender<Option<SessionDescription>>,
        state: watch::Sender<TransportState>,
        offers_created: AtomicUsize,
        remotes_accepted: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(label: &'static str) -> Arc<Self> {
            Self::build(label, true)
        }

        fn never_gathers(label: &'static str) -> Arc<Self> {
            Self::build(label, false)
        }

        fn build(label: &'static str, gathers: bool) -> Arc<Self> {
            Arc::new(Self {
                label,
                gathers,
                local: watch::channel(None).0,
                state: watch::channel(TransportState::New).0,
                offers_created: AtomicUsize::new(0),
                remotes_accepted: AtomicUsize::new(0),
            })
        }

        fn gather(&self, description: SessionDescription) {
            if self.gathers {
                self.local.send_replace(Some(description));
            }
        }
    }

    #[async_trait]
    impl PeerTransport for ScriptedTransport {
        async fn create_offer(&self) -> Result<(), TransportError> {
            self.offers_created.fetch_add(1, Ordering::SeqCst);
            self.gather(SessionDescription::offer(format!("offer-from-{}", self.label)));
            Ok(())
        }

        async fn accept_remote(&self, description: &SessionDescription) -> Result<(), TransportError> {
            self.remotes_accepted.fetch_add(1, Ordering::SeqCst);
            match description.sdp_type {
                crate::session::SdpType::Offer => {
                    self.gather(SessionDescription::answer(format!("answer-from-{}", self.label)));
                }
                crate::session::SdpType::Answer => {}
            }
            self.state.send_replace(TransportState::Connected);
            Ok(())
        }

        async fn local_description(&self) -> Result<SessionDescription, TransportError> {
            let mut rx = self.local.subscribe();
            let description = rx
                .wait_for(|d| d.is_some())
                .await
                .map_err(|_| TransportError::Closed)?
                .clone();
            description.ok_or(TransportError::Closed)
        }

        fn state(&self) -> watch::Receiver<TransportState> {
            self.state.subscribe()
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.state.send_replace(TransportState::Closed);
            Ok(())
        }
    }

    /// Memory signaling with injectable failures
    struct FaultySignaling {
        inner: MemorySignaling,
        fail_publish: bool,
        fail_fetch_answer: bool,
    }

    #[async_trait]
    impl SignalingService for FaultySignaling {
        async fn publish_offer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
            let result = self.inner.publish_offer(name, password, sdp).await;
            if self.fail_publish {
                return Err(SignalingError::NoResponse("connection reset".to_string()));
            }
            result
        }

        async fn publish_answer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
            self.inner.publish_answer(name, password, sdp).await
        }

        async fn fetch_offer(&self, name: &str, password: &str) -> Result<RetrievalOutcome, SignalingError> {
            self.inner.fetch_offer(name, password).await
        }

        async fn fetch_answer(&self, name: &str) -> Result<Option<String>, SignalingError> {
            let result = self.inner.fetch_answer(name).await;
            if self.fail_fetch_answer {
                return Err(SignalingError::UnexpectedStatus {
                    status: 500,
                    body: "internal error".to_string(),
                });
            }
            result
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offerer_times_out_after_schedule() {
        let signaling = Arc::new(MemorySignaling::new());
        let transport = ScriptedTransport::new("a");
        let negotiator = Negotiator::new(signaling.clone(), transport.clone());

        let start = tokio::time::Instant::now();
        let result = negotiator.connect(&Session::new("S", "p")).await;

        assert!(matches!(result, Err(NegotiationError::Timeout { .. })));
        assert_eq!(negotiator.state(), ConnectionState::Closed);
        assert_eq!(negotiator.role(), Some(Role::Offerer));

        let counts = signaling.counts();
        assert_eq!(counts.fetch_offer, 1);
        assert_eq!(counts.publish_offer, 1);
        assert_eq!(counts.fetch_answer, 134);

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1800) && waited < Duration::from_secs(1801));
    }

    #[tokio::test]
    async fn test_answerer_publishes_once_without_polling() {
        let signaling = Arc::new(MemorySignaling::new());
        signaling.publish_offer("S", "p", "offer-from-a").await.unwrap();

        let transport = ScriptedTransport::new("b");
        let negotiator = Negotiator::new(signaling.clone(), transport.clone());
        let state = negotiator.connect(&Session::new("S", "p")).await.unwrap();

        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(negotiator.role(), Some(Role::Answerer));

        let counts = signaling.counts();
        assert_eq!(counts.fetch_offer, 1);
        assert_eq!(counts.publish_answer, 1);
        assert_eq!(counts.fetch_answer, 0);
        assert_eq!(transport.offers_created.load(Ordering::SeqCst), 0);
        assert_eq!(
            signaling.fetch_answer("S").await.unwrap(),
            Some("answer-from-b".to_string())
        );
    }

    #[tokio::test]
    async fn test_wrong_password_closes_without_exchange() {
        let signaling = Arc::new(MemorySignaling::new());
        signaling.publish_offer("S", "p", "offer-from-a").await.unwrap();

        let transport = ScriptedTransport::new("b");
        let negotiator = Negotiator::new(signaling.clone(), transport.clone());
        let result = negotiator.connect(&Session::new("S", "wrong")).await;

        assert!(matches!(result, Err(NegotiationError::Authorization)));
        assert_eq!(negotiator.state(), ConnectionState::Closed);
        assert_eq!(transport.offers_created.load(Ordering::SeqCst), 0);
        assert_eq!(transport.remotes_accepted.load(Ordering::SeqCst), 0);
        assert_eq!(signaling.counts().publish_answer, 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_retried() {
        let signaling = Arc::new(FaultySignaling {
            inner: MemorySignaling::new(),
            fail_publish: true,
            fail_fetch_answer: false,
        });
        let negotiator = Negotiator::new(signaling.clone(), ScriptedTransport::new("a"));
        let result = negotiator.connect(&Session::new("S", "p")).await;

        assert!(matches!(result, Err(NegotiationError::Signaling(SignalingError::NoResponse(_)))));
        assert_eq!(negotiator.state(), ConnectionState::Failed);
        assert_eq!(signaling.inner.counts().publish_offer, 1);
        assert_eq!(signaling.inner.counts().fetch_answer, 0);
    }

    #[tokio::test]
    async fn test_poll_error_is_hard_failure() {
        let signaling = Arc::new(FaultySignaling {
            inner: MemorySignaling::new(),
            fail_publish: false,
            fail_fetch_answer: true,
        });
        let negotiator = Negotiator::new(signaling.clone(), ScriptedTransport::new("a"));
        let result = negotiator.connect(&Session::new("S", "p")).await;

        assert!(matches!(
            result,
            Err(NegotiationError::Signaling(SignalingError::UnexpectedStatus { status: 500, .. }))
        ));
        assert_eq!(negotiator.state(), ConnectionState::Failed);
        assert_eq!(signaling.inner.counts().fetch_answer, 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_stuck_gathering() {
        let signaling = Arc::new(MemorySignaling::new());
        let negotiator = Arc::new(Negotiator::new(signaling.clone(), ScriptedTransport::never_gathers("a")));
        let shutdown = negotiator.shutdown_signal();

        let task = {
            let negotiator = negotiator.clone();
            tokio::spawn(async move { negotiator.connect(&Session::new("S", "p")).await })
        };

        let mut states = negotiator.subscribe();
        states
            .wait_for(|s| *s == ConnectionState::GatheringLocalDescription)
            .await
            .unwrap();
        shutdown.trigger();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(NegotiationError::Cancelled)));
        assert_eq!(negotiator.state(), ConnectionState::Closed);
        assert_eq!(signaling.counts().publish_offer, 0);
    }

    #[tokio::test]
    async fn test_connect_runs_once() {
        let signaling = Arc::new(MemorySignaling::new());
        signaling.publish_offer("S", "p", "offer").await.unwrap();
        let negotiator = Negotiator::new(signaling, ScriptedTransport::new("b"));

        negotiator.connect(&Session::new("S", "p")).await.unwrap();
        let again = negotiator.connect(&Session::new("S", "p")).await;
        assert!(matches!(
            again,
            Err(NegotiationError::AlreadyStarted(ConnectionState::Connected))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_peers_meet() {
        let signaling = Arc::new(MemorySignaling::new());
        let session = Session::new("S", "p");

        let peer_a = Arc::new(Negotiator::new(signaling.clone(), ScriptedTransport::new("a")));
        let task_a = {
            let peer_a = peer_a.clone();
            let session = session.clone();
            tokio::spawn(async move { peer_a.connect(&session).await })
        };

        peer_a
            .subscribe()
            .wait_for(|s| *s == ConnectionState::AwaitingRemoteDescription)
            .await
            .unwrap();

        let peer_b = Negotiator::new(signaling.clone(), ScriptedTransport::new("b"));
        assert_eq!(peer_b.connect(&session).await.unwrap(), ConnectionState::Connected);

        let state_a = task_a.await.unwrap().unwrap();
        assert_eq!(state_a, ConnectionState::Connected);
        assert_eq!(peer_a.role(), Some(Role::Offerer));
        assert_eq!(peer_b.role(), Some(Role::Answerer));

        let counts = signaling.counts();
        assert_eq!(counts.publish_offer, 1);
        assert_eq!(counts.publish_answer, 1);
        assert!(counts.fetch_answer >= 1);
    }
}
