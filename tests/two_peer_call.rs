//! Two peers negotiating through the HTTP signaling server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use comms_link::config::{PollingConfig, SignalingConfig, SignalingDialect};
use comms_link::error::{NegotiationError, TransportError};
use comms_link::negotiation::{AnswerPollSchedule, Negotiator};
use comms_link::session::{ConnectionState, Role, SdpType, Session, SessionDescription};
use comms_link::signaling::{server, HttpSignalingClient, MemorySignaling, SignalingService};
use comms_link::transport::{PeerTransport, TransportState};

/// Gathers instantly and reports Connected once both descriptions are set
struct LoopbackTransport {
    label: &'static str,
    local: watch::Sender<Option<SessionDescription>>,
    remote: std::sync::Mutex<Option<SessionDescription>>,
    state: watch::Sender<TransportState>,
    closes: AtomicUsize,
}

impl LoopbackTransport {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            local: watch::channel(None).0,
            remote: std::sync::Mutex::new(None),
            state: watch::channel(TransportState::New).0,
            closes: AtomicUsize::new(0),
        })
    }

    fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_offer(&self) -> Result<(), TransportError> {
        self.local
            .send_replace(Some(SessionDescription::offer(format!("v=0 offer {}", self.label))));
        Ok(())
    }

    async fn accept_remote(&self, description: &SessionDescription) -> Result<(), TransportError> {
        *self.remote.lock().unwrap() = Some(description.clone());
        if description.sdp_type == SdpType::Offer {
            self.local
                .send_replace(Some(SessionDescription::answer(format!("v=0 answer {}", self.label))));
        }
        self.state.send_replace(TransportState::Connecting);
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
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(TransportState::Closed);
        Ok(())
    }
}

async fn spawn_server(dialect: SignalingDialect) -> (Arc<MemorySignaling>, SignalingConfig) {
    let store = Arc::new(MemorySignaling::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(store.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = SignalingConfig {
        base_url: format!("http://{}", addr),
        dialect,
        request_timeout_secs: 5,
    };
    (store, config)
}

fn client(config: &SignalingConfig) -> Arc<dyn SignalingService> {
    Arc::new(HttpSignalingClient::new(config).unwrap())
}

async fn run_two_peers(dialect: SignalingDialect) {
    let (store, config) = spawn_server(dialect).await;
    let session = Session::new("S", "p");

    let transport_a = LoopbackTransport::new("a");
    let peer_a = Arc::new(Negotiator::new(client(&config), transport_a.clone()));
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
    assert_eq!(store.counts().publish_offer, 1);

    let transport_b = LoopbackTransport::new("b");
    let peer_b = Negotiator::new(client(&config), transport_b.clone());
    assert_eq!(peer_b.connect(&session).await.unwrap(), ConnectionState::Connected);

    let state_a = tokio::time::timeout(Duration::from_secs(10), task_a)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(state_a, ConnectionState::Connected);

    assert_eq!(peer_a.role(), Some(Role::Offerer));
    assert_eq!(peer_b.role(), Some(Role::Answerer));
    assert_eq!(transport_b.remote(), Some(SessionDescription::offer("v=0 offer a")));
    assert_eq!(transport_a.remote(), Some(SessionDescription::answer("v=0 answer b")));

    let counts = store.counts();
    assert_eq!(counts.fetch_offer, 2);
    assert_eq!(counts.publish_answer, 1);
    assert!(counts.fetch_answer >= 1);
}

#[tokio::test]
async fn test_two_peers_connect_over_http() {
    run_two_peers(SignalingDialect::Connection).await;
}

#[tokio::test]
async fn test_two_peers_connect_with_session_routes() {
    run_two_peers(SignalingDialect::Session).await;
}

#[tokio::test]
async fn test_wrong_password_never_exchanges() {
    let (store, config) = spawn_server(SignalingDialect::Connection).await;
    let signaling = client(&config);
    signaling.publish_offer("S", "p", "v=0 offer a").await.unwrap();

    let transport = LoopbackTransport::new("b");
    let peer = Negotiator::new(signaling, transport.clone());
    let result = peer.connect(&Session::new("S", "nope")).await;

    assert!(matches!(result, Err(NegotiationError::Authorization)));
    assert_eq!(peer.state(), ConnectionState::Closed);
    assert_eq!(transport.remote(), None);
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    assert_eq!(store.counts().publish_answer, 0);
}

#[tokio::test]
async fn test_unanswered_offer_times_out() {
    let (store, config) = spawn_server(SignalingDialect::Connection).await;
    let polling = PollingConfig {
        max_duration_secs: 3,
        ..Default::default()
    };

    let peer = Negotiator::new(client(&config), LoopbackTransport::new("a"))
        .with_schedule(AnswerPollSchedule::from(&polling));
    let result = peer.connect(&Session::new("lonely", "p")).await;

    assert!(matches!(
        result,
        Err(NegotiationError::Timeout { waited }) if waited == Duration::from_secs(3)
    ));
    assert_eq!(peer.state(), ConnectionState::Closed);
    assert_eq!(store.counts().fetch_answer, 3);
}
