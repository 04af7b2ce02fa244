//! One two-party audio call
//!
//! Owns both sample queues for their whole lifetime. The network ends go to
//! the transport at construction; the device ends go to the audio pipeline
//! once negotiation reports the peer connection as live.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;

use crate::audio::{AudioHost, AudioPipeline, Device, DeviceRole, PipelineEndpoints, SampleQueue};
use crate::audio::queue::QueueStats;
use crate::config::AppConfig;
use crate::error::Result;
use crate::negotiation::{AnswerPollSchedule, Negotiator, ShutdownSignal};
use crate::session::{ConnectionState, Role, Session};
use crate::signaling::SignalingService;
use crate::transport::{MediaEndpoints, PeerTransport, TransportState, WebRtcTransport};

/// Snapshot of the call's audio counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallMetrics {
    /// Captured samples dropped because the network side fell behind
    pub capture_dropped: u64,
    /// Received samples dropped because playback fell behind
    pub playback_dropped: u64,
    /// Silence substituted because nothing had arrived yet
    pub playback_silenced: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Inbound frames synthesized for lost packets
    pub frames_concealed: u64,
}

pub struct Call {
    negotiator: Negotiator<Arc<dyn SignalingService>, Arc<WebRtcTransport>>,
    pipeline: AudioPipeline,
    endpoints: Option<PipelineEndpoints>,
    capture_stats: Arc<QueueStats>,
    playback_stats: Arc<QueueStats>,
}

impl Call {
    /// Bind devices, build the transport and prepare negotiation.
    ///
    /// Device problems fail here, before anything is published.
    pub async fn new(
        config: &AppConfig,
        host: Arc<AudioHost>,
        signaling: Arc<dyn SignalingService>,
    ) -> Result<Self> {
        let mut pipeline = AudioPipeline::new(host);
        pipeline.bind(&config.audio)?;

        let (capture_producer, capture_consumer) = SampleQueue::new();
        let (playback_producer, playback_consumer) = SampleQueue::new();
        let capture_stats = capture_producer.stats();
        let playback_stats = playback_consumer.stats();

        let transport = WebRtcTransport::new(
            &config.ice,
            MediaEndpoints {
                capture: capture_consumer,
                playback: playback_producer,
            },
        )
        .await?;

        let negotiator = Negotiator::new(signaling, Arc::new(transport))
            .with_schedule(AnswerPollSchedule::from(&config.polling));

        Ok(Self {
            negotiator,
            pipeline,
            endpoints: Some(PipelineEndpoints {
                capture: capture_producer,
                playback: playback_consumer,
            }),
            capture_stats,
            playback_stats,
        })
    }

    /// Negotiate the connection and start audio once it is live
    pub async fn connect(&mut self, session: &Session) -> Result<ConnectionState> {
        let state = self.negotiator.connect(session).await?;

        if state == ConnectionState::Connected {
            if let Some(endpoints) = self.endpoints.take() {
                self.pipeline.start(endpoints)?;
            }
        }
        Ok(state)
    }

    /// Cancels an in-flight [`connect`](Self::connect) from another task
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.negotiator.shutdown_signal()
    }

    pub fn state(&self) -> ConnectionState {
        self.negotiator.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.negotiator.subscribe()
    }

    pub fn role(&self) -> Option<Role> {
        self.negotiator.role()
    }

    /// Resolves when the peer connection fails or closes
    pub async fn ended(&self) -> TransportState {
        let mut states = self.negotiator.transport().state();
        let ended = match states
            .wait_for(|s| matches!(s, TransportState::Failed | TransportState::Closed))
            .await
        {
            Ok(state) => *state,
            Err(_) => TransportState::Closed,
        };
        ended
    }

    pub fn device(&self, role: DeviceRole) -> Option<&Device> {
        self.pipeline.device(role)
    }

    pub fn alternatives(&self, role: DeviceRole) -> Result<Vec<Device>> {
        Ok(self.pipeline.alternatives(role)?)
    }

    /// Switch a device, live if audio is already running
    pub fn set_device(&mut self, role: DeviceRole, name: &str) -> Result<Device> {
        Ok(self.pipeline.set_device(role, name)?)
    }

    pub fn metrics(&self) -> CallMetrics {
        let media = self.negotiator.transport().stats();
        CallMetrics {
            capture_dropped: self.capture_stats.dropped(),
            playback_dropped: self.playback_stats.dropped(),
            playback_silenced: self.playback_stats.silenced(),
            packets_sent: media.packets_sent.load(Ordering::Relaxed),
            packets_received: media.packets_received.load(Ordering::Relaxed),
            frames_concealed: media.frames_concealed.load(Ordering::Relaxed),
        }
    }

    /// Log backend stream errors reported since the last call
    pub fn report_stream_errors(&self) {
        for error in self.pipeline.drain_errors() {
            tracing::warn!("Audio stream error: {}", error);
        }
    }

    /// Stop audio, then close the peer connection
    pub async fn hangup(&mut self) -> Result<()> {
        let stopped = self.pipeline.stop();
        if self.endpoints.is_none() {
            self.endpoints = self.pipeline.take_endpoints();
        }
        self.negotiator.close().await;

        let metrics = self.metrics();
        tracing::info!(
            dropped = metrics.capture_dropped,
            silenced = metrics.playback_silenced,
            sent = metrics.packets_sent,
            received = metrics.packets_received,
            concealed = metrics.frames_concealed,
            "Call ended"
        );
        stopped?;
        Ok(())
    }
}
