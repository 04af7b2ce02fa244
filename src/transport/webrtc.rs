//! WebRTC peer transport on webrtc-rs
//!
//! One peer connection carrying one send-recv Opus track. Outbound audio is
//! drained from the capture queue in 20 ms frames on a tokio interval;
//! inbound RTP is decoded straight into the playback queue, with Opus
//! concealment filling in for packets that never arrived.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::audio::queue::{SampleConsumer, SampleProducer};
use crate::codec::{OpusDecoder, OpusEncoder};
use crate::config::IceConfig;
use crate::constants::{FRAME_DURATION_MS, FRAME_SAMPLES, OPUS_BITRATE, OPUS_PAYLOAD_TYPE, SAMPLE_RATE};
use crate::error::TransportError;
use crate::session::{SdpType, SessionDescription};

use super::{PeerTransport, TransportState};

const FRAME_DURATION: Duration = Duration::from_millis(FRAME_DURATION_MS);

/// Longest gap concealed, 100 ms; anything longer is left as silence
const MAX_CONCEALED_FRAMES: u16 = 5;

/// Network-side endpoints of the two sample queues
pub struct MediaEndpoints {
    /// Read by the encoder
    pub capture: SampleConsumer,
    /// Written by the decoder
    pub playback: SampleProducer,
}

/// Media counters (atomic, lock-free)
#[derive(Debug, Default)]
pub struct MediaStats {
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub encode_errors: AtomicU64,
    pub decode_errors: AtomicU64,
    /// Frames synthesized for lost packets
    pub frames_concealed: AtomicU64,
    /// Packets that arrived after a later one and were dropped
    pub late_packets: AtomicU64,
}

/// Follows RTP sequence numbers to find lost packets
#[derive(Debug, Default)]
struct SequenceTracker {
    last: Option<u16>,
}

impl SequenceTracker {
    /// Packets missing right before `seq`, or `None` for a duplicate or late
    /// packet that should be dropped
    fn observe(&mut self, seq: u16) -> Option<u16> {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return Some(0);
        };
        let step = seq.wrapping_sub(last);
        if step == 0 || step >= 0x8000 {
            return None;
        }
        self.last = Some(seq);
        Some(step - 1)
    }
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: SAMPLE_RATE,
        // RTP Opus is always signalled as two channels
        channels: 2,
        sdp_fmtp_line: format!("minptime=10;useinbandfec=1;maxaveragebitrate={}", OPUS_BITRATE),
        rtcp_feedback: vec![],
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        _ => None,
    }
}

pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    gathered: watch::Receiver<bool>,
    state_tx: Arc<watch::Sender<TransportState>>,
    state_rx: watch::Receiver<TransportState>,
    sender: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<MediaStats>,
}

impl WebRtcTransport {
    /// Build the peer connection and wire the media endpoints to its track
    pub async fn new(ice: &IceConfig, media: MediaEndpoints) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| TransportError::Setup(format!("Failed to register Opus codec: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::Setup(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| TransportError::Setup(format!("Failed to create peer connection: {}", e)))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_owned(),
            "comms-link".to_owned(),
        ));
        let rtp_sender = peer_connection
            .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::Setup(format!("Failed to add track: {}", e)))?;

        // RTCP has to be read for the interceptors to run
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let (gathered_tx, gathered) = watch::channel(false);
        peer_connection.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            if state == RTCIceGathererState::Complete {
                tracing::debug!("ICE gathering complete");
                gathered_tx.send_replace(true);
            }
            Box::pin(async {})
        }));

        let (state_tx, state_rx) = watch::channel(TransportState::New);
        let state_tx = Arc::new(state_tx);
        let state_for_handler = state_tx.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            if let Some(state) = map_state(s) {
                tracing::info!("Peer connection state: {}", s);
                state_for_handler.send_replace(state);
            }
            Box::pin(async {})
        }));

        let stats = Arc::new(MediaStats::default());

        // Only the first remote audio track is played
        let playback = Arc::new(Mutex::new(Some(media.playback)));
        let stats_for_track = stats.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                if !track.codec().capability.mime_type.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
                    return Box::pin(async {});
                }
                let Some(producer) = playback.lock().take() else {
                    tracing::warn!("Ignoring additional remote track {}", track.id());
                    return Box::pin(async {});
                };
                let stats = stats_for_track.clone();
                Box::pin(async move {
                    tokio::spawn(run_receiver(track, producer, stats));
                })
            },
        ));

        let sender = tokio::spawn(run_sender(track, media.capture, state_rx.clone(), stats.clone()));

        Ok(Self {
            peer_connection,
            gathered,
            state_tx,
            state_rx,
            sender: Mutex::new(Some(sender)),
            stats,
        })
    }

    pub fn stats(&self) -> &MediaStats {
        &self.stats
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<(), TransportError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Description(format!("Failed to create offer: {}", e)))?;
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| TransportError::Description(format!("Failed to set local description: {}", e)))
    }

    async fn accept_remote(&self, description: &SessionDescription) -> Result<(), TransportError> {
        let remote = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp.clone()),
        }
        .map_err(|e| TransportError::Description(format!("Invalid {} SDP: {}", description.sdp_type, e)))?;

        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| TransportError::Description(format!("Failed to set remote description: {}", e)))?;

        if description.sdp_type == SdpType::Offer {
            let answer = self
                .peer_connection
                .create_answer(None)
                .await
                .map_err(|e| TransportError::Description(format!("Failed to create answer: {}", e)))?;
            self.peer_connection
                .set_local_description(answer)
                .await
                .map_err(|e| TransportError::Description(format!("Failed to set local description: {}", e)))?;
        }
        Ok(())
    }

    async fn local_description(&self) -> Result<SessionDescription, TransportError> {
        let mut gathered = self.gathered.clone();
        gathered
            .wait_for(|done| *done)
            .await
            .map_err(|_| TransportError::Closed)?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| TransportError::Description("no local description".into()))?;

        let sdp_type = match local.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            other => {
                return Err(TransportError::Description(format!(
                    "unexpected local description type {}",
                    other
                )))
            }
        };
        Ok(SessionDescription { sdp_type, sdp: local.sdp })
    }

    fn state(&self) -> watch::Receiver<TransportState> {
        self.state_rx.clone()
    }

    async fn close(&self) -> Result<(), TransportError> {
        let result = self
            .peer_connection
            .close()
            .await
            .map_err(|e| TransportError::Setup(format!("Failed to close peer connection: {}", e)));
        self.state_tx.send_replace(TransportState::Closed);

        let sender = self.sender.lock().take();
        if let Some(sender) = sender {
            let _ = sender.await;
        }
        result
    }
}

/// Encode queued capture audio once connected, until the connection ends
async fn run_sender(
    track: Arc<TrackLocalStaticSample>,
    mut capture: SampleConsumer,
    mut state: watch::Receiver<TransportState>,
    stats: Arc<MediaStats>,
) {
    let connected = state
        .wait_for(|s| matches!(s, TransportState::Connected | TransportState::Failed | TransportState::Closed))
        .await
        .map(|s| *s == TransportState::Connected)
        .unwrap_or(false);
    if !connected {
        return;
    }

    let mut encoder = match OpusEncoder::new() {
        Ok(encoder) => encoder,
        Err(e) => {
            tracing::error!("Outbound audio disabled: {}", e);
            return;
        }
    };

    let mut frame = vec![0i16; FRAME_SAMPLES];
    let mut interval = tokio::time::interval(FRAME_DURATION);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = state.changed() => {
                let ended = changed.is_err()
                    || matches!(*state.borrow(), TransportState::Failed | TransportState::Closed);
                if ended {
                    break;
                }
                continue;
            }
        }

        // Whole frames only; a partial frame waits for the next tick
        while capture.len() >= FRAME_SAMPLES {
            capture.pop_slice(&mut frame);
            let data = match encoder.encode(&frame) {
                Ok(data) => data,
                Err(e) => {
                    stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Encode failed: {}", e);
                    continue;
                }
            };
            let len = data.len() as u64;
            let sample = Sample {
                data,
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                tracing::debug!("write_sample failed: {}", e);
                continue;
            }
            stats.packets_sent.fetch_add(1, Ordering::Relaxed);
            stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
        }
    }

    let encoded = encoder.stats();
    tracing::debug!(
        frames = encoded.frames_encoded,
        average_bytes = encoded.average_frame_size,
        "Outbound audio stopped"
    );
}

/// Decode inbound RTP into the playback queue until the track ends
async fn run_receiver(track: Arc<TrackRemote>, mut playback: SampleProducer, stats: Arc<MediaStats>) {
    let mut decoder = match OpusDecoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            tracing::error!("Inbound audio disabled: {}", e);
            return;
        }
    };
    tracing::info!("Receiving remote audio track {}", track.id());

    let mut sequence = SequenceTracker::default();
    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _attributes)) => packet,
            Err(e) => {
                tracing::debug!("Remote track ended: {}", e);
                break;
            }
        };
        let Some(missing) = sequence.observe(packet.header.sequence_number) else {
            stats.late_packets.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        for _ in 0..missing.min(MAX_CONCEALED_FRAMES) {
            match decoder.decode_plc() {
                Ok(samples) => {
                    playback.push_slice(samples);
                    stats.frames_concealed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::debug!("Concealment failed: {}", e);
                    break;
                }
            }
        }
        if packet.payload.is_empty() {
            continue;
        }

        stats.packets_received.fetch_add(1, Ordering::Relaxed);
        stats
            .bytes_received
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);

        match decoder.decode(&packet.payload) {
            Ok(samples) => {
                playback.push_slice(samples);
            }
            Err(e) => {
                stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Decode failed: {}", e);
            }
        }
    }

    let decoded = decoder.stats();
    tracing::debug!(
        frames = decoded.frames_decoded,
        concealed = decoded.frames_lost,
        loss_rate = decoded.loss_rate,
        "Inbound audio stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_capability() {
        let capability = opus_capability();
        assert_eq!(capability.clock_rate, 48_000);
        assert_eq!(
            capability.sdp_fmtp_line,
            "minptime=10;useinbandfec=1;maxaveragebitrate=256000"
        );
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_state(RTCPeerConnectionState::Connected),
            Some(TransportState::Connected)
        );
        assert_eq!(map_state(RTCPeerConnectionState::Failed), Some(TransportState::Failed));
        assert_eq!(map_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_sequence_gaps() {
        let mut sequence = SequenceTracker::default();
        assert_eq!(sequence.observe(100), Some(0));
        assert_eq!(sequence.observe(101), Some(0));
        assert_eq!(sequence.observe(104), Some(2));
        // Duplicate and late packets are dropped
        assert_eq!(sequence.observe(104), None);
        assert_eq!(sequence.observe(102), None);
        assert_eq!(sequence.observe(105), Some(0));
    }

    #[test]
    fn test_sequence_wraps() {
        let mut sequence = SequenceTracker::default();
        assert_eq!(sequence.observe(u16::MAX - 1), Some(0));
        assert_eq!(sequence.observe(u16::MAX), Some(0));
        assert_eq!(sequence.observe(1), Some(1));
        assert_eq!(sequence.observe(u16::MAX), None);
    }
}
