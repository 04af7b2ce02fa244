//! # Comms Link
//!
//! Two-party audio calls between machines that cannot reach each other
//! directly. Peers meet on a small HTTP signaling service under a shared
//! session name and password, swap SDP offer and answer, and then stream
//! Opus audio over a NAT-traversed WebRTC connection.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── PEER A ─────────────────────────────────┐
//! │                                                                         │
//! │  ┌────────────┐  fetch/publish  ┌──────────────────────┐                │
//! │  │ Negotiator │ ◄─────────────► │ SignalingService     │ ◄── HTTPS ──┐  │
//! │  │ (offer or  │                 │ (signaling::http)    │             │  │
//! │  │  answer)   │                 └──────────────────────┘             │  │
//! │  └─────┬──────┘                                                      │  │
//! │        │ create/accept SDP, wait for gathering + Connected           │  │
//! │        ▼                                                             │  │
//! │  ┌──────────────────────────────────────────────┐                    │  │
//! │  │ WebRtcTransport (transport::webrtc)          │                    │  │
//! │  │   20 ms pump: capture queue ─► Opus ─► RTP   │ ◄══ SRTP/ICE ══╗   │  │
//! │  │   on_track:   RTP ─► Opus ─► playback queue  │                ║   │  │
//! │  └───────▲──────────────────────────┬───────────┘                ║   │  │
//! │          │ SampleConsumer           │ SampleProducer             ║   │  │
//! │   ┌──────┴──────┐            ┌──────▼──────┐                     ║   │  │
//! │   │capture queue│            │playback queue│  (SPSC, 262144)    ║   │  │
//! │   └──────▲──────┘            └──────┬──────┘                     ║   │  │
//! │          │ SampleProducer           │ SampleConsumer             ║   │  │
//! │  ┌───────┴──────────────────────────▼───────────┐                ║   │  │
//! │  │ AudioPipeline (audio::pipeline)              │                ║   │  │
//! │  │   capture thread ─ cpal input callback       │                ║   │  │
//! │  │   playback thread ─ cpal output callback     │                ║   │  │
//! │  └──────────────────────────────────────────────┘                ║   │  │
//! └──────────────────────────────────────────────────────────────────╫───┼──┘
//!                                                                    ║   │
//!                                   PEER B (same stack) ═════════════╝   │
//!                                   signaling service ───────────────────┘
//! ```

pub mod audio;
pub mod call;
pub mod codec;
pub mod config;
pub mod error;
pub mod negotiation;
pub mod session;
pub mod signaling;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Network sample rate
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Opus target bitrate in bits per second
    pub const OPUS_BITRATE: u32 = 256_000;

    /// RTP payload type Opus is registered under
    pub const OPUS_PAYLOAD_TYPE: u8 = 96;

    pub const FRAME_DURATION_MS: u64 = 20;

    /// Samples in one 20 ms frame at 48 kHz
    pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize) * (FRAME_DURATION_MS as usize) / 1000;

    /// Capacity of each sample queue, about 5.46 s at 48 kHz
    pub const SAMPLE_QUEUE_CAPACITY: usize = 262_144;

    /// Device sample rates in preference order
    pub const SAMPLE_RATE_PRIORITY: [u32; 4] = [48_000, 44_100, 96_000, 24_000];

    pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

    pub const DEFAULT_SIGNALING_URL: &str = "https://australia-southeast1-comms-link.cloudfunctions.net";
}
