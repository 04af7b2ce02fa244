//! Error types for the call stack

use std::time::Duration;
use thiserror::Error;

use crate::session::ConnectionState;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
///
/// All of these surface at selection or stream-construction time, never from
/// inside a running callback.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No default {0} device")]
    NoDefaultDevice(&'static str),

    #[error("Device {0} supports none of the accepted sample formats")]
    UnsupportedFormat(String),

    #[error("Device {0} supports none of the accepted sample rates")]
    UnsupportedSampleRate(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("cpal error: {0}")]
    CpalError(String),

    #[error("Queue endpoint for the {0} stream was not released by the backend")]
    EndpointLost(&'static str),

    #[error("Pipeline not started")]
    NotStarted,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Signaling service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The request never produced a response (DNS, connect, TLS, timeout)
    #[error("No response from signaling service: {0}")]
    NoResponse(String),

    #[error("Signaling service returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Malformed signaling response: {0}")]
    MalformedBody(String),
}

/// Peer transport errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Transport setup failed: {0}")]
    Setup(String),

    #[error("Session description rejected: {0}")]
    Description(String),

    #[error("Transport closed")]
    Closed,
}

/// Failure outcomes of a connection attempt
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("Password rejected by signaling service")]
    Authorization,

    #[error("No answer received after {waited:?} of polling")]
    Timeout { waited: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Negotiation already ran (state {0})")]
    AlreadyStarted(ConnectionState),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
