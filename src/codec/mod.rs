//! Opus codec wrapper
//!
//! Encodes outbound 20 ms mono frames and decodes inbound packets for the
//! media track.

pub mod decoder;
pub mod encoder;

pub use decoder::{DecoderStats, OpusDecoder};
pub use encoder::{EncoderStats, OpusEncoder};
