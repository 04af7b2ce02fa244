//! Opus encoder wrapper
//!
//! Fixed to the call profile: mono, 48 kHz, 20 ms frames, in-band FEC.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::constants::{FRAME_SAMPLES, OPUS_BITRATE, SAMPLE_RATE};
use crate::error::CodecError;

/// Expected packet loss the in-band FEC is tuned for
const PACKET_LOSS_PERC: i32 = 5;

/// Opus encoder for outbound call audio
pub struct OpusEncoder {
    encoder: Encoder,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(OPUS_BITRATE as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        encoder
            .set_inband_fec(true)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;
        encoder
            .set_packet_loss_perc(PACKET_LOSS_PERC)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;

        Ok(Self {
            encoder,
            // Max Opus packet is 1275 bytes per frame
            encode_buffer: vec![0u8; 4000],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode exactly one frame of [`FRAME_SAMPLES`] mono samples
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        if samples.len() != FRAME_SAMPLES {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusEncoder::new().unwrap();
        assert_eq!(encoder.stats().frames_encoded, 0);
        assert_eq!(encoder.stats().average_frame_size, 0.0);
    }

    #[test]
    fn test_encoding() {
        let mut encoder = OpusEncoder::new().unwrap();
        let samples = vec![0i16; FRAME_SAMPLES];

        let encoded = encoder.encode(&samples).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.len() < FRAME_SAMPLES * 2);
        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn test_rejects_partial_frame() {
        let mut encoder = OpusEncoder::new().unwrap();
        assert!(matches!(
            encoder.encode(&[0i16; 480]),
            Err(CodecError::InvalidFrameSize(480))
        ));
    }
}
