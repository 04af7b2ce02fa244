//! Opus decoder wrapper
//!
//! Provides decoding with packet loss concealment.

use opus::{Channels, Decoder};

use crate::constants::{FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::CodecError;

/// Longest Opus frame, 120 ms at 48 kHz mono
const MAX_FRAME_SAMPLES: usize = SAMPLE_RATE as usize * 120 / 1000;

/// Opus decoder for inbound call audio
pub struct OpusDecoder {
    decoder: Decoder,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    /// Length of the last decoded frame, which PLC repeats
    last_frame_samples: usize,
    frames_decoded: u64,
    /// Frames concealed by PLC
    frames_lost: u64,
    samples_produced: u64,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new(SAMPLE_RATE, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            decode_buffer: vec![0i16; MAX_FRAME_SAMPLES],
            last_frame_samples: FRAME_SAMPLES,
            frames_decoded: 0,
            frames_lost: 0,
            samples_produced: 0,
        })
    }

    /// Decode one packet. The returned samples borrow the internal buffer.
    pub fn decode(&mut self, data: &[u8]) -> Result<&[i16], CodecError> {
        let samples = self
            .decoder
            .decode(data, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_decoded += 1;
        self.samples_produced += samples as u64;
        self.last_frame_samples = samples;
        Ok(&self.decode_buffer[..samples])
    }

    /// Generate concealment audio for one lost packet.
    ///
    /// Opus conceals as many samples as the output holds, so the buffer is cut
    /// to the length of the last real frame.
    pub fn decode_plc(&mut self) -> Result<&[i16], CodecError> {
        let frame = self.last_frame_samples;
        let samples = self
            .decoder
            .decode(&[], &mut self.decode_buffer[..frame], false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_lost += 1;
        self.samples_produced += samples as u64;
        Ok(&self.decode_buffer[..samples])
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_lost: self.frames_lost,
            samples_produced: self.samples_produced,
            loss_rate: if self.frames_decoded + self.frames_lost > 0 {
                self.frames_lost as f32 / (self.frames_decoded + self.frames_lost) as f32
            } else {
                0.0
            },
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_lost: u64,
    pub samples_produced: u64,
    pub loss_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpusEncoder;

    #[test]
    fn test_encode_decode_frame_length() {
        let mut encoder = OpusEncoder::new().unwrap();
        let mut decoder = OpusDecoder::new().unwrap();

        let samples: Vec<i16> = (0..FRAME_SAMPLES)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
            })
            .collect();

        let encoded = encoder.encode(&samples).unwrap();
        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), FRAME_SAMPLES);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn test_plc() {
        let mut decoder = OpusDecoder::new().unwrap();
        let encoded = OpusEncoder::new().unwrap().encode(&[0i16; FRAME_SAMPLES]).unwrap();
        decoder.decode(&encoded).unwrap();

        assert_eq!(decoder.decode_plc().unwrap().len(), FRAME_SAMPLES);

        let stats = decoder.stats();
        assert_eq!(stats.frames_lost, 1);
        assert!((stats.loss_rate - 0.5).abs() < f32::EPSILON);
    }
}
