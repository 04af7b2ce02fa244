//! Microphone capture into the outbound sample queue
//!
//! The data callback downmixes each device frame to mono, converts to the
//! 48 kHz network rate and pushes into the capture queue. A full queue drops
//! samples. Nothing here blocks or allocates.

use cpal::traits::DeviceTrait;
use crossbeam_channel::Sender;

use crate::audio::device::{BoundDevice, PcmFormat};
use crate::audio::queue::SampleProducer;
use crate::audio::resample::LinearResampler;
use crate::audio::stream::Handoff;
use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;

/// Per-stream state owned by the capture callback
pub(crate) struct CaptureCallback {
    producer: Handoff<SampleProducer>,
    resampler: LinearResampler,
    channels: usize,
    swap_bytes: bool,
}

impl CaptureCallback {
    pub(crate) fn new(producer: Handoff<SampleProducer>, device_rate: u32, channels: u16, format: PcmFormat) -> Self {
        Self {
            producer,
            resampler: LinearResampler::new(device_rate, SAMPLE_RATE),
            channels: channels.max(1) as usize,
            swap_bytes: format == PcmFormat::S16Foreign,
        }
    }

    #[inline]
    pub(crate) fn process(&mut self, data: &[i16]) {
        let Some(producer) = self.producer.get_mut() else {
            return;
        };
        let swap = self.swap_bytes;
        for frame in data.chunks(self.channels) {
            let sum: i32 = frame
                .iter()
                .map(|&s| {
                    let s = if swap { s.swap_bytes() } else { s };
                    s as i32
                })
                .sum();
            let mono = (sum / frame.len() as i32) as i16;
            self.resampler.push(mono, |s| {
                producer.push(s);
            });
        }
    }
}

/// Build the input stream for a bound capture device
pub(crate) fn build_capture_stream(
    bound: &BoundDevice,
    producer: Handoff<SampleProducer>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let config = cpal::StreamConfig {
        channels: bound.format.channels,
        sample_rate: cpal::SampleRate(bound.format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let mut callback = CaptureCallback::new(
        producer,
        bound.format.sample_rate,
        bound.format.channels,
        bound.format.format,
    );

    bound
        .handle
        .build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| callback.process(data),
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::SampleQueue;
    use crossbeam_channel::bounded;

    #[test]
    fn test_mono_passthrough() {
        let (producer, mut consumer) = SampleQueue::with_capacity(16);
        let (home, _returned) = bounded(1);
        let mut callback = CaptureCallback::new(Handoff::new(producer, home), 48_000, 1, PcmFormat::S16Native);

        callback.process(&[1, -2, 3]);
        let mut out = [0i16; 3];
        assert_eq!(consumer.pop_slice(&mut out), 3);
        assert_eq!(out, [1, -2, 3]);
    }

    #[test]
    fn test_stereo_is_averaged() {
        let (producer, mut consumer) = SampleQueue::with_capacity(16);
        let (home, _returned) = bounded(1);
        let mut callback = CaptureCallback::new(Handoff::new(producer, home), 48_000, 2, PcmFormat::S16Native);

        callback.process(&[100, 300, -50, -150]);
        assert_eq!(consumer.pop(), Some(200));
        assert_eq!(consumer.pop(), Some(-100));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_full_queue_drops() {
        let (producer, consumer) = SampleQueue::with_capacity(2);
        let (home, _returned) = bounded(1);
        let mut callback = CaptureCallback::new(Handoff::new(producer, home), 48_000, 1, PcmFormat::S16Native);

        callback.process(&[1, 2, 3, 4, 5]);
        assert_eq!(consumer.len(), 2);
        assert_eq!(consumer.metrics().dropped, 3);
    }

    #[test]
    fn test_producer_returns_when_callback_dropped() {
        let (producer, _consumer) = SampleQueue::with_capacity(4);
        let (home, returned) = bounded(1);
        let callback = CaptureCallback::new(Handoff::new(producer, home), 44_100, 1, PcmFormat::S16Native);

        drop(callback);
        assert_eq!(returned.try_recv().unwrap().capacity(), 4);
    }
}
