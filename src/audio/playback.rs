//! Speaker playback from the inbound sample queue
//!
//! Pulls mono 48 kHz samples, converts to the device rate and writes the same
//! value to every channel. An empty queue plays silence.

use cpal::traits::DeviceTrait;
use crossbeam_channel::Sender;

use crate::audio::device::{BoundDevice, PcmFormat};
use crate::audio::queue::SampleConsumer;
use crate::audio::resample::LinearResampler;
use crate::audio::stream::Handoff;
use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;

pub(crate) struct PlaybackCallback {
    consumer: Handoff<SampleConsumer>,
    resampler: LinearResampler,
    channels: usize,
    swap_bytes: bool,
}

impl PlaybackCallback {
    pub(crate) fn new(consumer: Handoff<SampleConsumer>, device_rate: u32, channels: u16, format: PcmFormat) -> Self {
        Self {
            consumer,
            resampler: LinearResampler::new(SAMPLE_RATE, device_rate),
            channels: channels.max(1) as usize,
            swap_bytes: format == PcmFormat::S16Foreign,
        }
    }

    #[inline]
    pub(crate) fn process(&mut self, data: &mut [i16]) {
        let Some(consumer) = self.consumer.get_mut() else {
            data.fill(0);
            return;
        };
        for frame in data.chunks_mut(self.channels) {
            let sample = self.resampler.pull(|| consumer.pop_or_silence());
            let sample = if self.swap_bytes { sample.swap_bytes() } else { sample };
            frame.fill(sample);
        }
    }
}

/// Build the output stream for a bound playback device
pub(crate) fn build_playback_stream(
    bound: &BoundDevice,
    consumer: Handoff<SampleConsumer>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let config = cpal::StreamConfig {
        channels: bound.format.channels,
        sample_rate: cpal::SampleRate(bound.format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let mut callback = PlaybackCallback::new(
        consumer,
        bound.format.sample_rate,
        bound.format.channels,
        bound.format.format,
    );

    bound
        .handle
        .build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| callback.process(data),
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
    fn test_underflow_plays_silence() {
        let (mut producer, consumer) = SampleQueue::with_capacity(16);
        let (home, _returned) = bounded(1);
        let mut callback = PlaybackCallback::new(Handoff::new(consumer, home), 48_000, 1, PcmFormat::S16Native);

        producer.push_slice(&[5, 6]);
        let mut out = [9i16; 4];
        callback.process(&mut out);
        assert_eq!(out, [5, 6, 0, 0]);
    }

    #[test]
    fn test_sample_written_to_all_channels() {
        let (mut producer, consumer) = SampleQueue::with_capacity(16);
        let (home, _returned) = bounded(1);
        let mut callback = PlaybackCallback::new(Handoff::new(consumer, home), 48_000, 2, PcmFormat::S16Native);

        producer.push_slice(&[7, -7]);
        let mut out = [0i16; 4];
        callback.process(&mut out);
        assert_eq!(out, [7, 7, -7, -7]);
    }

    #[test]
    fn test_foreign_order_swaps_bytes() {
        let (mut producer, consumer) = SampleQueue::with_capacity(16);
        let (home, _returned) = bounded(1);
        let mut callback = PlaybackCallback::new(Handoff::new(consumer, home), 48_000, 1, PcmFormat::S16Foreign);

        producer.push(0x0102);
        let mut out = [0i16; 1];
        callback.process(&mut out);
        assert_eq!(out, [0x0201]);
    }
}
