//! Capture and playback streams bound to the two sample queues
//!
//! ```text
//!   microphone ──► capture callback ──► SampleProducer ═╗
//!                                                       ║ capture queue ──► encoder
//!   decoder ──► playback queue ═╗                       ║
//!                               ╚► SampleConsumer ──► playback callback ──► speakers
//! ```
//!
//! The pipeline owns the callback-side endpoint of each queue. While a stream
//! runs the endpoint lives inside its callback; while stopped it is parked
//! here, so switching devices never leaves two producers or two consumers on
//! one queue.

use std::sync::Arc;

use crate::audio::capture::build_capture_stream;
use crate::audio::device::{AudioHost, BoundDevice, Device, DeviceRole, DeviceSelector};
use crate::audio::playback::build_playback_stream;
use crate::audio::queue::{SampleConsumer, SampleProducer};
use crate::audio::stream::{PlayStream, RunningStream, StreamBuilder, StreamTarget};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Device binding and stream for one role
struct StreamSlot<T: Send, B = BoundDevice, S = cpal::Stream> {
    role: DeviceRole,
    build: StreamBuilder<B, T, S>,
    bound: Option<B>,
    parked: Option<T>,
    stream: Option<RunningStream<T>>,
}

impl<T, B, S> StreamSlot<T, B, S>
where
    T: Send + 'static,
    B: StreamTarget,
    S: PlayStream + 'static,
{
    fn new(role: DeviceRole, build: StreamBuilder<B, T, S>) -> Self {
        Self {
            role,
            build,
            bound: None,
            parked: None,
            stream: None,
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    fn device(&self) -> Option<&Device> {
        self.bound.as_ref().map(|b| b.device())
    }

    /// Bind the device `name` resolves to through `select`.
    ///
    /// Naming the bound device, or resolving to it, keeps the current stream.
    fn select<F>(&mut self, name: &str, select: F) -> Result<Device, AudioError>
    where
        F: FnOnce(&str) -> Result<B, AudioError>,
    {
        if let Some(current) = self.device() {
            if !name.is_empty() && current.name == name {
                return Ok(current.clone());
            }
        }

        let bound = select(name)?;
        let device = bound.device().clone();
        if self.device().map_or(false, |d| d.id == device.id) {
            return Ok(device);
        }

        self.rebind(bound)?;
        tracing::info!("{} device set to \"{}\"", self.role, device.name);
        Ok(device)
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let bound = self.bound.as_ref().ok_or(AudioError::NotStarted)?;
        let endpoint = self
            .parked
            .take()
            .ok_or(AudioError::EndpointLost(self.role.as_str()))?;

        match RunningStream::spawn(bound, endpoint, self.build) {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(failure) => {
                self.parked = failure.endpoint;
                Err(failure.error)
            }
        }
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        for error in stream.drain_errors() {
            tracing::warn!("{} stream on \"{}\": {}", self.role, stream.device().name, error);
        }
        self.parked = Some(stream.stop()?);
        Ok(())
    }

    /// Swap the bound device, restarting the stream if it was running
    fn rebind(&mut self, bound: B) -> Result<(), AudioError> {
        let was_running = self.is_running();
        self.stop()?;
        self.bound = Some(bound);
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    fn drain_errors(&self) -> Vec<AudioError> {
        self.stream
            .as_ref()
            .map(|s| s.drain_errors())
            .unwrap_or_default()
    }
}

/// Start capture, then playback. A playback failure stops capture again, so
/// either both streams run or both endpoints are parked.
fn start_pair<BC, SC, BP, SP>(
    capture: &mut StreamSlot<SampleProducer, BC, SC>,
    playback: &mut StreamSlot<SampleConsumer, BP, SP>,
) -> Result<(), AudioError>
where
    BC: StreamTarget,
    SC: PlayStream + 'static,
    BP: StreamTarget,
    SP: PlayStream + 'static,
{
    capture.start()?;
    if let Err(e) = playback.start() {
        capture.stop()?;
        return Err(e);
    }
    Ok(())
}

fn take_pair<BC, SC, BP, SP>(
    capture: &mut StreamSlot<SampleProducer, BC, SC>,
    playback: &mut StreamSlot<SampleConsumer, BP, SP>,
) -> Option<PipelineEndpoints> {
    if capture.stream.is_some() || playback.stream.is_some() {
        return None;
    }
    match (capture.parked.take(), playback.parked.take()) {
        (Some(capture), Some(playback)) => Some(PipelineEndpoints { capture, playback }),
        (taken_capture, taken_playback) => {
            capture.parked = taken_capture;
            playback.parked = taken_playback;
            None
        }
    }
}

/// Callback-side endpoints of the two queues
pub struct PipelineEndpoints {
    /// Written by the microphone callback
    pub capture: SampleProducer,
    /// Read by the speaker callback
    pub playback: SampleConsumer,
}

pub struct AudioPipeline {
    host: Arc<AudioHost>,
    capture: StreamSlot<SampleProducer>,
    playback: StreamSlot<SampleConsumer>,
}

impl AudioPipeline {
    pub fn new(host: Arc<AudioHost>) -> Self {
        Self {
            host,
            capture: StreamSlot::new(DeviceRole::Input, build_capture_stream),
            playback: StreamSlot::new(DeviceRole::Output, build_playback_stream),
        }
    }

    /// Bind the devices named in `config`, empty names meaning system default
    pub fn bind(&mut self, config: &AudioConfig) -> Result<(), AudioError> {
        self.set_device(DeviceRole::Input, &config.input_device)?;
        self.set_device(DeviceRole::Output, &config.output_device)?;
        Ok(())
    }

    pub fn host(&self) -> &AudioHost {
        &self.host
    }

    pub fn is_running(&self) -> bool {
        self.capture.is_running() || self.playback.is_running()
    }

    pub fn device(&self, role: DeviceRole) -> Option<&Device> {
        match role {
            DeviceRole::Input => self.capture.device(),
            DeviceRole::Output => self.playback.device(),
        }
    }

    /// The bound device first, then the other usable devices for `role`
    pub fn alternatives(&self, role: DeviceRole) -> Result<Vec<Device>, AudioError> {
        let selector = DeviceSelector::new(&self.host);
        match self.device(role) {
            Some(bound) => selector.alternatives(bound),
            None => selector.list_devices(role),
        }
    }

    /// Select a device for `role`.
    ///
    /// Naming the currently bound device is a no-op. While running, the old
    /// stream is fully stopped before the new one is opened.
    pub fn set_device(&mut self, role: DeviceRole, name: &str) -> Result<Device, AudioError> {
        let selector = DeviceSelector::new(&self.host);
        let select = |name: &str| selector.select_device(role, name);
        match role {
            DeviceRole::Input => self.capture.select(name, select),
            DeviceRole::Output => self.playback.select(name, select),
        }
    }

    /// Open both streams on the given queue endpoints.
    ///
    /// Unbound roles fall back to the system default device. On failure the
    /// endpoints stay with the pipeline for [`take_endpoints`](Self::take_endpoints).
    pub fn start(&mut self, endpoints: PipelineEndpoints) -> Result<(), AudioError> {
        if self.is_running() {
            return Err(AudioError::StreamError("pipeline already running".into()));
        }
        self.capture.parked = Some(endpoints.capture);
        self.playback.parked = Some(endpoints.playback);

        if self.capture.bound.is_none() {
            self.set_device(DeviceRole::Input, "")?;
        }
        if self.playback.bound.is_none() {
            self.set_device(DeviceRole::Output, "")?;
        }

        start_pair(&mut self.capture, &mut self.playback)?;
        tracing::info!("Audio pipeline started");
        Ok(())
    }

    /// Stop both streams. No callback runs after this returns.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        let capture = self.capture.stop();
        let playback = self.playback.stop();
        if self.capture.parked.is_some() || self.playback.parked.is_some() {
            tracing::info!("Audio pipeline stopped");
        }
        capture.and(playback)
    }

    /// Take the queue endpoints back after [`stop`](Self::stop)
    pub fn take_endpoints(&mut self) -> Option<PipelineEndpoints> {
        take_pair(&mut self.capture, &mut self.playback)
    }

    /// Backend errors reported by the running streams since the last call
    pub fn drain_errors(&self) -> Vec<AudioError> {
        let mut errors = self.capture.drain_errors();
        errors.extend(self.playback.drain_errors());
        errors
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Audio pipeline shutdown: {}", e);
        }
    }
}
