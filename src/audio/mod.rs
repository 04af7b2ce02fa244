//! Audio subsystem module

pub(crate) mod capture;
pub mod device;
pub mod pipeline;
pub(crate) mod playback;
pub mod queue;
pub mod resample;
pub(crate) mod stream;

pub use device::{AudioHost, Device, DeviceRole, DeviceSelector, PcmFormat};
pub use pipeline::{AudioPipeline, PipelineEndpoints};
pub use queue::{QueueMetrics, SampleConsumer, SampleProducer, SampleQueue};
