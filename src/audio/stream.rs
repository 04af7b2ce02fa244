//! Dedicated stream threads and queue endpoint handoff
//!
//! Every device stream lives on its own thread, which builds the cpal stream,
//! starts it and then blocks until told to stop. The data callback owns its
//! queue endpoint through a [`Handoff`]; when the backend drops the callback
//! the endpoint travels back over a channel. Stopping a stream therefore
//! returns the endpoint, and a replacement stream can only be built once the
//! old callback is gone.

use std::thread::{self, JoinHandle};

use cpal::traits::StreamTrait;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::audio::device::{BoundDevice, Device, DeviceRole};
use crate::error::AudioError;

/// Owns a queue endpoint inside a callback and sends it home on drop
pub(crate) struct Handoff<T: Send> {
    item: Option<T>,
    home: Sender<T>,
}

impl<T: Send> Handoff<T> {
    pub(crate) fn new(item: T, home: Sender<T>) -> Self {
        Self {
            item: Some(item),
            home,
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self) -> Option<&mut T> {
        self.item.as_mut()
    }
}

impl<T: Send> Drop for Handoff<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            let _ = self.home.send(item);
        }
    }
}

/// Backend stream that runs once played and stops when dropped
pub(crate) trait PlayStream {
    fn play(&self) -> Result<(), AudioError>;
}

impl PlayStream for cpal::Stream {
    fn play(&self) -> Result<(), AudioError> {
        StreamTrait::play(self).map_err(|e| AudioError::StreamError(e.to_string()))
    }
}

/// A device binding that streams are opened on
pub(crate) trait StreamTarget: Clone + Send + 'static {
    fn device(&self) -> &Device;
}

impl StreamTarget for BoundDevice {
    fn device(&self) -> &Device {
        &self.device
    }
}

/// Builds the stream for one role on the stream thread
pub(crate) type StreamBuilder<B, T, S> = fn(&B, Handoff<T>, Sender<AudioError>) -> Result<S, AudioError>;

/// A stream that failed to start, with its endpoint if the backend let go of it
pub(crate) struct StartFailure<T> {
    pub error: AudioError,
    pub endpoint: Option<T>,
}

/// A running device stream
pub(crate) struct RunningStream<T> {
    device: Device,
    role: DeviceRole,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    home: Receiver<T>,
    errors: Receiver<AudioError>,
}

impl<T: Send + 'static> RunningStream<T> {
    /// Spawn the stream thread and wait until the stream plays or fails
    pub(crate) fn spawn<B, S>(
        bound: &B,
        endpoint: T,
        build: StreamBuilder<B, T, S>,
    ) -> Result<Self, StartFailure<T>>
    where
        B: StreamTarget,
        S: PlayStream + 'static,
    {
        let device = bound.device().clone();
        let role = device.role;
        let (home_tx, home) = bounded::<T>(1);
        let (error_tx, errors) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handoff = Handoff::new(endpoint, home_tx);
        let thread_bound = bound.clone();

        let spawned = thread::Builder::new()
            .name(format!("{}-stream", role.as_str()))
            .spawn(move || {
                let stream = match build(&thread_bound, handoff, error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns on stop or when the owner goes away
                let _ = stop_rx.recv();
                drop(stream);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // The closure, and the handoff inside it, is already dropped
                return Err(StartFailure {
                    error: AudioError::StreamError(e.to_string()),
                    endpoint: home.try_recv().ok(),
                });
            }
        };

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("stream thread exited".into())));

        match outcome {
            Ok(()) => {
                tracing::debug!("{} stream running on \"{}\"", role, device.name);
                Ok(Self {
                    device,
                    role,
                    stop_tx: Some(stop_tx),
                    handle: Some(handle),
                    home,
                    errors,
                })
            }
            Err(error) => {
                let _ = handle.join();
                Err(StartFailure {
                    error,
                    endpoint: home.try_recv().ok(),
                })
            }
        }
    }

    pub(crate) fn device(&self) -> &Device {
        &self.device
    }

    /// Backend errors reported since the last call
    pub(crate) fn drain_errors(&self) -> Vec<AudioError> {
        self.errors.try_iter().collect()
    }

    /// Stop the stream and recover the queue endpoint.
    ///
    /// No callback runs after this returns.
    pub(crate) fn stop(mut self) -> Result<T, AudioError> {
        self.shutdown();
        self.home
            .try_recv()
            .map_err(|_| AudioError::EndpointLost(self.role.as_str()))
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} stream thread panicked", self.role);
            }
        }
    }
}

impl<T> Drop for RunningStream<T> {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_returns_item_on_drop() {
        let (tx, rx) = bounded(1);
        let mut handoff = Handoff::new(vec![1, 2, 3], tx);
        handoff.get_mut().unwrap().push(4);
        assert!(rx.try_recv().is_err());

        drop(handoff);
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_handoff_moved_into_closure() {
        let (tx, rx) = bounded(1);
        let handoff = Handoff::new(7u32, tx);
        let mut callback = {
            let mut handoff = handoff;
            move || {
                if let Some(v) = handoff.get_mut() {
                    *v += 1;
                }
            }
        };
        callback();
        callback();
        drop(callback);
        assert_eq!(rx.try_recv().unwrap(), 9);
    }

    #[test]
    fn test_handoff_survives_dropped_home() {
        let (tx, rx) = bounded::<u8>(1);
        drop(rx);
        drop(Handoff::new(1u8, tx));
    }
}
