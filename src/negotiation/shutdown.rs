//! Cooperative shutdown flag

use std::sync::Arc;

use tokio::sync::watch;

/// A one-way flag that can be both checked and awaited.
///
/// Clones share the flag. Once triggered it stays triggered.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is set, immediately if it already is
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
