//! Cooperative cancellation of long running phases.
//!
//! Phases poll [`ShutdownRx::check`] between units of work (raw inputs, chunks, partitions),
//! so a cancelled phase never leaves a unit half done.

use tokio::sync::watch;

use crate::bail;
use crate::error::{ErrorKind, LakeResult};

/// Sending side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Requests shutdown. Receivers created before or after the call observe it.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Returns a [`ErrorKind::Cancelled`] error once shutdown was requested.
    pub fn check(&self) -> LakeResult<()> {
        if self.is_shutdown() {
            bail!(ErrorKind::Cancelled, "Shutdown requested");
        }

        Ok(())
    }

    /// Waits until shutdown is requested or the sender is dropped.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

/// Creates a new shutdown channel in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
