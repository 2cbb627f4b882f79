//! Edge-triggered connectivity signaling.
//!
//! The platform's reachability integration (an external collaborator)
//! holds a [`ConnectivityHandle`] and reports transitions; the sync
//! manager holds a [`ConnectivityObserver`] and waits for offline→online
//! edges to drain the offline queue. No polling happens in the core.

use crate::error::{SyncError, SyncResult};
use tokio::sync::watch;

/// Creates a connected handle/observer pair with the given initial state.
pub fn channel(initially_online: bool) -> (ConnectivityHandle, ConnectivityObserver) {
    let (tx, rx) = watch::channel(initially_online);
    (
        ConnectivityHandle { tx },
        ConnectivityObserver { rx },
    )
}

/// Write side: owned by whatever integrates with the OS reachability API.
#[derive(Debug)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    /// Reports the current connectivity state. Repeated reports of the
    /// same state do not produce edges.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

/// Read side: waits for connectivity edges.
#[derive(Debug, Clone)]
pub struct ConnectivityObserver {
    rx: watch::Receiver<bool>,
}

impl ConnectivityObserver {
    /// Snapshot of the current state.
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the next transition to online.
    ///
    /// Edge-triggered: if already online, this waits for a future
    /// offline→online edge rather than returning immediately, so one
    /// reconnect produces one drain. Errors when the handle is dropped.
    pub async fn wait_for_online(&mut self) -> SyncResult<()> {
        loop {
            self.rx
                .changed()
                .await
                .map_err(|_| SyncError::ChannelClosed)?;
            if *self.rx.borrow_and_update() {
                return Ok(());
            }
        }
    }
}
