//! Throughput optimization: debouncing and bounded batch processing.
//!
//! These sit in front of the synchronization manager to cut redundant
//! remote calls — rapid repeated edits coalesce into one publish, and
//! bulk operations run in fixed-size concurrent waves instead of
//! unbounded fan-out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Coalesces rapid repeated triggers for the same key into a single
/// delayed action — only the last call within the delay window runs.
#[derive(Default)]
pub struct Debouncer {
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Debouncer {
    /// Creates a debouncer with no pending actions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `action` to run after `delay`, cancelling any action
    /// previously scheduled under the same key whose timer has not yet
    /// fired. An action already past its timer runs to completion.
    pub fn debounce<F, Fut>(&self, key: impl Into<String>, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached: the tracked handle covers the timer only, so a
            // later debounce cannot abort an in-flight action.
            tokio::spawn(action());
        });

        let mut pending = self.pending.lock().unwrap();
        if let Some(previous) = pending.insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancels the pending action for a key, if its timer has not yet
    /// fired.
    pub fn cancel(&self, key: &str) {
        if let Some(handle) = self.pending.lock().unwrap().remove(key) {
            handle.abort();
        }
    }

    /// Cancels every pending action.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Runs `operation` over `items` in fixed-size waves.
///
/// Within a wave the operations run concurrently; the next wave starts
/// only after the whole wave completes, bounding both latency and
/// concurrent remote load. Results come back in input order.
pub async fn process_batch<T, R, F, Fut>(items: Vec<T>, batch_size: usize, operation: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let size = batch_size.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut remaining = items.into_iter();

    loop {
        let wave: Vec<T> = remaining.by_ref().take(size).collect();
        if wave.is_empty() {
            break;
        }
        let outputs = futures::future::join_all(wave.into_iter().map(&operation)).await;
        results.extend(outputs);
    }

    results
}
