//! Trailing-edge debounce
//!
//! Collapses a burst of events into one callback fired after a quiet window.
//! Every event restarts the window; the callback receives the payload of the
//! last event in the burst. There is no leading-edge call. Dropping the
//! debouncer (or calling `cancel`) discards anything still pending.

use std::future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Start a debouncer that calls `on_fire` after `window` of inactivity.
    pub fn spawn<F>(window: Duration, mut on_fire: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        let task = tokio::spawn(async move {
            let mut pending: Option<T> = None;
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(payload) => {
                            pending = Some(payload);
                            deadline = Some(Instant::now() + window);
                        }
                        // Debouncer dropped: pending payload is discarded
                        None => break,
                    },
                    () = async {
                        match deadline {
                            Some(at) => time::sleep_until(at).await,
                            None => future::pending::<()>().await,
                        }
                    } => {
                        deadline = None;
                        if let Some(payload) = pending.take() {
                            on_fire(payload);
                        }
                    }
                }
            }
        });

        Self { tx, task }
    }

    /// Record an event, restarting the quiet window.
    pub fn notify(&self, payload: T) {
        let _ = self.tx.send(payload);
    }

    /// Cancel any pending invocation and stop the debouncer.
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
