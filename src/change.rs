//! Change notification sources
//!
//! A change source tells the pipeline "the editor content may have changed".
//! How the host notices (polling, an observer callback, an event) stays behind
//! the `ChangeSource` trait. Dropping a `Subscription` unsubscribes.

use crate::editor::EditorHost;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::trace;

/// Something the pipeline can subscribe to for change notifications.
pub trait ChangeSource: Send + Sync {
    fn subscribe(&self) -> Subscription;
}

/// A live subscription. Notifications carry no payload; consumers re-read the
/// editor when woken.
pub struct Subscription {
    rx: mpsc::Receiver<()>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn new(rx: mpsc::Receiver<()>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Wait for the next notification. `None` once the source has gone away.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Push side of an event-driven source.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<()>,
}

impl ChangeNotifier {
    /// Signal a change. Notifications coalesce while one is still pending.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Create an event-driven source: the host calls `notify` whenever its
/// content changes.
pub fn channel() -> (ChangeNotifier, Subscription) {
    let (tx, rx) = mpsc::channel(1);
    (ChangeNotifier { tx }, Subscription::new(rx, None))
}

/// Polls the host text and notifies when its hash changes.
pub struct PollingChangeSource {
    host: Arc<dyn EditorHost>,
    interval: Duration,
}

impl PollingChangeSource {
    pub fn new(host: Arc<dyn EditorHost>, interval: Duration) -> Self {
        Self { host, interval }
    }
}

impl ChangeSource for PollingChangeSource {
    fn subscribe(&self) -> Subscription {
        let (notifier, mut subscription) = channel();
        let host = self.host.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_hash: Option<u64> = None;

            loop {
                ticker.tick().await;
                if notifier.tx.is_closed() {
                    break;
                }
                // A missing editor is not a change; wait for it to come back.
                let Some(text) = host.text() else {
                    continue;
                };
                let hash = content_hash(&text);
                if last_hash != Some(hash) {
                    trace!(hash, "editor content changed");
                    last_hash = Some(hash);
                    notifier.notify();
                }
            }
        });

        subscription.task = Some(task);
        subscription
    }
}

fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
