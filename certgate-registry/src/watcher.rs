//! Change watcher (C7) — long-polls the message queue for service/front-end
//! change notifications and invokes a callback for each one that parses.
//!
//! Grounded on the queue-driven watcher command: receive with a wait
//! timeout, unconditionally delete every message received, unmarshal the
//! body and silently drop it on parse failure, otherwise invoke the
//! callback. Cancellation here is a `tokio::sync::watch<bool>` in place of
//! a `context.Context` + `sync.WaitGroup` pair: the watch channel both
//! signals "stop" and lets the caller await the task's exit via the
//! returned `JoinHandle`.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::queue::MessageQueue;

/// Notification body the watcher expects to unmarshal from each message,
/// matching §6's wire contract: `{"Services": [string], "Frontends":
/// [string]}`. The names listed are advisory only — per §4.5 the callback
/// always re-reads full state rather than applying them as a delta.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ChangeNotification {
    #[serde(default, rename = "Services")]
    pub services: Vec<String>,
    #[serde(default, rename = "Frontends")]
    pub frontends: Vec<String>,
}

/// Invoked once per message that parses successfully.
pub type ChangesCallback = Arc<dyn Fn(ChangeNotification) + Send + Sync>;

/// Starts the long-poll loop on a background task. Returns a `stop`
/// sender (dropping it or sending `true` ends the loop) and the task's
/// `JoinHandle` to await a clean exit.
pub fn start(
    queue: Arc<dyn MessageQueue>,
    wait: Duration,
    callback: ChangesCallback,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        loop {
            if *rx.borrow() {
                return;
            }

            tokio::select! {
                _ = rx.changed() => {
                    if *rx.borrow() {
                        return;
                    }
                }
                result = queue.receive(wait) => {
                    match result {
                        Ok(messages) => {
                            for message in messages {
                                if let Err(e) = queue.delete(&message.receipt).await {
                                    warn!(error = %e, "failed to delete queue message");
                                }
                                match serde_json::from_str::<ChangeNotification>(&message.body) {
                                    Ok(change) => callback(change),
                                    Err(e) => debug!(error = %e, "dropping unparsable queue message"),
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "queue receive failed, retrying");
                        }
                    }
                }
            }
        }
    });

    (tx, handle)
}

/// Requests the watcher loop to stop and waits for it to exit.
pub async fn stop(tx: watch::Sender<bool>, handle: JoinHandle<()>) {
    let _ = tx.send(true);
    let _ = handle.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryMessageQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn callback_fires_for_each_parsed_message() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        queue.push(r#"{"Services":[],"Frontends":["a.example.com"]}"#).await;
        queue.push("not json").await;

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let callback: ChangesCallback = Arc::new(move |_change| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, handle) = start(queue.clone(), Duration::from_millis(10), callback);
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop(tx, handle).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn stop_before_any_message_exits_cleanly() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let callback: ChangesCallback = Arc::new(|_| {});
        let (tx, handle) = start(queue, Duration::from_secs(5), callback);
        stop(tx, handle).await;
    }
}
