use tokio::sync::mpsc;

/// Outcome of a background cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// Response stored in a partition
  Stored { partition: String, url: String },
  /// Storage rejected the write (quota, I/O, poisoned lock...)
  WriteFailed {
    partition: String,
    url: String,
    error: String,
  },
}

/// Sending half handed to the cache layer. Dropped receivers are ignored.
#[derive(Debug, Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<CacheEvent>,
}

impl EventSender {
  pub fn send(&self, event: CacheEvent) {
    let _ = self.tx.send(event);
  }
}

/// Receiver for cache write outcomes
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<CacheEvent>,
}

impl EventHandler {
  /// Receive the next event
  pub async fn next(&mut self) -> Option<CacheEvent> {
    self.rx.recv().await
  }

  /// Take an already delivered event without waiting
  pub fn try_next(&mut self) -> Option<CacheEvent> {
    self.rx.try_recv().ok()
  }
}

/// Create a connected sender/handler pair
pub fn channel() -> (EventSender, EventHandler) {
  let (tx, rx) = mpsc::unbounded_channel();
  (EventSender { tx }, EventHandler { rx })
}
