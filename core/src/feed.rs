/// Live feed plumbing shared by the message and summary synchronizers.
///
/// A `Feed` is the consumer half of a live subscription: an owned handle that
/// yields full snapshots until it is closed. Closing is idempotent and safe at
/// any point, including before the first snapshot has been delivered; a
/// snapshot already in flight when `close` is called is dropped, never
/// surfaced.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Consumer half of a live subscription. Dropping the feed cancels it.
pub struct Feed<T> {
    rx: mpsc::Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Feed<T> {
    /// Receive the next full snapshot. Returns `None` once the feed is closed
    /// (from either side) — late snapshots are discarded after `close`.
    pub async fn recv(&mut self) -> Option<T> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let value = self.rx.recv().await?;
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        Some(value)
    }

    /// Cancel the subscription. Idempotent; callable at any time.
    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.rx.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Producer half, held by the store-side forwarding task.
pub(crate) struct FeedSender<T> {
    tx: mpsc::Sender<T>,
    closed: Arc<AtomicBool>,
}

impl<T> FeedSender<T> {
    /// Deliver a snapshot. Returns false once the consumer has cancelled,
    /// signalling the forwarding task to exit.
    pub(crate) async fn send(&self, value: T) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(value).await.is_ok()
    }
}

pub(crate) fn channel<T>(buffer: usize) -> (FeedSender<T>, Feed<T>) {
    let (tx, rx) = mpsc::channel(buffer);
    let closed = Arc::new(AtomicBool::new(false));
    (
        FeedSender {
            tx,
            closed: closed.clone(),
        },
        Feed { rx, closed },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_delivers_then_closes() {
        let (tx, mut feed) = channel::<u32>(4);
        assert!(tx.send(1).await);
        assert_eq!(feed.recv().await, Some(1));
        feed.close();
        assert!(!tx.send(2).await);
        assert_eq!(feed.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_before_delivery_drops_pending_snapshot() {
        let (tx, mut feed) = channel::<u32>(4);
        assert!(tx.send(7).await);
        feed.close();
        // The snapshot was queued before close but must not surface after it.
        assert_eq!(feed.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_tx, mut feed) = channel::<u32>(4);
        feed.close();
        feed.close();
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_drop_cancels_producer_side() {
        let (tx, feed) = channel::<u32>(4);
        drop(feed);
        assert!(!tx.send(1).await);
    }
}
