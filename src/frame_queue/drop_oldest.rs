//! Fixed-capacity FIFO with drop-oldest backpressure

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

/// FIFO that never blocks its writer
///
/// Pushing into a full queue evicts the head first, so a slow reader
/// loses the oldest buffered items instead of stalling the producer.
pub struct BoundedDropOldestQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> BoundedDropOldestQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Append `item`
    ///
    /// Returns the item that did not survive: the evicted head when the
    /// queue was full, or `item` itself when the queue is closed.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Some(item);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.dropped += 1;
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Wait for the head item
    ///
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted by drop-oldest so far
    pub fn dropped_count(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Discard everything and release waiting readers
    ///
    /// Returns the number of items discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            let n = state.items.len();
            state.items.clear();
            n
        };
        self.notify.notify_waiters();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_over_capacity_keeps_newest_in_order() {
        let queue = BoundedDropOldestQueue::new(3);
        let mut evicted = Vec::new();
        for i in 0..5 {
            if let Some(old) = queue.push(i) {
                evicted.push(old);
            }
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(evicted, vec![0, 1]);
        assert_eq!(queue.dropped_count(), 2);

        let remaining: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_writer_thread() {
        let queue = Arc::new(BoundedDropOldestQueue::new(4));
        let writer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                queue.push("frame");
            })
        };

        assert_eq!(queue.pop().await, Some("frame"));
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_close_discards_and_ends_reader() {
        let queue = Arc::new(BoundedDropOldestQueue::new(4));
        queue.push(1);
        queue.push(2);

        assert_eq!(queue.close(), 2);
        assert_eq!(queue.pop().await, None);
        assert_eq!(queue.push(3), Some(3));
        assert!(queue.is_empty());
    }
}
