//! Bounded single-producer/single-consumer queue with overflow collapse.

use log::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Outcome of [`CollapseQueue::push_or_collapse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    /// The item was appended.
    Queued,
    /// The queue was full; its contents were replaced by one snapshot.
    Collapsed,
    /// The queue is closed and accepts nothing more.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    // The only queued item is a snapshot the consumer has not taken yet.
    collapsed: bool,
    closed: bool,
}

impl<T> QueueState<T> {
    fn take_front(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.collapsed = false;
        Some(item)
    }
}

/// A FIFO of at most `depth` items.
///
/// Pushing never waits on the consumer. When the queue is full the producer
/// supplies a snapshot that replaces every queued item, so the consumer never
/// sees stale deltas mixed with a snapshot. Until the consumer takes that
/// snapshot, every further push rebuilds it instead of queueing behind it.
/// `pop` waits for an item or for
/// [`close`](CollapseQueue::close), after which already queued items are
/// still handed out before `None`.
pub struct CollapseQueue<T> {
    depth: usize,
    state: Mutex<QueueState<T>>,
    ready: Notify,
}

impl<T> CollapseQueue<T> {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(depth),
                collapsed: false,
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether the queue holds a snapshot the consumer has not taken yet.
    pub fn is_collapsed(&self) -> bool {
        self.state.lock().collapsed
    }

    /// Append without collapsing. Hands the item back when full, collapsed
    /// or closed.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed || state.collapsed || state.items.len() >= self.depth {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Append `item`, or when full (or already collapsed) replace everything
    /// queued with the result of `snapshot`. A failing snapshot leaves the
    /// queue untouched and the error is returned to the caller.
    pub fn push_or_collapse<E>(
        &self,
        item: T,
        snapshot: impl FnOnce() -> Result<T, E>,
    ) -> Result<Pushed, E> {
        match self.try_push(item) {
            Ok(()) => Ok(Pushed::Queued),
            Err(_) if self.is_closed() => Ok(Pushed::Closed),
            Err(_) => {
                let already_collapsed = self.is_collapsed();
                let replacement = snapshot()?;
                if self.replace_all(replacement) {
                    if !already_collapsed {
                        warn!("Queue of depth {} overflowed, collapsed to a snapshot", self.depth);
                    }
                    Ok(Pushed::Collapsed)
                } else {
                    Ok(Pushed::Closed)
                }
            }
        }
    }

    /// Discard everything queued and leave exactly `item`, regardless of
    /// depth. Later pushes keep replacing it until the consumer takes it.
    /// Returns false when the queue is already closed.
    pub fn replace_all(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.items.clear();
        state.items.push_back(item);
        state.collapsed = true;
        drop(state);
        self.ready.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().take_front()
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.take_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            // A permit stored by notify_one before this point wakes us
            // immediately, so a push between the check and here is not lost.
            self.ready.notified().await;
        }
    }

    /// Stop accepting items and wake the consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_one();
    }

    /// Take every queued item without waiting.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.collapsed = false;
        state.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    enum Item {
        Delta(u32),
        Snapshot(u32),
    }

    #[test]
    fn overflow_collapses_to_exactly_one_snapshot() {
        let queue = CollapseQueue::new(10);
        let mut outcomes = Vec::new();
        for n in 0..11 {
            let outcome = queue
                .push_or_collapse(Item::Delta(n), || Ok::<_, Infallible>(Item::Snapshot(n)))
                .unwrap();
            outcomes.push(outcome);
        }

        assert!(outcomes[..10].iter().all(|o| *o == Pushed::Queued));
        assert_eq!(outcomes[10], Pushed::Collapsed);
        assert_eq!(queue.drain(), vec![Item::Snapshot(10)]);
    }

    #[test]
    fn any_number_of_overflowing_pushes_leaves_a_single_snapshot() {
        for depth in 1..5 {
            for extra in 1..8 {
                let queue = CollapseQueue::new(depth);
                for n in 0..(depth as u32 + extra) {
                    queue
                        .push_or_collapse(Item::Delta(n), || {
                            Ok::<_, Infallible>(Item::Snapshot(n))
                        })
                        .unwrap();
                }
                let last = depth as u32 + extra - 1;
                assert_eq!(queue.drain(), vec![Item::Snapshot(last)]);
            }
        }
    }

    #[test]
    fn taking_the_snapshot_lets_deltas_queue_again() {
        let queue = CollapseQueue::new(2);
        for n in 0..3 {
            queue
                .push_or_collapse(Item::Delta(n), || Ok::<_, Infallible>(Item::Snapshot(n)))
                .unwrap();
        }
        assert!(queue.is_collapsed());
        assert_eq!(queue.try_push(Item::Delta(3)), Err(Item::Delta(3)));

        assert_eq!(queue.try_pop(), Some(Item::Snapshot(2)));
        assert!(!queue.is_collapsed());
        let outcome = queue
            .push_or_collapse(Item::Delta(4), || Ok::<_, Infallible>(Item::Snapshot(4)))
            .unwrap();
        assert_eq!(outcome, Pushed::Queued);
        assert_eq!(queue.drain(), vec![Item::Delta(4)]);
    }

    #[test]
    fn failed_snapshot_leaves_queue_untouched() {
        let queue = CollapseQueue::new(1);
        queue.try_push(Item::Delta(0)).unwrap();

        let result = queue.push_or_collapse(Item::Delta(1), || Err("store unavailable"));
        assert_eq!(result, Err("store unavailable"));
        assert_eq!(queue.drain(), vec![Item::Delta(0)]);
    }

    #[test]
    fn closed_queue_rejects_items() {
        let queue = CollapseQueue::new(2);
        queue.close();
        assert_eq!(queue.try_push(Item::Delta(0)), Err(Item::Delta(0)));
        assert!(!queue.replace_all(Item::Snapshot(0)));
        let outcome = queue
            .push_or_collapse(Item::Delta(1), || Ok::<_, Infallible>(Item::Snapshot(1)))
            .unwrap();
        assert_eq!(outcome, Pushed::Closed);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let queue = Arc::new(CollapseQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.try_push(Item::Delta(7)).unwrap();

        let popped = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("pop should wake up")
            .unwrap();
        assert_eq!(popped, Some(Item::Delta(7)));
    }

    #[tokio::test]
    async fn close_unblocks_pop_after_draining() {
        let queue = Arc::new(CollapseQueue::new(4));
        queue.try_push(Item::Delta(1)).unwrap();
        queue.close();

        assert_eq!(queue.pop().await, Some(Item::Delta(1)));
        let last = timeout(Duration::from_secs(1), queue.pop())
            .await
            .expect("closed queue must not block");
        assert_eq!(last, None);
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_consumer() {
        let queue: Arc<CollapseQueue<Item>> = Arc::new(CollapseQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.close();

        let popped = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("close should wake the consumer")
            .unwrap();
        assert_eq!(popped, None);
    }
}
