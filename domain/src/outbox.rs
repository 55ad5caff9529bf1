use events::{CollapseQueue, Event, EventType, Pushed};
use log::*;
use std::convert::Infallible;

/// The bounded queue of events waiting for one session's relay task.
///
/// The registry pushes while holding its critical section; the session's
/// relay task is the only consumer. A push never blocks: when the outbox is
/// full its contents are replaced by a freshly built snapshot.
pub struct Outbox {
    queue: CollapseQueue<Event>,
}

impl Outbox {
    pub fn new(depth: usize) -> Self {
        Self {
            queue: CollapseQueue::new(depth),
        }
    }

    /// Enqueue `event`. On overflow, `snapshot` is called for a fresh
    /// `FullState` (or `SyncError`) that replaces everything queued.
    pub fn push(&self, event: Event, snapshot: impl FnOnce() -> Event) -> Pushed {
        let event_type = event.event_type();
        let pushed = match self
            .queue
            .push_or_collapse(event, || Ok::<_, Infallible>(snapshot()))
        {
            Ok(pushed) => pushed,
            Err(never) => match never {},
        };
        if pushed == Pushed::Collapsed {
            debug!("Outbox collapsed while pushing {event_type}");
        }
        pushed
    }

    /// Load an `IntentionalDisconnect` ahead of anything queued, ignoring the
    /// depth limit, and accept nothing after it.
    pub fn force_disconnect(&self) {
        self.queue.replace_all(Event::IntentionalDisconnect);
        self.queue.close();
    }

    /// Wait for the next event; `None` once the outbox is closed and drained.
    pub async fn recv(&self) -> Option<Event> {
        self.queue.pop().await
    }

    pub fn close(&self) {
        self.queue.close();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take every queued event without waiting.
    pub fn drain(&self) -> Vec<Event> {
        self.queue.drain()
    }
}
