//! Fan-out event buffer with bounded backlog replay.
//!
//! Publishers never block. Every subscriber has its own bounded mailbox; when
//! it is full the oldest undelivered event is dropped, so a slow subscriber
//! only loses its own events. A new subscriber receives the current backlog
//! before any live event. Subscribe and publish serialize on the same lock,
//! so nothing is delivered twice or skipped at the hand-over.

use futures::Stream;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};

struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> Mailbox<T> {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: T) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct Registry<T> {
    backlog: VecDeque<T>,
    subscribers: HashMap<u64, Arc<Mailbox<T>>>,
    next_id: u64,
    closed: bool,
}

struct Shared<T> {
    registry: Mutex<Registry<T>>,
    backlog_capacity: usize,
    mailbox_capacity: usize,
}

/// Broadcast buffer; cheap to clone, clones share state
pub struct EventBuffer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for EventBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.registry.lock();
        f.debug_struct("EventBuffer")
            .field("backlog", &registry.backlog.len())
            .field("subscribers", &registry.subscribers.len())
            .field("closed", &registry.closed)
            .finish()
    }
}

impl<T: Clone + Send + 'static> EventBuffer<T> {
    /// `backlog_capacity` events are kept for replay. Mailboxes hold at least
    /// the full backlog so a new subscriber's replay is never truncated.
    pub fn new(backlog_capacity: usize, mailbox_capacity: usize) -> Self {
        let backlog_capacity = backlog_capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry {
                    backlog: VecDeque::with_capacity(backlog_capacity),
                    subscribers: HashMap::new(),
                    next_id: 1,
                    closed: false,
                }),
                backlog_capacity,
                mailbox_capacity: mailbox_capacity.max(backlog_capacity),
            }),
        }
    }

    /// Subscribe; the current backlog is queued first.
    pub fn subscribe(&self) -> Subscription<T> {
        let mailbox = Arc::new(Mailbox::new(self.shared.mailbox_capacity));
        let mut registry = self.shared.registry.lock();

        {
            let mut queue = mailbox.queue.lock();
            queue.extend(registry.backlog.iter().cloned());
        }

        let id = registry.next_id;
        registry.next_id += 1;
        if registry.closed {
            mailbox.close();
        } else {
            registry.subscribers.insert(id, mailbox.clone());
        }
        debug!(subscriber = id, replayed = registry.backlog.len(), "Event subscriber added");

        Subscription {
            id,
            mailbox,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Append to the backlog and push to every subscriber. Returns the number
    /// of live subscribers the event was delivered to.
    pub fn publish(&self, event: T) -> usize {
        let mut registry = self.shared.registry.lock();
        if registry.closed {
            return 0;
        }

        if registry.backlog.len() >= self.shared.backlog_capacity {
            registry.backlog.pop_front();
        }
        registry.backlog.push_back(event.clone());

        for mailbox in registry.subscribers.values() {
            mailbox.push(event.clone());
        }
        registry.subscribers.len()
    }

    /// End every subscription; later subscribers get the backlog then end.
    pub fn close(&self) {
        let mut registry = self.shared.registry.lock();
        registry.closed = true;
        for (_, mailbox) in registry.subscribers.drain() {
            mailbox.close();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.lock().subscribers.len()
    }

    pub fn backlog(&self) -> Vec<T> {
        self.shared.registry.lock().backlog.iter().cloned().collect()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    mailbox: Arc<Mailbox<T>>,
    shared: Weak<Shared<T>>,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.mailbox.queue.lock().len())
            .field("closed", &self.mailbox.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Send + 'static> Subscription<T> {
    /// Next event; `None` once the buffer is closed and the mailbox drained.
    pub async fn recv(&mut self) -> Option<T> {
        let mailbox = &self.mailbox;
        loop {
            let notified = mailbox.notify.notified();
            let next = mailbox.queue.lock().pop_front();
            if next.is_some() {
                return next;
            }
            if mailbox.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.mailbox.queue.lock().pop_front()
    }

    /// Events dropped from this mailbox because it was full
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            debug!(subscriber = self.id, "Event buffer gone before unsubscribe");
            return;
        };
        let removed = shared.registry.lock().subscribers.remove(&self.id);
        if removed.is_none() && !self.mailbox.closed.load(Ordering::Acquire) {
            warn!(subscriber = self.id, "Unsubscribe of unknown event subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_subscriber_gets_backlog_then_live() {
        let buffer = EventBuffer::new(3, 8);
        for i in 0..5 {
            buffer.publish(i);
        }

        let mut sub = buffer.subscribe();
        buffer.publish(5);
        buffer.publish(6);

        let mut received = Vec::new();
        while let Some(event) = sub.try_recv() {
            received.push(event);
        }
        assert_eq!(received, vec![2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_oldest() {
        let buffer = EventBuffer::new(1, 2);
        let mut slow = buffer.subscribe();
        let mut fast = buffer.subscribe();

        buffer.publish(1);
        assert_eq!(fast.recv().await, Some(1));
        buffer.publish(2);
        assert_eq!(fast.recv().await, Some(2));
        buffer.publish(3);
        assert_eq!(fast.recv().await, Some(3));

        assert_eq!(slow.recv().await, Some(2));
        assert_eq!(slow.recv().await, Some(3));
        assert_eq!(slow.dropped(), 1);
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let buffer = EventBuffer::new(4, 4);
        let mut sub = buffer.subscribe();

        let publisher = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("hello");
        });

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap();
        assert_eq!(event, Some("hello"));
    }

    #[test]
    fn test_recv_is_pending_until_publish() {
        let buffer = EventBuffer::new(4, 4);
        let mut sub = buffer.subscribe();
        let mut recv = tokio_test::task::spawn(sub.recv());
        tokio_test::assert_pending!(recv.poll());

        buffer.publish(7u8);
        assert!(recv.is_woken());
        tokio_test::assert_ready_eq!(recv.poll(), Some(7));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let buffer = EventBuffer::new(4, 4);
        buffer.publish(1);
        let stream = buffer.subscribe().into_stream();
        buffer.close();

        let events: Vec<i32> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
            .await
            .unwrap();
        assert_eq!(events, vec![1]);
        assert_eq!(buffer.publish(2), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let buffer: EventBuffer<u8> = EventBuffer::new(2, 2);
        let sub = buffer.subscribe();
        assert_eq!(buffer.subscriber_count(), 1);
        drop(sub);
        assert_eq!(buffer.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_publishers_no_duplicates() {
        let buffer = EventBuffer::new(1000, 1000);
        let mut sub = buffer.subscribe();

        let mut handles = Vec::new();
        for p in 0..4u32 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100u32 {
                    buffer.publish(p * 1000 + i);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(event) = sub.try_recv() {
            assert!(seen.insert(event), "duplicate {event}");
        }
        assert_eq!(seen.len(), 400);
    }
}
