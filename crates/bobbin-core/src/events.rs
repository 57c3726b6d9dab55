//! Replayable event fan-out for actor event streams.
//!
//! Each actor publishes its events through an [`EventBus`]: a ring buffer of
//! the most recent items plus a tokio broadcast tail. New subscribers are
//! handed the ring contents first, then follow the live stream. Publishing
//! never blocks; a subscriber that falls behind observes a `Lagged` gap on
//! its receiver — a monotonic skip, never reordering.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

pub struct EventBus<T: Clone> {
    ring: Mutex<VecDeque<T>>,
    tx: broadcast::Sender<T>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Publish an event to the ring and all live subscribers.
    /// Never blocks; with no subscribers the event only lands in the ring.
    ///
    /// The lock is held across the broadcast send so that `subscribe` can
    /// never observe an event in the ring and then see it again on the
    /// live tail.
    pub fn publish(&self, event: T) {
        let mut ring = self.ring.lock().unwrap();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event.clone());
        let _ = self.tx.send(event);
    }

    /// Subscribe: returns the replay snapshot (oldest first) and a live
    /// receiver for everything published after the snapshot was taken.
    ///
    /// The receiver is created while the ring lock is held, so no event can
    /// fall between the snapshot and the live tail.
    pub fn subscribe(&self) -> (Vec<T>, broadcast::Receiver<T>) {
        let ring = self.ring.lock().unwrap();
        let snapshot = ring.iter().cloned().collect();
        let rx = self.tx.subscribe();
        (snapshot, rx)
    }

    /// Number of events currently held in the replay ring.
    pub fn ring_len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_replay_then_live_tail() {
        let bus = EventBus::new(16);
        bus.publish(1u32);
        bus.publish(2);

        let (snapshot, mut rx) = bus.subscribe();
        assert_eq!(snapshot, vec![1, 2]);

        bus.publish(3);
        assert_eq!(rx.recv().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ring_drops_oldest_at_capacity() {
        let bus = EventBus::new(3);
        for i in 0..5u32 {
            bus.publish(i);
        }
        let (snapshot, _rx) = bus.subscribe();
        assert_eq!(snapshot, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn slow_subscriber_sees_monotonic_gap_not_reordering() {
        let bus = EventBus::new(8);
        let (_, mut rx) = bus.subscribe();

        // Overrun the broadcast buffer without the subscriber draining.
        for i in 0..10_000u32 {
            bus.publish(i);
        }

        let mut last: Option<u32> = None;
        loop {
            match rx.try_recv() {
                Ok(v) => {
                    if let Some(prev) = last {
                        assert!(v > prev, "events must stay in publish order");
                    }
                    last = Some(v);
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(last, Some(9_999));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish("ok");
        assert_eq!(bus.ring_len(), 1);
    }
}
