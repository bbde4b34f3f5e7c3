//! Deduplicating ordered blocking event queue.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

/// An ordered, deduplicating, blocking collection of pending events.
///
/// The queue is a set, not a multiset: the same sync is never scheduled
/// twice before it is processed. Adding an already-present event replaces
/// the queued element in place, keeping its position, so a taker always
/// sees the latest payload for that identity. Distinct events come out in
/// insertion order.
pub struct EventQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

struct Inner<T> {
    order: VecDeque<T>,
    present: HashSet<T>,
}

impl<T: Eq + Hash + Clone> EventQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                present: HashSet::new(),
            }),
            available: Condvar::new(),
        }
    }

    /// Inserts an event, or refreshes the queued element if one with the
    /// same identity is already pending.
    ///
    /// Returns whether the event was newly queued. The refresh keeps the
    /// original queue position: equality for queued types may ignore
    /// payload fields, and a taker must see the payload of the latest
    /// add, not the first.
    pub fn add(&self, event: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.present.contains(&event) {
            if let Some(slot) = inner.order.iter_mut().find(|queued| **queued == event) {
                *slot = event.clone();
            }
            inner.present.replace(event);
            return false;
        }
        inner.present.insert(event.clone());
        inner.order.push_back(event);
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Removes and returns the earliest-inserted event, blocking until one
    /// is available.
    ///
    /// The internal lock is released while the caller is parked.
    pub fn take(&self) -> T {
        let mut inner = self.inner.lock();
        loop {
            if let Some(event) = inner.order.pop_front() {
                inner.present.remove(&event);
                return event;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Like `take`, but gives up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(event) = inner.order.pop_front() {
                inner.present.remove(&event);
                return Some(event);
            }
            if self.available.wait_for(&mut inner, timeout).timed_out() {
                // One more look: the event may have landed while waking.
                if let Some(event) = inner.order.pop_front() {
                    inner.present.remove(&event);
                    return Some(event);
                }
                return None;
            }
        }
    }

    /// Removes a specific pending event. Returns whether it was queued.
    pub fn remove(&self, event: &T) -> bool {
        let mut inner = self.inner.lock();
        if !inner.present.remove(event) {
            return false;
        }
        inner.order.retain(|queued| queued != event);
        true
    }

    /// Removes every pending event matching `predicate`; returns how many
    /// were dropped.
    pub fn remove_if(&self, predicate: impl Fn(&T) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.order.len();
        inner.order.retain(|event| !predicate(event));
        let removed: Vec<T> = inner
            .present
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect();
        for event in removed {
            inner.present.remove(&event);
        }
        before - inner.order.len()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}

impl<T: Eq + Hash + Clone> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn add_deduplicates() {
        let queue = EventQueue::new();
        assert!(queue.add("p"));
        assert!(!queue.add("p"));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.take(), "p");
        assert!(queue.is_empty());

        // Once processed, the same event can be queued again.
        assert!(queue.add("p"));
    }

    /// Identity on `key` only; `payload` models mutable event state.
    #[derive(Clone, Debug)]
    struct Keyed {
        key: &'static str,
        payload: u32,
    }

    impl PartialEq for Keyed {
        fn eq(&self, other: &Self) -> bool {
            self.key == other.key
        }
    }

    impl Eq for Keyed {}

    impl std::hash::Hash for Keyed {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            self.key.hash(state);
        }
    }

    #[test]
    fn duplicate_add_refreshes_the_queued_payload() {
        let queue = EventQueue::new();
        assert!(queue.add(Keyed {
            key: "first",
            payload: 1
        }));
        assert!(queue.add(Keyed {
            key: "second",
            payload: 1
        }));
        assert!(!queue.add(Keyed {
            key: "first",
            payload: 2
        }));
        assert_eq!(queue.len(), 2);

        // Position is kept, payload is the latest.
        let taken = queue.take();
        assert_eq!(taken.key, "first");
        assert_eq!(taken.payload, 2);
        assert_eq!(queue.take().key, "second");
    }

    #[test]
    fn take_is_fifo_over_distinct_events() {
        let queue = EventQueue::new();
        queue.add(1);
        queue.add(2);
        queue.add(3);
        queue.add(2);

        assert_eq!(queue.take(), 1);
        assert_eq!(queue.take(), 2);
        assert_eq!(queue.take(), 3);
    }

    #[test]
    fn take_blocks_until_add() {
        let queue = Arc::new(EventQueue::new());

        let adder = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.add("late");
            })
        };

        let start = Instant::now();
        assert_eq!(queue.take(), "late");
        assert!(start.elapsed() >= Duration::from_millis(40));
        adder.join().unwrap();
    }

    #[test]
    fn take_timeout_on_empty_queue() {
        let queue: EventQueue<&str> = EventQueue::new();
        let start = Instant::now();
        assert_eq!(queue.take_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn remove_cancels_pending_event() {
        let queue = EventQueue::new();
        queue.add("keep");
        queue.add("drop");

        assert!(queue.remove(&"drop"));
        assert!(!queue.remove(&"drop"));
        assert_eq!(queue.take(), "keep");
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_if_filters_pending_events() {
        let queue = EventQueue::new();
        for i in 0..10 {
            queue.add(i);
        }

        assert_eq!(queue.remove_if(|n| n % 2 == 0), 5);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.take(), 1);

        // Removed events are re-addable.
        assert!(queue.add(0));
    }

    #[test]
    fn exactly_one_delivery_across_workers() {
        let queue = Arc::new(EventQueue::new());
        for i in 0..100 {
            queue.add(i);
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(event) = queue.take_timeout(Duration::from_millis(20)) {
                    seen.push(event);
                }
                seen
            }));
        }

        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<i32>>());
    }
}
