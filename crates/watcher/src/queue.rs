//! Bounded coalescing event queue
//!
//! The background thread pushes, the caller drains. Pushing never blocks:
//! when the queue is full the oldest entries collapse into one leading
//! `Overflow` marker, so the consumer learns that it missed something
//! instead of the producer stalling on a slow consumer.
//!
//! A `Modified` for the same path as the newest unread entry replaces that
//! entry rather than adding a second one.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use treewatch_core::config::MIN_QUEUE_CAPACITY;
use treewatch_core::ChangeEvent;

/// An event together with its insertion sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub seq: u64,
    pub event: ChangeEvent,
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Entries currently held
    pub len: usize,
    pub capacity: usize,
    /// Most entries ever held at once
    pub high_water: usize,
    /// Pushes absorbed by the previous entry
    pub coalesced: u64,
    /// Entries discarded to make room
    pub dropped: u64,
    /// Overflow markers inserted because the queue was full
    pub overflow_markers: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueuedEvent>,
    next_seq: u64,
    closed: bool,
    stats: QueueStats,
}

/// Bounded multi-producer multi-consumer queue of change events
#[derive(Debug)]
pub struct EventQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` entries
    ///
    /// Capacities below two are raised to two: the overflow marker needs
    /// one slot and the newest event another.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_QUEUE_CAPACITY);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                stats: QueueStats {
                    capacity,
                    ..Default::default()
                },
                ..Default::default()
            }),
            ready: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue one event
    pub fn push(&self, event: ChangeEvent) {
        let mut state = self.state.lock();
        self.push_locked(&mut state, event);
        drop(state);
        self.ready.notify_one();
    }

    /// Enqueue a batch under one lock acquisition
    pub fn push_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        let mut state = self.state.lock();
        let before = state.next_seq;
        for event in events {
            self.push_locked(&mut state, event);
        }
        let pushed = state.next_seq != before;
        drop(state);
        if pushed {
            self.ready.notify_all();
        }
    }

    fn push_locked(&self, state: &mut QueueState, event: ChangeEvent) {
        if let Some(last) = state.entries.back_mut() {
            let absorbed = match (&last.event, &event) {
                (ChangeEvent::Modified(prev), ChangeEvent::Modified(next)) => prev == next,
                (ChangeEvent::Overflow, ChangeEvent::Overflow) => true,
                _ => false,
            };
            if absorbed {
                last.event = event;
                state.stats.coalesced += 1;
                return;
            }
        }

        if state.entries.len() >= self.capacity {
            Self::make_room(state);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push_back(QueuedEvent { seq, event });

        state.stats.len = state.entries.len();
        state.stats.high_water = state.stats.high_water.max(state.entries.len());
    }

    /// Free one slot, folding lost entries into the leading marker
    fn make_room(state: &mut QueueState) {
        let head_is_marker = state
            .entries
            .front()
            .map(|entry| entry.event.is_overflow())
            .unwrap_or(false);

        if head_is_marker {
            state.entries.remove(1);
            state.stats.dropped += 1;
            return;
        }

        // Two oldest entries make way for the marker and the new event
        let Some(first) = state.entries.pop_front() else {
            return;
        };
        state.entries.pop_front();
        state.stats.dropped += 2;
        state.stats.overflow_markers += 1;
        state.entries.push_front(QueuedEvent {
            seq: first.seq,
            event: ChangeEvent::Overflow,
        });
    }

    /// Remove the oldest entry without waiting
    pub fn pop(&self) -> Option<ChangeEvent> {
        self.pop_queued().map(|entry| entry.event)
    }

    /// Remove the oldest entry, keeping its sequence number
    pub fn pop_queued(&self) -> Option<QueuedEvent> {
        let mut state = self.state.lock();
        let entry = state.entries.pop_front();
        state.stats.len = state.entries.len();
        entry
    }

    /// Remove the oldest entry, waiting for one to arrive
    ///
    /// `None` timeout waits until an event arrives or the queue is closed.
    pub fn pop_blocking(&self, timeout: Option<Duration>) -> Option<ChangeEvent> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();

        loop {
            if let Some(entry) = state.entries.pop_front() {
                state.stats.len = state.entries.len();
                return Some(entry.event);
            }
            if state.closed {
                return None;
            }

            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        let entry = state.entries.pop_front();
                        state.stats.len = state.entries.len();
                        return entry.map(|entry| entry.event);
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Remove every held entry
    pub fn drain_all(&self) -> Vec<ChangeEvent> {
        let mut state = self.state.lock();
        let events = state.entries.drain(..).map(|entry| entry.event).collect();
        state.stats.len = 0;
        events
    }

    /// Wake blocked drainers; further waits return once the queue is empty
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    fn modified(path: &str) -> ChangeEvent {
        ChangeEvent::Modified(PathBuf::from(path))
    }

    fn created(path: &str) -> ChangeEvent {
        ChangeEvent::Created(PathBuf::from(path))
    }

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new(8);
        queue.push(created("/w/a"));
        queue.push(created("/w/b"));

        assert_eq!(queue.pop(), Some(created("/w/a")));
        assert_eq!(queue.pop(), Some(created("/w/b")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_adjacent_modified_coalesces() {
        let queue = EventQueue::new(8);
        queue.push(modified("/w/a"));
        queue.push(modified("/w/a"));
        queue.push(modified("/w/a"));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().coalesced, 2);
    }

    #[test]
    fn test_non_adjacent_modified_kept() {
        let queue = EventQueue::new(8);
        queue.push(modified("/w/a"));
        queue.push(modified("/w/b"));
        queue.push(modified("/w/a"));

        assert_eq!(
            queue.drain_all(),
            vec![modified("/w/a"), modified("/w/b"), modified("/w/a")]
        );
    }

    #[test]
    fn test_created_then_modified_not_merged() {
        let queue = EventQueue::new(8);
        queue.push(created("/w/a"));
        queue.push(modified("/w/a"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_overflow_bounds_length() {
        let queue = EventQueue::new(10);
        for i in 0..10_000 {
            queue.push(created(&format!("/w/{}", i)));
            assert!(queue.len() <= 10);
        }

        let events = queue.drain_all();
        assert_eq!(events.len(), 10);
        assert_eq!(events[0], ChangeEvent::Overflow);
        assert_eq!(
            events.iter().filter(|event| event.is_overflow()).count(),
            1
        );
        // The newest events survive
        assert_eq!(events[9], created("/w/9999"));

        let stats = queue.stats();
        assert_eq!(stats.overflow_markers, 1);
        assert_eq!(stats.high_water, 10);
    }

    #[test]
    fn test_marker_reinserted_after_drain() {
        let queue = EventQueue::new(3);
        for i in 0..5 {
            queue.push(created(&format!("/w/{}", i)));
        }
        assert_eq!(queue.pop(), Some(ChangeEvent::Overflow));

        for i in 5..10 {
            queue.push(created(&format!("/w/{}", i)));
        }
        assert_eq!(queue.pop(), Some(ChangeEvent::Overflow));
        assert_eq!(queue.stats().overflow_markers, 2);
    }

    #[test]
    fn test_minimum_capacity() {
        let queue = EventQueue::new(0);
        assert_eq!(queue.capacity(), 2);

        queue.push(created("/w/a"));
        queue.push(created("/w/b"));
        queue.push(created("/w/c"));
        assert_eq!(queue.drain_all(), vec![ChangeEvent::Overflow, created("/w/c")]);
    }

    #[test]
    fn test_adjacent_overflow_collapses() {
        let queue = EventQueue::new(8);
        queue.push(ChangeEvent::Overflow);
        queue.push(ChangeEvent::Overflow);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let queue = EventQueue::new(8);
        queue.push_all(vec![created("/w/a"), created("/w/b")]);

        let first = queue.pop_queued().unwrap();
        let second = queue.pop_queued().unwrap();
        assert!(first.seq < second.seq);
    }

    #[test]
    fn test_pop_blocking_times_out() {
        let queue = EventQueue::new(8);
        let start = Instant::now();
        assert_eq!(queue.pop_blocking(Some(Duration::from_millis(30))), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_pop_blocking_wakes_on_push() {
        let queue = Arc::new(EventQueue::new(8));
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(created("/w/late"));
        });

        let event = queue.pop_blocking(Some(Duration::from_secs(5)));
        handle.join().unwrap();
        assert_eq!(event, Some(created("/w/late")));
    }

    #[test]
    fn test_close_wakes_waiters() {
        let queue = Arc::new(EventQueue::new(8));
        let closer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        assert_eq!(queue.pop_blocking(None), None);
        handle.join().unwrap();
        assert!(queue.is_closed());

        // Held events remain drainable after close
        queue.push(created("/w/a"));
        assert_eq!(queue.pop_blocking(None), Some(created("/w/a")));

        queue.reopen();
        assert!(!queue.is_closed());
    }
}
