//! Ordered event buffer
//!
//! Insertion order is delivery order. A requeue puts failed events back at
//! the head, ahead of anything admitted since the failed batch was taken.

use std::collections::VecDeque;

use crate::types::Event;

#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<Event>,
    batch_size: usize,
}

impl EventBuffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Append an event; returns true once the buffer holds a full batch
    pub fn push(&mut self, event: Event) -> bool {
        self.events.push_back(event);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.batch_size
    }

    /// Snapshot and clear the buffer. Returns `None` when empty.
    pub fn take_batch(&mut self) -> Option<Vec<Event>> {
        if self.events.is_empty() {
            return None;
        }
        Some(self.events.drain(..).collect())
    }

    /// Put up to `limit` of `failed` back at the head, keeping their order.
    ///
    /// Returns `(requeued, dropped)`.
    pub fn requeue_front(&mut self, failed: Vec<Event>, limit: usize) -> (usize, usize) {
        let total = failed.len();
        let requeued = total.min(limit);
        for event in failed.into_iter().take(requeued).rev() {
            self.events.push_front(event);
        }
        (requeued, total - requeued)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Drop everything still buffered, returning how many events were lost
    pub fn discard(&mut self) -> usize {
        let lost = self.events.len();
        self.events.clear();
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartialEvent;
    use chrono::Utc;

    fn event(name: &str) -> Event {
        Event::new(PartialEvent::interaction(name), Utc::now())
    }

    fn names(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[test]
    fn test_push_reports_full_batch() {
        let mut buffer = EventBuffer::new(3);
        assert!(!buffer.push(event("a")));
        assert!(!buffer.push(event("b")));
        assert!(buffer.push(event("c")));
    }

    #[test]
    fn test_take_batch_clears() {
        let mut buffer = EventBuffer::new(3);
        assert!(buffer.take_batch().is_none());

        buffer.push(event("a"));
        buffer.push(event("b"));
        let batch = buffer.take_batch().unwrap();
        assert_eq!(names(&batch), vec!["a", "b"]);
        assert!(buffer.is_empty());
        assert!(buffer.take_batch().is_none());
    }

    #[test]
    fn test_requeue_goes_ahead_of_newer_events() {
        let mut buffer = EventBuffer::new(10);
        buffer.push(event("a"));
        buffer.push(event("b"));
        let failed = buffer.take_batch().unwrap();

        buffer.push(event("c"));
        let (requeued, dropped) = buffer.requeue_front(failed, 10);
        assert_eq!((requeued, dropped), (2, 0));
        assert_eq!(names(&buffer.snapshot()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_requeue_respects_limit() {
        let mut buffer = EventBuffer::new(2);
        let failed = vec![event("a"), event("b"), event("c")];
        let (requeued, dropped) = buffer.requeue_front(failed, 2);
        assert_eq!((requeued, dropped), (2, 1));
        assert_eq!(names(&buffer.snapshot()), vec!["a", "b"]);
    }

    #[test]
    fn test_discard() {
        let mut buffer = EventBuffer::new(2);
        buffer.push(event("a"));
        assert_eq!(buffer.discard(), 1);
        assert!(buffer.is_empty());
    }
}
