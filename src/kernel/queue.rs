use super::{Event, SimTime};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap slot with the comparison flipped so `BinaryHeap` pops the
/// smallest `(time, priority, seq)` first.
struct Entry<M>(Event<M>);

impl<M> PartialEq for Entry<M> {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl<M> Eq for Entry<M> {}

impl<M> PartialOrd for Entry<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for Entry<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.key().cmp(&self.0.key())
    }
}

/// Min-priority queue of events.
///
/// Invalidated events stay in the heap and are counted by `len()` until
/// they are popped; the dispatch loop skips them.
pub struct EventQueue<M> {
    heap: BinaryHeap<Entry<M>>,
}

impl<M> Default for EventQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventQueue<M> {
    pub fn new() -> Self {
        EventQueue {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, event: Event<M>) {
        self.heap.push(Entry(event));
    }

    pub fn peek_min(&self) -> Option<&Event<M>> {
        self.heap.peek().map(|entry| &entry.0)
    }

    /// Time of the earliest entry, valid or not; `INFINITY` when empty.
    pub fn top_time(&self) -> SimTime {
        self.peek_min().map_or(SimTime::INFINITY, Event::time)
    }

    /// Remove the earliest entry.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty. Callers check `peek_min` first.
    pub fn pop_min(&mut self) -> Event<M> {
        match self.heap.pop() {
            Some(entry) => entry.0,
            None => panic!("pop_min on empty event queue"),
        }
    }

    pub fn invalidate(&self, event: &Event<M>) {
        event.invalidate();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
