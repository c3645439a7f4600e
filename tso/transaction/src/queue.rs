//! A FIFO queue with efficient random deletes.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// A FIFO queue where arbitrary-element deletion is far more common than
/// traversal. Deleting a non-head element records a tombstone instead of
/// scanning the queue; the deletion is applied lazily once the element
/// reaches the head. The head is always live (never tombstoned).
///
/// Elements are compared by content equality, both against the head and in
/// the tombstone set.
#[derive(Debug)]
pub struct DeleteEfficientQueue<E> {
    queue: VecDeque<E>,
    deleted: HashSet<E>,
}

impl<E: Eq + Hash> DeleteEfficientQueue<E> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            deleted: HashSet::new(),
        }
    }

    /// Append an element to the tail.
    pub fn offer(&mut self, e: E) {
        self.queue.push_back(e);
    }

    /// Returns the current head without removing it.
    pub fn peek(&self) -> Option<&E> {
        self.queue.front()
    }

    /// Returns true if there is no live head.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove and return the head, then drop any tombstoned elements that
    /// surface behind it so the new head is live.
    pub fn poll(&mut self) -> Option<E> {
        let top = self.queue.pop_front();
        self.garbage_collect_tops();
        top
    }

    /// Delete an element. If it is the current head it is removed physically
    /// (followed by the same tombstone sweep as [`DeleteEfficientQueue::poll`]);
    /// otherwise a tombstone is recorded and the element is skipped once it
    /// reaches the head.
    ///
    /// # Panics
    ///
    /// Panics if the queue has no live head. Callers only delete elements
    /// they previously offered, so an empty queue here is a programmer error.
    pub fn delete(&mut self, e: E) {
        match self.queue.front() {
            None => panic!("delete on a queue with no live head"),
            Some(top) if *top == e => {
                self.queue.pop_front();
                self.garbage_collect_tops();
            }
            Some(_) => {
                self.deleted.insert(e);
            }
        }
    }

    /// Empty both the queue and the tombstone set.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.deleted.clear();
    }

    // Pop tombstoned heads until the head is live or the queue is empty.
    fn garbage_collect_tops(&mut self) {
        while let Some(top) = self.queue.front() {
            if !self.deleted.contains(top) {
                break;
            }
            if let Some(top) = self.queue.pop_front() {
                self.deleted.remove(&top);
            }
        }
    }
}

impl<E: Eq + Hash> Default for DeleteEfficientQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
