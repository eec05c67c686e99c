use crate::entry::Entry;

use std::collections::VecDeque;
use std::time::Duration;

/// Oldest-first container of entries that never holds more than `capacity`.
///
/// The store has no lock of its own; the pool mutates it only while holding
/// the section that also guards the waiter registry.
#[derive(Debug)]
pub(crate) struct BoundedStore<T> {
  entries: VecDeque<Entry<T>>,
  capacity: usize,
}

impl<T> BoundedStore<T> {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      entries: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  pub(crate) fn is_full(&self) -> bool {
    self.entries.len() >= self.capacity
  }

  /// Appends `entry` at the back. A full store hands the entry back.
  pub(crate) fn insert_back(&mut self, entry: Entry<T>) -> Result<(), Entry<T>> {
    if self.is_full() {
      return Err(entry);
    }
    self.entries.push_back(entry);
    Ok(())
  }

  pub(crate) fn remove_front(&mut self) -> Option<Entry<T>> {
    self.entries.pop_front()
  }

  pub(crate) fn peek_front(&self) -> Option<&Entry<T>> {
    self.entries.front()
  }

  /// Removes the expired prefix of the store and passes each removed entry,
  /// together with the size right after its removal, to `on_removed`.
  ///
  /// Scanning stops at the first entry that is still alive. Producers may
  /// finish out of order, so an expired entry sitting behind a fresher one
  /// survives until the fresher one expires too.
  pub(crate) fn evict_expired(&mut self, lifetime: Duration, mut on_removed: impl FnMut(Entry<T>, usize)) -> usize {
    let mut removed = 0;
    while self.peek_front().is_some_and(|entry| !entry.is_alive(lifetime)) {
      if let Some(entry) = self.remove_front() {
        removed += 1;
        on_removed(entry, self.entries.len());
      }
    }
    removed
  }

  pub(crate) fn drain(&mut self) -> impl Iterator<Item = Entry<T>> + '_ {
    self.entries.drain(..)
  }
}
