//! Registry of callers blocked on a value, used to hand freshly produced values
//! straight to a waiter instead of parking them in the store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Something that may accept a handed-off value.
///
/// `try_claim` returns `Err(value)` to decline; the value comes back untouched
/// and the registry moves on to the next waiter.
pub trait Waiter<T>: Send + Sync {
  fn try_claim(&self, value: T) -> Result<(), T>;
}

impl<T, F> Waiter<T> for F
where
  F: Fn(T) -> Result<(), T> + Send + Sync,
{
  fn try_claim(&self, value: T) -> Result<(), T> {
    self(value)
  }
}

/// Matching order used when a value is offered to the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fairness {
  /// Waiters are tried in registration order, oldest first.
  #[default]
  Fair,
  /// No ordering guarantee between waiters. Duplicate registrations of the
  /// same waiter are counted instead of stored.
  Unfair,
}

type WaiterKey = usize;

fn key_of<W>(waiter: &Arc<W>) -> WaiterKey {
  Arc::as_ptr(waiter) as *const () as usize
}

/// Registrations in arrival order. `order` is the arena keyed by a monotonic
/// sequence number; `by_waiter` indexes each waiter's outstanding sequence
/// numbers so cancellation does not scan the queue.
struct FairSlots<W> {
  next_seq: u64,
  order: BTreeMap<u64, Arc<W>>,
  by_waiter: HashMap<WaiterKey, VecDeque<u64>>,
}

impl<W> FairSlots<W> {
  fn new() -> Self {
    Self {
      next_seq: 0,
      order: BTreeMap::new(),
      by_waiter: HashMap::new(),
    }
  }

  fn push(&mut self, waiter: Arc<W>) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.by_waiter.entry(key_of(&waiter)).or_default().push_back(seq);
    self.order.insert(seq, waiter);
  }

  fn pop_oldest(&mut self) -> Option<Arc<W>> {
    let (_, waiter) = self.order.pop_first()?;
    let key = key_of(&waiter);
    if let Some(seqs) = self.by_waiter.get_mut(&key) {
      // Sequence numbers only grow, so the globally oldest registration is
      // also the oldest one of its waiter.
      seqs.pop_front();
      if seqs.is_empty() {
        self.by_waiter.remove(&key);
      }
    }
    Some(waiter)
  }

  fn remove_one(&mut self, key: WaiterKey) -> bool {
    let Some(seqs) = self.by_waiter.get_mut(&key) else {
      return false;
    };
    let removed = seqs.pop_front().and_then(|seq| self.order.remove(&seq)).is_some();
    if seqs.is_empty() {
      self.by_waiter.remove(&key);
    }
    removed
  }
}

enum Slots<W> {
  Fair(FairSlots<W>),
  Unfair(HashMap<WaiterKey, (Arc<W>, usize)>),
}

/// Pending waiters plus the matching policy chosen at construction.
///
/// The registry is not synchronised itself; the pool keeps it behind the same
/// lock as the store so that "hand to a waiter" and "insert into the store"
/// form one decision.
pub struct WaiterRegistry<T, W> {
  slots: Slots<W>,
  len: usize,
  _value: PhantomData<fn(T)>,
}

impl<T, W> fmt::Debug for WaiterRegistry<T, W> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WaiterRegistry")
      .field("fairness", &self.fairness())
      .field("len", &self.len)
      .finish()
  }
}

impl<T, W> WaiterRegistry<T, W> {
  pub fn fairness(&self) -> Fairness {
    match self.slots {
      Slots::Fair(_) => Fairness::Fair,
      Slots::Unfair(_) => Fairness::Unfair,
    }
  }

  /// Number of outstanding registrations, duplicates included.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

impl<T: Clone, W: Waiter<T>> WaiterRegistry<T, W> {
  pub fn new(fairness: Fairness) -> Self {
    let slots = match fairness {
      Fairness::Fair => Slots::Fair(FairSlots::new()),
      Fairness::Unfair => Slots::Unfair(HashMap::new()),
    };
    Self {
      slots,
      len: 0,
      _value: PhantomData,
    }
  }

  /// Adds one registration. Registering the same waiter again is not
  /// coalesced: it can then win up to that many values.
  pub fn register(&mut self, waiter: Arc<W>) {
    match &mut self.slots {
      Slots::Fair(fair) => fair.push(waiter),
      Slots::Unfair(set) => {
        set.entry(key_of(&waiter)).or_insert_with(|| (waiter, 0)).1 += 1;
      }
    }
    self.len += 1;
  }

  /// Withdraws a pending registration and reports whether one was removed.
  ///
  /// In `Fair` mode this removes the waiter's oldest single registration. In
  /// `Unfair` mode it removes every outstanding copy at once.
  pub fn unregister(&mut self, waiter: &Arc<W>) -> bool {
    let key = key_of(waiter);
    match &mut self.slots {
      Slots::Fair(fair) => {
        let removed = fair.remove_one(key);
        if removed {
          self.len -= 1;
        }
        removed
      }
      Slots::Unfair(set) => match set.remove(&key) {
        Some((_, copies)) => {
          self.len -= copies;
          true
        }
        None => false,
      },
    }
  }

  /// Tries to hand `value` to one pending waiter.
  ///
  /// Waiters that decline are dropped from the registry and never retried
  /// ahead of newer ones; in `Unfair` mode that drops all of their copies.
  /// When nobody takes the value it is returned.
  ///
  /// A waiter that panics inside `try_claim` counts as a decline. The value
  /// it was handed is lost with the unwind, so each attempt works on a clone
  /// and the original moves on to the next waiter.
  pub fn offer(&mut self, mut value: T) -> Result<(), T> {
    match &mut self.slots {
      Slots::Fair(fair) => {
        while let Some(waiter) = fair.pop_oldest() {
          self.len -= 1;
          match claim(waiter.as_ref(), value) {
            Ok(()) => return Ok(()),
            Err(declined) => value = declined,
          }
        }
        Err(value)
      }
      Slots::Unfair(set) => loop {
        let Some((&key, (waiter, _))) = set.iter().next() else {
          return Err(value);
        };
        let waiter = waiter.clone();
        match claim(waiter.as_ref(), value) {
          Ok(()) => {
            let remove_entry = match set.get_mut(&key) {
              Some((_, copies)) => {
                *copies -= 1;
                *copies == 0
              }
              None => false,
            };
            if remove_entry {
              set.remove(&key);
            }
            self.len -= 1;
            return Ok(());
          }
          Err(declined) => {
            value = declined;
            if let Some((_, copies)) = set.remove(&key) {
              self.len -= copies;
            }
          }
        }
      },
    }
  }

  /// Drops every registration.
  pub fn clear(&mut self) {
    match &mut self.slots {
      Slots::Fair(fair) => *fair = FairSlots::new(),
      Slots::Unfair(set) => set.clear(),
    }
    self.len = 0;
  }
}

fn claim<T: Clone, W: Waiter<T>>(waiter: &W, value: T) -> Result<(), T> {
  let fallback = value.clone();
  match catch_unwind(AssertUnwindSafe(|| waiter.try_claim(value))) {
    Ok(outcome) => outcome,
    Err(_panic_payload) => {
      warn!("Waiter panicked while claiming a value; treating it as a decline.");
      Err(fallback)
    }
  }
}
