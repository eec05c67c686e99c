use std::time::Duration;
use tokio::time::Instant;

/// A produced value tagged with the instant it entered the pool.
///
/// Timestamps come from `tokio::time`, so a paused test clock ages entries
/// exactly like the cleaning loop's timer.
#[derive(Debug)]
pub(crate) struct Entry<T> {
  value: T,
  created_at: Instant,
}

impl<T> Entry<T> {
  pub(crate) fn new(value: T) -> Self {
    Self::with_created_at(value, Instant::now())
  }

  pub(crate) fn with_created_at(value: T, created_at: Instant) -> Self {
    Self { value, created_at }
  }

  #[cfg(test)]
  pub(crate) fn value(&self) -> &T {
    &self.value
  }

  pub(crate) fn into_value(self) -> T {
    self.value
  }

  /// `true` while the entry's age does not exceed `lifetime`.
  /// `Duration::MAX` never expires.
  pub(crate) fn is_alive(&self, lifetime: Duration) -> bool {
    if lifetime == Duration::MAX {
      return true;
    }
    self.created_at.elapsed() <= lifetime
  }
}
