use crate::error::PoolError;
use crate::pool::PoolInner;
use crate::waiters::Waiter;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

/// Registry entry of one blocked `take`. Claiming sends the value through a
/// oneshot channel whose receiver lives in the matching [`PendingTake`].
pub(crate) struct HandoffWaiter<T> {
  sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> fmt::Debug for HandoffWaiter<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandoffWaiter")
      .field("claimed", &self.sender.lock().is_none())
      .finish()
  }
}

impl<T> HandoffWaiter<T> {
  pub(crate) fn channel() -> (Arc<Self>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    let waiter = Arc::new(Self {
      sender: Mutex::new(Some(tx)),
    });
    (waiter, rx)
  }
}

impl<T: Send> Waiter<T> for HandoffWaiter<T> {
  fn try_claim(&self, value: T) -> Result<(), T> {
    match self.sender.lock().take() {
      Some(tx) => tx.send(value),
      None => Err(value),
    }
  }
}

enum Wake<T> {
  Received(Result<T, oneshot::error::RecvError>),
  Shutdown,
}

/// A `take` that found the store empty and registered a waiter.
///
/// Dropping it before it resolves (timeout, caller cancellation) withdraws the
/// registration under the store lock. If a producer matched the waiter first,
/// the value already sits in the channel and is given back to the pool rather
/// than dropped.
pub(crate) struct PendingTake<T: Clone + Send + 'static> {
  pool: Arc<PoolInner<T>>,
  waiter: Arc<HandoffWaiter<T>>,
  receiver: Option<oneshot::Receiver<T>>,
}

impl<T: Clone + Send + 'static> PendingTake<T> {
  pub(crate) fn new(pool: Arc<PoolInner<T>>, waiter: Arc<HandoffWaiter<T>>, receiver: oneshot::Receiver<T>) -> Self {
    Self {
      pool,
      waiter,
      receiver: Some(receiver),
    }
  }

  pub(crate) async fn wait(mut self) -> Result<T, PoolError> {
    let shutdown_token = self.pool.shutdown_token().clone();
    let Some(receiver) = self.receiver.as_mut() else {
      return Err(PoolError::Cancelled);
    };

    let wake = tokio::select! {
      biased;
      received = &mut *receiver => Wake::Received(received),
      _ = shutdown_token.cancelled() => Wake::Shutdown,
    };
    let value = match wake {
      Wake::Received(received) => received.ok(),
      // A value matched right before shutdown still belongs to this caller.
      Wake::Shutdown => receiver.try_recv().ok(),
    };
    self.receiver = None;

    match value {
      Some(value) => {
        self.pool.complete_handoff();
        Ok(value)
      }
      None => {
        trace!(pool_name = %self.pool.name(), "Pending take resolved by pool shutdown.");
        Err(PoolError::Cancelled)
      }
    }
  }
}

impl<T: Clone + Send + 'static> Drop for PendingTake<T> {
  fn drop(&mut self) {
    let Some(mut receiver) = self.receiver.take() else {
      return;
    };
    if self.pool.withdraw(&self.waiter) {
      trace!(pool_name = %self.pool.name(), "Pending take abandoned before a value arrived.");
      return;
    }
    // The registry no longer holds the waiter, so a producer already sent a
    // value (under the store lock) or the pool cleared it on shutdown.
    if let Ok(value) = receiver.try_recv() {
      trace!(pool_name = %self.pool.name(), "Pending take abandoned after a match; returning value to the pool.");
      self.pool.reclaim(value);
    }
  }
}
