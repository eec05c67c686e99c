use crate::config::{PoolBuilder, PoolConfig};
use crate::entry::Entry;
use crate::error::PoolError;
use crate::handoff::{HandoffWaiter, PendingTake};
use crate::provider::ValueProvider;
use crate::reporter::{EventReporter, PoolEvent, Reporting};
use crate::store::BoundedStore;
use crate::waiters::{Fairness, WaiterRegistry};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, debug_span, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Retrieval operations shared by pools of values.
#[async_trait]
pub trait Pool<T>: Send + Sync {
  /// Removes and returns a value if one is ready, without waiting.
  async fn poll(&self) -> Result<Option<T>, PoolError>;

  /// Removes and returns a value, waiting until one becomes available.
  async fn take(&self) -> Result<T, PoolError>;
}

/// Store and waiter registry. They share one lock so a produced value is
/// either handed to a waiter or stored, never both and never neither.
pub(crate) struct Shared<T> {
  store: BoundedStore<T>,
  waiters: WaiterRegistry<T, HandoffWaiter<T>>,
}

pub(crate) enum Acquire<T: Clone + Send + 'static> {
  Ready(T),
  Pending(PendingTake<T>),
  Closed,
}

pub(crate) struct PoolInner<T: Clone + Send + 'static> {
  pool_name: Arc<String>,
  capacity: usize,
  lifetime: Duration,
  clean_interval: Duration,
  provider: Arc<dyn ValueProvider<T>>,
  shared: Mutex<Shared<T>>,
  reporting: Reporting<T>,
  work_handle: TokioHandle,
  tracker: TaskTracker,
  shutdown_token: CancellationToken,
}

impl<T: Clone + Send + 'static> PoolInner<T> {
  pub(crate) fn name(&self) -> &str {
    &self.pool_name
  }

  pub(crate) fn shutdown_token(&self) -> &CancellationToken {
    &self.shutdown_token
  }

  fn report_copy(&self, value: &T) -> Option<T> {
    self.reporting.is_active().then(|| value.clone())
  }

  /// Schedules one production task on the work runtime. No-op after shutdown.
  fn spawn_production(self: &Arc<Self>) {
    if self.shutdown_token.is_cancelled() {
      trace!(pool_name = %*self.pool_name, "Pool is shut down, production not scheduled.");
      return;
    }
    self.tracker.spawn_on(
      self
        .clone()
        .produce()
        .instrument(debug_span!("production_task", pool_name = %*self.pool_name)),
      &self.work_handle,
    );
  }

  async fn produce(self: Arc<Self>) {
    let attempt = AssertUnwindSafe(async { self.provider.provide().await }).catch_unwind();
    let outcome = tokio::select! {
      biased;
      _ = self.shutdown_token.cancelled() => {
        trace!(pool_name = %*self.pool_name, "Production abandoned due to shutdown.");
        return;
      }
      outcome = attempt => outcome,
    };

    match outcome {
      Ok(Ok(value)) => self.accept(value),
      Ok(Err(cause)) => {
        warn!(pool_name = %*self.pool_name, "Value provider failed: {}", cause);
        self.reporting.emit(PoolEvent::Failed(PoolError::ProductionFailed(cause.to_string())));
      }
      Err(_panic_payload) => {
        error!(pool_name = %*self.pool_name, "Value provider panicked.");
        self.reporting.emit(PoolEvent::Failed(PoolError::ProductionPanicked));
      }
    }
  }

  /// Places a fresh value: the first willing waiter gets it, otherwise it is
  /// appended to the store.
  fn accept(&self, value: T) {
    let mut shared = self.shared.lock();
    if self.shutdown_token.is_cancelled() {
      trace!(pool_name = %*self.pool_name, "Pool is shut down, dropping produced value.");
      return;
    }

    let copy = self.report_copy(&value);
    let value = match shared.waiters.offer(value) {
      Ok(()) => {
        let size = shared.store.len();
        debug!(pool_name = %*self.pool_name, size, "Produced value handed off to a waiter.");
        if let Some(value) = copy {
          self.reporting.emit(PoolEvent::Polled { value, size });
        }
        return;
      }
      Err(value) => value,
    };

    // Every value in flight owns a slot, so the store cannot be full here.
    debug_assert!(!shared.store.is_full(), "produced value had no free slot in the store");
    match shared.store.insert_back(Entry::new(value)) {
      Ok(()) => {
        let size = shared.store.len();
        debug!(pool_name = %*self.pool_name, size, "Produced value stored.");
        if let Some(value) = copy {
          self.reporting.emit(PoolEvent::Added { value, size });
        }
      }
      Err(_rejected) => {
        warn!(
          pool_name = %*self.pool_name,
          capacity = self.capacity,
          "Store already full, discarding produced value."
        );
        self.reporting.emit(PoolEvent::Failed(PoolError::CapacityExceeded(self.capacity)));
      }
    }
  }

  /// Gives a value back after its waiter went away without observing it.
  pub(crate) fn reclaim(&self, value: T) {
    self.accept(value);
  }

  fn poll_now(self: &Arc<Self>) -> Option<T> {
    let value = {
      let mut shared = self.shared.lock();
      let value = shared.store.remove_front()?.into_value();
      self.emit_polled(&shared, &value);
      value
    };
    self.spawn_production();
    Some(value)
  }

  pub(crate) fn acquire(self: &Arc<Self>) -> Acquire<T> {
    let mut shared = self.shared.lock();
    if self.shutdown_token.is_cancelled() {
      return Acquire::Closed;
    }
    if let Some(entry) = shared.store.remove_front() {
      let value = entry.into_value();
      self.emit_polled(&shared, &value);
      drop(shared);
      self.spawn_production();
      return Acquire::Ready(value);
    }

    let (waiter, receiver) = HandoffWaiter::channel();
    shared.waiters.register(waiter.clone());
    trace!(pool_name = %*self.pool_name, waiting = shared.waiters.len(), "Store empty, registered waiter.");
    Acquire::Pending(PendingTake::new(self.clone(), waiter, receiver))
  }

  /// Schedules the replacement for a value a waiter has actually received.
  /// The poll event was already emitted when the value was matched.
  pub(crate) fn complete_handoff(self: &Arc<Self>) {
    self.spawn_production();
  }

  /// Removes a pending registration. `false` means it was already matched or
  /// cleared by shutdown.
  pub(crate) fn withdraw(&self, waiter: &Arc<HandoffWaiter<T>>) -> bool {
    self.shared.lock().waiters.unregister(waiter)
  }

  fn emit_polled(&self, shared: &Shared<T>, value: &T) {
    let size = shared.store.len();
    trace!(pool_name = %*self.pool_name, size, "Value served.");
    if let Some(value) = self.report_copy(value) {
      self.reporting.emit(PoolEvent::Polled { value, size });
    }
  }

  /// Evicts the expired front of the store and returns how many entries went.
  fn clean(&self) -> usize {
    let mut shared = self.shared.lock();
    let reporting = &self.reporting;
    let report = reporting.is_active();
    let removed = shared.store.evict_expired(self.lifetime, |entry, size| {
      if report {
        reporting.emit(PoolEvent::Cleaned {
          value: entry.into_value(),
          size,
        });
      }
    });
    if removed > 0 {
      debug!(pool_name = %*self.pool_name, removed, size = shared.store.len(), "Evicted expired values.");
    }
    removed
  }

  async fn run_cleaning_loop(self: Arc<Self>) {
    info!(pool_name = %*self.pool_name, interval = ?self.clean_interval, "Cleaning loop started.");
    loop {
      let removed = self.clean();
      for _ in 0..removed {
        self.spawn_production();
      }

      tokio::select! {
        biased;
        _ = self.shutdown_token.cancelled() => {
          info!(pool_name = %*self.pool_name, "Shutdown signal received. Cleaning loop terminating.");
          break;
        }
        _ = tokio::time::sleep(self.clean_interval) => {}
      }
    }
  }

  fn cancel(&self) -> bool {
    if self.shutdown_token.is_cancelled() {
      return false;
    }
    let mut shared = self.shared.lock();
    self.shutdown_token.cancel();
    self.tracker.close();
    let waiting = shared.waiters.len();
    shared.waiters.clear();
    let stored: Vec<Entry<T>> = shared.store.drain().collect();
    drop(shared);
    info!(
      pool_name = %*self.pool_name,
      waiting,
      stored = stored.len(),
      "Pool cancelled: background work stopped, waiters released."
    );
    true
  }
}

/// A bounded, self-replenishing pool of values that expire after a lifetime.
///
/// On construction the pool schedules `capacity` production tasks and a
/// periodic cleaning loop on its work runtime. Every value handed out and every
/// value evicted triggers exactly one replacement production. A `take` that
/// finds the pool empty waits for the next produced value, which is handed to
/// it directly without passing through the store.
///
/// Dropping the pool cancels it.
pub struct LifetimePool<T: Clone + Send + 'static> {
  inner: Arc<PoolInner<T>>,
}

impl<T: Clone + Send + 'static> fmt::Debug for LifetimePool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LifetimePool")
      .field("name", &self.inner.pool_name)
      .field("capacity", &self.inner.capacity)
      .field("lifetime", &self.inner.lifetime)
      .field("size", &self.size())
      .field("waiting", &self.waiting())
      .field("cancelled", &self.is_cancelled())
      .field("reporting", &self.inner.reporting)
      .finish()
  }
}

impl<T: Clone + Send + 'static> LifetimePool<T> {
  /// Lifetime value that disables eviction.
  pub const INFINITE_LIFETIME: Duration = Duration::MAX;

  /// Starts building a pool of `capacity` values produced by `provider`.
  pub fn builder(capacity: usize, provider: impl ValueProvider<T>) -> PoolBuilder<T> {
    PoolBuilder::new(capacity, Arc::new(provider))
  }

  /// Builds a pool with default options on the current Tokio runtime.
  pub fn new(capacity: usize, lifetime: Duration, provider: impl ValueProvider<T>) -> Result<Self, PoolError> {
    Self::builder(capacity, provider).lifetime(lifetime).build()
  }

  pub(crate) fn start(
    config: PoolConfig,
    provider: Arc<dyn ValueProvider<T>>,
    work_handle: TokioHandle,
    report_handle: TokioHandle,
  ) -> Self {
    let pool_id = NEXT_POOL_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let pool_name = Arc::new(config.name.unwrap_or_else(|| format!("lifetime_pool-{}", pool_id)));

    let inner = Arc::new(PoolInner {
      pool_name: pool_name.clone(),
      capacity: config.capacity,
      lifetime: config.lifetime,
      clean_interval: config.clean_interval,
      provider,
      shared: Mutex::new(Shared {
        store: BoundedStore::new(config.capacity),
        waiters: WaiterRegistry::new(config.fairness),
      }),
      reporting: Reporting::new(report_handle, pool_name.clone()),
      work_handle,
      tracker: TaskTracker::new(),
      shutdown_token: CancellationToken::new(),
    });

    info!(
      pool_name = %*pool_name,
      capacity = config.capacity,
      lifetime = ?config.lifetime,
      fairness = ?config.fairness,
      "Starting pool."
    );

    for _ in 0..config.capacity {
      inner.spawn_production();
    }
    inner.tracker.spawn_on(
      inner
        .clone()
        .run_cleaning_loop()
        .instrument(info_span!("cleaning_loop", pool_name = %*pool_name)),
      &inner.work_handle,
    );

    Self { inner }
  }

  pub fn name(&self) -> &str {
    &self.inner.pool_name
  }

  pub fn capacity(&self) -> usize {
    self.inner.capacity
  }

  pub fn lifetime(&self) -> Duration {
    self.inner.lifetime
  }

  pub fn fairness(&self) -> Fairness {
    self.inner.shared.lock().waiters.fairness()
  }

  /// Number of values currently stored and ready to be served.
  pub fn size(&self) -> usize {
    self.inner.shared.lock().store.len()
  }

  /// Number of `take` calls currently waiting for a value.
  pub fn waiting(&self) -> usize {
    self.inner.shared.lock().waiters.len()
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.shutdown_token.is_cancelled()
  }

  /// Removes and returns the oldest stored value, or `None` if the store is
  /// empty. Never waits and never competes with pending `take` calls.
  pub fn poll(&self) -> Result<Option<T>, PoolError> {
    if self.is_cancelled() {
      return Err(PoolError::PoolShutDown);
    }
    Ok(self.inner.poll_now())
  }

  /// Removes and returns the oldest stored value, waiting for the next
  /// produced one if the store is empty.
  ///
  /// Dropping the returned future stops waiting without losing any value.
  /// Resolves to [`PoolError::Cancelled`] if the pool is cancelled meanwhile.
  pub async fn take(&self) -> Result<T, PoolError> {
    match self.inner.acquire() {
      Acquire::Ready(value) => Ok(value),
      Acquire::Pending(pending) => {
        trace!(pool_name = %*self.inner.pool_name, "Waiting for a produced value.");
        pending.wait().await
      }
      Acquire::Closed => Err(PoolError::PoolShutDown),
    }
  }

  /// Like [`take`](Self::take) but gives up after `timeout`, returning
  /// `Ok(None)`. A zero timeout behaves like [`poll`](Self::poll).
  pub async fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, PoolError> {
    if timeout.is_zero() {
      return self.poll();
    }
    match tokio::time::timeout(timeout, self.take()).await {
      Ok(taken) => taken.map(Some),
      Err(_elapsed) => {
        trace!(pool_name = %*self.inner.pool_name, ?timeout, "Timed out waiting for a value.");
        Ok(None)
      }
    }
  }

  /// Adds a reporter. Returns `false` if the same `Arc` is already registered.
  pub fn register_event_reporter(&self, reporter: Arc<dyn EventReporter<T>>) -> bool {
    self.inner.reporting.register(reporter)
  }

  /// Removes a reporter previously registered with the same `Arc`.
  pub fn unregister_event_reporter(&self, reporter: &Arc<dyn EventReporter<T>>) -> bool {
    self.inner.reporting.unregister(reporter)
  }

  /// Stops production and cleaning and resolves every waiting `take` with
  /// [`PoolError::Cancelled`]. Later calls fail with [`PoolError::PoolShutDown`].
  pub fn cancel(&self) {
    if !self.inner.cancel() {
      trace!(pool_name = %*self.inner.pool_name, "Cancel requested on an already cancelled pool.");
    }
  }

  /// Cancels the pool and waits until every background task has finished.
  pub async fn shutdown(self) {
    self.cancel();
    info!(pool_name = %*self.inner.pool_name, "Waiting for background tasks to finish.");
    self.inner.tracker.wait().await;
    info!(pool_name = %*self.inner.pool_name, "Pool shutdown completed.");
  }
}

#[async_trait]
impl<T: Clone + Send + 'static> Pool<T> for LifetimePool<T> {
  async fn poll(&self) -> Result<Option<T>, PoolError> {
    LifetimePool::poll(self)
  }

  async fn take(&self) -> Result<T, PoolError> {
    LifetimePool::take(self).await
  }
}

impl<T: Clone + Send + 'static> Drop for LifetimePool<T> {
  fn drop(&mut self) {
    if self.inner.cancel() {
      debug!(pool_name = %*self.inner.pool_name, "LifetimePool dropped. Implicitly cancelled.");
    }
  }
}
