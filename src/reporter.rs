use crate::error::PoolError;

use fibre::mpsc::{self, RecvError, UnboundedAsyncReceiver, UnboundedSender};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Observer of pool lifecycle events. Every hook defaults to a no-op.
///
/// Hooks run on the pool's reporting runtime, one event at a time across all
/// observers of a pool, so a hook must not block for long.
pub trait EventReporter<T>: Send + Sync {
  /// A produced value was stored.
  fn on_add(&self, _value: &T) {}
  /// A stored value outlived the pool's lifetime and was evicted.
  fn on_clean(&self, _value: &T) {}
  /// A value was handed to a caller.
  fn on_poll(&self, _value: &T) {}
  /// Store size right after the add/clean/poll reported just before it.
  fn on_change_size(&self, _size: usize) {}
  /// Producing a value failed.
  fn on_error(&self, _error: &PoolError) {}
}

// --- Internal Message (crate-public) ---
#[derive(Debug)]
pub(crate) enum PoolEvent<T> {
  Added { value: T, size: usize },
  Polled { value: T, size: usize },
  Cleaned { value: T, size: usize },
  Failed(PoolError),
}

impl<T> PoolEvent<T> {
  fn deliver(&self, reporter: &dyn EventReporter<T>) {
    match self {
      PoolEvent::Added { value, size } => {
        reporter.on_add(value);
        reporter.on_change_size(*size);
      }
      PoolEvent::Polled { value, size } => {
        reporter.on_poll(value);
        reporter.on_change_size(*size);
      }
      PoolEvent::Cleaned { value, size } => {
        reporter.on_clean(value);
        reporter.on_change_size(*size);
      }
      PoolEvent::Failed(error) => reporter.on_error(error),
    }
  }

  fn kind(&self) -> &'static str {
    match self {
      PoolEvent::Added { .. } => "added",
      PoolEvent::Polled { .. } => "polled",
      PoolEvent::Cleaned { .. } => "cleaned",
      PoolEvent::Failed(_) => "failed",
    }
  }
}

type ReporterList<T> = Arc<Mutex<Vec<Arc<dyn EventReporter<T>>>>>;

fn same_reporter<T>(a: &Arc<dyn EventReporter<T>>, b: &Arc<dyn EventReporter<T>>) -> bool {
  std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Fan-out of pool events to the registered observers.
///
/// Events are queued in the order the pool emits them (the pool emits while it
/// still holds its store lock) and a single dispatcher task on the reporting
/// runtime drains the queue. The dispatcher starts with the first observer and
/// stops once the pool, and with it the last sender, is gone.
pub(crate) struct Reporting<T: Send + 'static> {
  reporters: ReporterList<T>,
  active: AtomicBool,
  event_tx: UnboundedSender<PoolEvent<T>>,
  init_once: Once,
  pending_rx: Mutex<Option<UnboundedAsyncReceiver<PoolEvent<T>>>>,
  report_handle: TokioHandle,
  pool_name: Arc<String>,
}

impl<T: Send + 'static> fmt::Debug for Reporting<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let reporter_count = self.reporters.try_lock().map_or(0, |guard| guard.len());
    f.debug_struct("Reporting")
      .field("pool_name", &self.pool_name)
      .field("reporter_count", &reporter_count)
      .field("dispatcher_started", &self.init_once.is_completed())
      .finish()
  }
}

impl<T: Send + 'static> Reporting<T> {
  pub(crate) fn new(report_handle: TokioHandle, pool_name: Arc<String>) -> Self {
    let (event_tx, event_rx) = mpsc::unbounded::<PoolEvent<T>>();
    Self {
      reporters: Arc::new(Mutex::new(Vec::new())),
      active: AtomicBool::new(false),
      event_tx,
      init_once: Once::new(),
      pending_rx: Mutex::new(Some(event_rx.to_async())),
      report_handle,
      pool_name,
    }
  }

  /// Whether anybody listens. Callers skip cloning values for events otherwise.
  pub(crate) fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }

  pub(crate) fn emit(&self, event: PoolEvent<T>) {
    if !self.is_active() {
      return;
    }
    let kind = event.kind();
    if self.event_tx.send(event).is_err() {
      warn!(pool_name = %*self.pool_name, event = kind, "Reporting: event queue closed, dropping event.");
    }
  }

  /// Adds an observer. Registering one that is already present is a no-op
  /// and returns `false`.
  pub(crate) fn register(&self, reporter: Arc<dyn EventReporter<T>>) -> bool {
    self.ensure_dispatcher_started();

    let mut reporters = self.reporters.lock();
    if reporters.iter().any(|registered| same_reporter(registered, &reporter)) {
      debug!(pool_name = %*self.pool_name, "Reporting: event reporter already registered.");
      return false;
    }
    reporters.push(reporter);
    self.active.store(true, Ordering::Release);
    info!(pool_name = %*self.pool_name, "Reporting: added event reporter. Total reporters: {}", reporters.len());
    true
  }

  pub(crate) fn unregister(&self, reporter: &Arc<dyn EventReporter<T>>) -> bool {
    let mut reporters = self.reporters.lock();
    let before = reporters.len();
    reporters.retain(|registered| !same_reporter(registered, reporter));
    self.active.store(!reporters.is_empty(), Ordering::Release);
    let removed = reporters.len() != before;
    debug!(pool_name = %*self.pool_name, removed, "Reporting: unregister requested. Total reporters: {}", reporters.len());
    removed
  }

  fn ensure_dispatcher_started(&self) {
    self.init_once.call_once(|| {
      let Some(event_rx) = self.pending_rx.lock().take() else {
        warn!(pool_name = %*self.pool_name, "Reporting: event receiver already taken, dispatcher not started.");
        return;
      };
      info!(pool_name = %*self.pool_name, "First event reporter registered. Starting event dispatcher.");
      self.report_handle.spawn(
        Self::run_dispatcher_loop(event_rx, self.reporters.clone())
          .instrument(info_span!("event_dispatcher", pool_name = %*self.pool_name)),
      );
    });
  }

  async fn run_dispatcher_loop(mut event_rx: UnboundedAsyncReceiver<PoolEvent<T>>, reporters: ReporterList<T>) {
    trace!("Event dispatcher started.");
    loop {
      match event_rx.recv().await {
        Ok(event) => Self::dispatch(&event, &reporters),
        Err(RecvError::Disconnected) => {
          info!("Event dispatcher: pool dropped its event queue. Terminating.");
          break;
        }
      }
    }
  }

  fn dispatch(event: &PoolEvent<T>, reporters: &ReporterList<T>) {
    // Holding the list lock serialises this event against registration
    // changes, so every observer sees the same event sequence.
    let reporters = reporters.lock();
    trace!(event = event.kind(), "Dispatching event to {} reporters.", reporters.len());
    for reporter in reporters.iter() {
      let outcome = catch_unwind(AssertUnwindSafe(|| event.deliver(reporter.as_ref())));
      if outcome.is_err() {
        error!(event = event.kind(), "An event reporter panicked while handling an event.");
      }
    }
  }
}
