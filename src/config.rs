use crate::error::PoolError;
use crate::pool::LifetimePool;
use crate::provider::ValueProvider;
use crate::waiters::Fairness;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle as TokioHandle;

/// Period of the background pass that evicts expired values.
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Plain construction options of a [`LifetimePool`].
///
/// # Examples
///
/// ```
/// use lifetime_pool::{Fairness, PoolConfig};
/// use std::time::Duration;
///
/// let config = PoolConfig::new(8)
///   .with_lifetime(Duration::from_secs(30))
///   .with_fairness(Fairness::Unfair);
///
/// assert_eq!(config.capacity, 8);
/// assert_eq!(config.clean_interval, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Number of values the pool keeps ready.
  pub capacity: usize,
  /// Maximum age of a stored value. `Duration::MAX` disables eviction.
  pub lifetime: Duration,
  pub clean_interval: Duration,
  pub fairness: Fairness,
  /// Name used in log records. Generated when absent.
  pub name: Option<String>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      capacity: 0,
      lifetime: Duration::MAX,
      clean_interval: DEFAULT_CLEAN_INTERVAL,
      fairness: Fairness::Fair,
      name: None,
    }
  }
}

impl PoolConfig {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      ..Self::default()
    }
  }

  pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
    self.lifetime = lifetime;
    self
  }

  pub fn with_clean_interval(mut self, clean_interval: Duration) -> Self {
    self.clean_interval = clean_interval;
    self
  }

  pub fn with_fairness(mut self, fairness: Fairness) -> Self {
    self.fairness = fairness;
    self
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn validate(&self) -> Result<(), PoolError> {
    if self.clean_interval.is_zero() {
      return Err(PoolError::ZeroCleanInterval);
    }
    Ok(())
  }
}

/// Fluent builder for a [`LifetimePool`], created by [`LifetimePool::builder`].
pub struct PoolBuilder<T> {
  pub(crate) config: PoolConfig,
  pub(crate) provider: Arc<dyn ValueProvider<T>>,
  pub(crate) work_handle: Option<TokioHandle>,
  pub(crate) report_handle: Option<TokioHandle>,
}

impl<T> fmt::Debug for PoolBuilder<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolBuilder")
      .field("config", &self.config)
      .field("work_handle_is_some", &self.work_handle.is_some())
      .field("report_handle_is_some", &self.report_handle.is_some())
      .finish_non_exhaustive()
  }
}

impl<T: Clone + Send + 'static> PoolBuilder<T> {
  pub(crate) fn new(capacity: usize, provider: Arc<dyn ValueProvider<T>>) -> Self {
    Self {
      config: PoolConfig::new(capacity),
      provider,
      work_handle: None,
      report_handle: None,
    }
  }

  /// Replaces every option at once, keeping the provider and handles.
  pub fn config(mut self, config: PoolConfig) -> Self {
    self.config = config;
    self
  }

  pub fn lifetime(mut self, lifetime: Duration) -> Self {
    self.config.lifetime = lifetime;
    self
  }

  pub fn clean_interval(mut self, clean_interval: Duration) -> Self {
    self.config.clean_interval = clean_interval;
    self
  }

  pub fn fairness(mut self, fairness: Fairness) -> Self {
    self.config.fairness = fairness;
    self
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.config.name = Some(name.into());
    self
  }

  /// Runtime that runs production tasks and the cleaning loop.
  pub fn work_handle(mut self, handle: TokioHandle) -> Self {
    self.work_handle = Some(handle);
    self
  }

  /// Runtime that runs event reporter callbacks.
  pub fn report_handle(mut self, handle: TokioHandle) -> Self {
    self.report_handle = Some(handle);
    self
  }

  /// Validates the options and starts the pool: `capacity` production tasks
  /// and the cleaning loop are scheduled before this returns.
  pub fn build(self) -> Result<LifetimePool<T>, PoolError> {
    self.config.validate()?;
    let work_handle = match self.work_handle {
      Some(handle) => handle,
      None => TokioHandle::try_current().map_err(|_| PoolError::NoRuntime)?,
    };
    let report_handle = match self.report_handle {
      Some(handle) => handle,
      None => work_handle.clone(),
    };
    Ok(LifetimePool::start(self.config, self.provider, work_handle, report_handle))
  }
}
