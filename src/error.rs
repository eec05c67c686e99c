use thiserror::Error;

/// Errors that can occur within a `lifetime_pool` pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Value provider failed to produce a value: {0}")]
  ProductionFailed(String),

  #[error("Value provider panicked while producing a value")]
  ProductionPanicked,

  #[error("Store already holds {0} values, a produced value was discarded")]
  CapacityExceeded(usize),

  #[error("Waiting for a value was cancelled because the pool shut down")]
  Cancelled,

  #[error("Pool has been cancelled or shut down, it cannot serve values anymore")]
  PoolShutDown,

  #[error("No Tokio runtime available; pass explicit handles to the builder or build inside a runtime")]
  NoRuntime,

  #[error("Cleaning interval must be greater than zero")]
  ZeroCleanInterval,
}
