//! A Tokio-based pool of pre-produced values with time-to-live eviction.
//!
//! The pool keeps up to `capacity` values ready, evicts values older than a
//! configured lifetime, replaces every consumed or evicted value, and hands
//! freshly produced values straight to callers blocked in `take`.

mod config;
mod entry;
mod error;
mod handoff;
mod pool;
mod provider;
mod reporter;
mod store;
mod waiters;

pub use config::{PoolBuilder, PoolConfig, DEFAULT_CLEAN_INTERVAL};
pub use error::PoolError;
pub use pool::{LifetimePool, Pool};
pub use provider::{ProvideError, ProvideFuture, ValueProvider};
pub use reporter::EventReporter;
pub use waiters::{Fairness, Waiter, WaiterRegistry};
