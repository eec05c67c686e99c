use std::error::Error as StdError;
use std::future::Future;

use futures::future::BoxFuture;

/// Error type a [`ValueProvider`] may fail with.
pub type ProvideError = Box<dyn StdError + Send + Sync + 'static>;

/// The future a [`ValueProvider`] returns for a single production attempt.
pub type ProvideFuture<'a, T> = BoxFuture<'a, Result<T, ProvideError>>;

/// Source of fresh pool values.
///
/// The pool calls `provide` once per empty slot. Failures are reported to the
/// pool's event reporters and are not retried; wrap the provider in your own
/// retry logic if you need that.
///
/// Any `Fn() -> impl Future<Output = Result<T, E>>` closure is a provider.
pub trait ValueProvider<T>: Send + Sync + 'static {
  fn provide(&self) -> ProvideFuture<'_, T>;
}

impl<T, F, Fut, E> ValueProvider<T> for F
where
  T: Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
  E: Into<ProvideError> + 'static,
{
  fn provide(&self) -> ProvideFuture<'_, T> {
    let attempt = self();
    Box::pin(async move { attempt.await.map_err(Into::into) })
  }
}
