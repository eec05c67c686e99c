use lifetime_pool::{EventReporter, LifetimePool, PoolError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Pretend session token fetched from a slow remote service.
#[derive(Debug, Clone)]
struct SessionToken {
  id: u64,
}

async fn fetch_token(id: u64) -> Result<SessionToken, PoolError> {
  info!("Fetching token {}", id);
  tokio::time::sleep(Duration::from_millis(300)).await;
  Ok(SessionToken { id })
}

struct LoggingReporter;

impl EventReporter<SessionToken> for LoggingReporter {
  fn on_add(&self, value: &SessionToken) {
    info!("Token {} is ready", value.id);
  }

  fn on_clean(&self, value: &SessionToken) {
    info!("Token {} expired", value.id);
  }

  fn on_poll(&self, value: &SessionToken) {
    info!("Token {} handed out", value.id);
  }

  fn on_change_size(&self, size: usize) {
    info!("Pool now holds {} tokens", size);
  }

  fn on_error(&self, error: &PoolError) {
    info!("Token fetch failed: {}", error);
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let next_id = Arc::new(AtomicU64::new(0));
  let pool = LifetimePool::builder(3, move || fetch_token(next_id.fetch_add(1, Ordering::Relaxed)))
    .name("token_pool")
    .lifetime(Duration::from_secs(2))
    .build()
    .expect("Pool construction failed");
  pool.register_event_reporter(Arc::new(LoggingReporter));

  // Nothing is ready yet: the first fetches are still in flight.
  info!("Immediate poll: {:?}", pool.poll());

  for _ in 0..5 {
    match pool.take().await {
      Ok(token) => info!("Using token {}", token.id),
      Err(e) => info!("Take failed: {:?}", e),
    }
  }

  match pool.poll_timeout(Duration::from_millis(100)).await {
    Ok(Some(token)) => info!("Got token {} within the timeout", token.id),
    Ok(None) => info!("No token within the timeout"),
    Err(e) => info!("Poll failed: {:?}", e),
  }

  info!("Idling so unused tokens expire and get replaced...");
  tokio::time::sleep(Duration::from_secs(5)).await;

  pool.shutdown().await;
  info!("--- Basic Usage Example End ---");
}
