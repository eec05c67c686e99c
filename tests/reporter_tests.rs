use lifetime_pool::{EventReporter, LifetimePool, PoolError};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lifetime_pool=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
  Add(u32),
  Clean(u32),
  Poll(u32),
  Size(usize),
  Error(PoolError),
}

#[derive(Debug, Default)]
struct RecordingReporter {
  events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
  fn events(&self) -> Vec<Event> {
    self.events.lock().clone()
  }
}

impl EventReporter<u32> for RecordingReporter {
  fn on_add(&self, value: &u32) {
    self.events.lock().push(Event::Add(*value));
  }

  fn on_clean(&self, value: &u32) {
    self.events.lock().push(Event::Clean(*value));
  }

  fn on_poll(&self, value: &u32) {
    self.events.lock().push(Event::Poll(*value));
  }

  fn on_change_size(&self, size: usize) {
    self.events.lock().push(Event::Size(size));
  }

  fn on_error(&self, error: &PoolError) {
    self.events.lock().push(Event::Error(error.clone()));
  }
}

struct PanickingReporter;

impl EventReporter<u32> for PanickingReporter {
  fn on_add(&self, _value: &u32) {
    panic!("reporter failure");
  }
}

fn counting_provider(delay: Duration) -> impl Fn() -> futures::future::BoxFuture<'static, Result<u32, Infallible>> + Send + Sync {
  let counter = Arc::new(AtomicU32::new(0));
  move || {
    let counter = counter.clone();
    Box::pin(async move {
      if !delay.is_zero() {
        sleep(delay).await;
      }
      Ok(counter.fetch_add(1, Ordering::SeqCst))
    })
  }
}

#[tokio::test(start_paused = true)]
async fn test_add_and_poll_events_carry_post_mutation_size() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(2, counting_provider(Duration::from_millis(10)))
    .build()
    .unwrap();
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  sleep(Duration::from_millis(20)).await;
  assert_eq!(pool.poll(), Ok(Some(0)));
  sleep(Duration::from_millis(1)).await;

  assert_eq!(
    reporter.events(),
    vec![
      Event::Add(0),
      Event::Size(1),
      Event::Add(1),
      Event::Size(2),
      Event::Poll(0),
      Event::Size(1),
    ]
  );
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_handoff_never_reports_an_add() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(1, counting_provider(Duration::from_millis(100)))
    .build()
    .unwrap();
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  assert_eq!(pool.take().await, Ok(0));
  sleep(Duration::from_millis(1)).await;

  assert_eq!(reporter.events(), vec![Event::Poll(0), Event::Size(0)]);

  // The replacement production is stored normally.
  sleep(Duration::from_millis(150)).await;
  assert_eq!(
    reporter.events(),
    vec![Event::Poll(0), Event::Size(0), Event::Add(1), Event::Size(1)]
  );
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_expired_values_are_cleaned_and_replaced() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(2, counting_provider(Duration::ZERO))
    .lifetime(Duration::from_millis(100))
    .build()
    .unwrap();
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  sleep(Duration::from_millis(3500)).await;
  let events = reporter.events();

  assert_eq!(
    events[..8],
    [
      Event::Add(0),
      Event::Size(1),
      Event::Add(1),
      Event::Size(2),
      Event::Clean(0),
      Event::Size(1),
      Event::Clean(1),
      Event::Size(0),
    ]
  );
  let cleaned = events.iter().filter(|e| matches!(e, Event::Clean(_))).count();
  assert!(cleaned >= 4, "expected repeated eviction rounds, got {:?}", events);
  for pair in events.chunks(2) {
    assert!(
      matches!(pair, [Event::Add(_) | Event::Clean(_), Event::Size(size)] if *size <= 2),
      "unexpected event pair {:?}",
      pair
    );
  }
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_production_failures_are_reported() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(1, || async { Err::<u32, _>("backend unavailable") })
    .build()
    .unwrap();
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  sleep(Duration::from_millis(10)).await;

  assert_eq!(
    reporter.events(),
    vec![Event::Error(PoolError::ProductionFailed("backend unavailable".to_string()))]
  );
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_provider_panic_is_reported() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(1, || async {
    if true {
      panic!("provider blew up");
    }
    Ok::<u32, Infallible>(0)
  })
  .build()
  .unwrap();
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  sleep(Duration::from_millis(10)).await;

  assert_eq!(reporter.events(), vec![Event::Error(PoolError::ProductionPanicked)]);
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_panicking_reporter_does_not_starve_others() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(1, counting_provider(Duration::from_millis(10)))
    .build()
    .unwrap();
  let recording = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(Arc::new(PanickingReporter));
  pool.register_event_reporter(recording.clone());

  sleep(Duration::from_millis(20)).await;
  assert_eq!(pool.poll(), Ok(Some(0)));
  sleep(Duration::from_millis(1)).await;

  assert_eq!(
    recording.events(),
    vec![Event::Add(0), Event::Size(1), Event::Poll(0), Event::Size(0)]
  );
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_reporter_stops_receiving_events() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(1, counting_provider(Duration::from_millis(10)))
    .build()
    .unwrap();
  let recording = Arc::new(RecordingReporter::default());
  let registered: Arc<dyn EventReporter<u32>> = recording.clone();
  pool.register_event_reporter(registered.clone());

  sleep(Duration::from_millis(20)).await;
  assert!(pool.unregister_event_reporter(&registered));
  assert!(!pool.unregister_event_reporter(&registered));

  assert_eq!(pool.poll(), Ok(Some(0)));
  sleep(Duration::from_millis(20)).await;

  assert_eq!(recording.events(), vec![Event::Add(0), Event::Size(1)]);
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_every_reporter_sees_the_same_sequence() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(3, counting_provider(Duration::from_millis(5)))
    .build()
    .unwrap();
  let first = Arc::new(RecordingReporter::default());
  let second = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(first.clone());
  pool.register_event_reporter(second.clone());

  sleep(Duration::from_millis(10)).await;
  for _ in 0..5 {
    pool.take().await.unwrap();
  }
  sleep(Duration::from_millis(10)).await;

  let events = first.events();
  assert!(!events.is_empty());
  assert_eq!(events, second.events());
  assert!(events.iter().all(|e| !matches!(e, Event::Size(size) if *size > 3)));
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_registering_the_same_reporter_twice_is_ignored() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(1, counting_provider(Duration::from_millis(10)))
    .build()
    .unwrap();
  let recording = Arc::new(RecordingReporter::default());
  let registered: Arc<dyn EventReporter<u32>> = recording.clone();
  assert!(pool.register_event_reporter(registered.clone()));
  assert!(!pool.register_event_reporter(registered.clone()));

  sleep(Duration::from_millis(20)).await;

  assert_eq!(recording.events(), vec![Event::Add(0), Event::Size(1)]);
  assert!(pool.unregister_event_reporter(&registered));
  assert!(!pool.unregister_event_reporter(&registered));
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_handoff_is_reported_before_values_stored_after_it() {
  setup_tracing_for_test();
  // Both initial productions finish at the same instant while one caller waits.
  let pool = LifetimePool::builder(2, counting_provider(Duration::from_millis(100)))
    .build()
    .unwrap();
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  assert_eq!(pool.take().await, Ok(0));
  sleep(Duration::from_millis(1)).await;

  assert_eq!(
    reporter.events(),
    vec![Event::Poll(0), Event::Size(0), Event::Add(1), Event::Size(1)]
  );
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_take_dropped_after_match_returns_value_to_store() {
  setup_tracing_for_test();
  let pool = LifetimePool::builder(1, counting_provider(Duration::from_millis(100)))
    .build()
    .unwrap();
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  let mut take = Box::pin(pool.take());
  assert!(futures::poll!(take.as_mut()).is_pending());
  assert_eq!(pool.waiting(), 1);

  // The production matches the registered take, which is never polled again.
  sleep(Duration::from_millis(150)).await;
  drop(take);

  assert_eq!(pool.waiting(), 0);
  assert_eq!(pool.size(), 1);
  assert_eq!(pool.poll(), Ok(Some(0)));
  sleep(Duration::from_millis(1)).await;

  assert_eq!(
    reporter.events(),
    vec![
      Event::Poll(0),
      Event::Size(0),
      Event::Add(0),
      Event::Size(1),
      Event::Poll(0),
      Event::Size(0),
    ]
  );
  pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_waits_never_overflow_the_store() {
  setup_tracing_for_test();
  let pool = Arc::new(
    LifetimePool::builder(2, counting_provider(Duration::from_millis(10)))
      .build()
      .unwrap(),
  );
  let reporter = Arc::new(RecordingReporter::default());
  pool.register_event_reporter(reporter.clone());

  let mut handles = Vec::new();
  for round in 0..20u64 {
    let pool = pool.clone();
    handles.push(tokio::spawn(async move {
      if round % 3 == 0 {
        pool.take().await.map(Some)
      } else {
        pool.poll_timeout(Duration::from_millis(round % 7 + 1)).await
      }
    }));
  }
  for handle in handles {
    handle.await.unwrap().unwrap();
  }
  sleep(Duration::from_millis(100)).await;

  assert_eq!(pool.size(), 2);
  let events = reporter.events();
  assert!(events.iter().all(|e| !matches!(e, Event::Error(_))), "unexpected error in {:?}", events);
  assert!(events.iter().all(|e| !matches!(e, Event::Size(size) if *size > 2)));
}
