use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use refresh_cache::policy::from_fn;
use refresh_cache::{
    BoxError, CacheConfig, DataSource, FetchError, NamedPolicy, RefreshError, RefreshOutcome, RefreshStats,
    RefreshableCache, Refresher,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TestDetails {
    attribute1: String,
    attribute2: String,
    attribute3: String,
}

impl TestDetails {
    fn version(tag: &str) -> Self {
        TestDetails {
            attribute1: format!("{tag}-1"),
            attribute2: format!("{tag}-2"),
            attribute3: format!("{tag}-3"),
        }
    }
}

#[derive(Debug, Clone)]
enum Step {
    Value(TestDetails),
    Empty,
    Fail(&'static str),
}

/// Source whose next answer is switched by the test.
#[derive(Clone)]
struct TestSource {
    step: Arc<Mutex<Step>>,
    calls: Arc<AtomicUsize>,
}

impl TestSource {
    fn new(step: Step) -> Self {
        TestSource {
            step: Arc::new(Mutex::new(step)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn set(&self, step: Step) {
        *self.step.lock().unwrap() = step;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataSource<TestDetails> for TestSource {
    async fn produce(&self) -> Result<Option<TestDetails>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.step.lock().unwrap().clone();
        match step {
            Step::Value(details) => Ok(Some(details)),
            Step::Empty => Ok(None),
            Step::Fail(message) => Err(message.into()),
        }
    }
}

type TestCache = RefreshableCache<TestDetails, TestSource>;

fn test_cache(source: &TestSource, periodic_refresh: bool) -> TestCache {
    RefreshableCache::builder(source.clone())
        .name("test cache")
        .interval(Duration::from_secs(1))
        .periodic_refresh(periodic_refresh)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn construction_does_not_fetch() {
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = test_cache(&source, true);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(source.calls(), 0);
    assert!(cache.get().is_none());
    assert_eq!(cache.last_updated_at(), 0);
    assert_eq!(cache.stats(), RefreshStats::default());
}

#[tokio::test(start_paused = true)]
async fn start_loads_value_immediately() {
    let v1 = TestDetails::version("v1");
    let source = TestSource::new(Step::Value(v1.clone()));
    let cache = test_cache(&source, true);

    cache.start().await.unwrap();

    assert_eq!(cache.get().as_deref(), Some(&v1));
    assert!(cache.last_updated_at() > 0);
    assert_eq!(source.calls(), 1);
    assert!(cache.is_refreshing_periodically());
}

#[tokio::test(start_paused = true)]
async fn periodic_refresh_picks_up_new_values() {
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = test_cache(&source, true);
    cache.start().await.unwrap();

    source.set(Step::Value(TestDetails::version("v2")));
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(cache.get().as_deref(), Some(&TestDetails::version("v2")));
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_ticks_keep_serving_last_value() {
    let v1 = TestDetails::version("v1");
    let source = TestSource::new(Step::Value(v1.clone()));
    let cache = test_cache(&source, true);
    cache.start().await.unwrap();
    let updated_at = cache.last_updated_at();

    source.set(Step::Empty);
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(cache.get().as_deref(), Some(&v1));

    source.set(Step::Fail("source is down"));
    sleep(Duration::from_secs(2)).await;
    assert_eq!(cache.get().as_deref(), Some(&v1));
    assert_eq!(cache.last_updated_at(), updated_at);

    let stats = cache.stats();
    assert_eq!(stats.replaced, 1);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.attempts, 4);
    // the loop survived the failures
    assert!(cache.is_refreshing_periodically());
}

#[tokio::test(start_paused = true)]
async fn rejected_candidate_changes_nothing() {
    let v1 = TestDetails::version("v1");
    let source = TestSource::new(Step::Value(v1.clone()));
    let cache = RefreshableCache::builder(source.clone())
        .interval(Duration::from_secs(1))
        .update_policy(from_fn(|_current: Option<&TestDetails>, candidate: &TestDetails| {
            candidate.attribute1 != "v2-1"
        }))
        .build()
        .unwrap();
    cache.start().await.unwrap();
    let updated_at = cache.last_updated_at();

    source.set(Step::Value(TestDetails::version("v2")));
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(source.calls(), 2);
    assert_eq!(cache.get().as_deref(), Some(&v1));
    assert_eq!(cache.last_updated_at(), updated_at);
    assert_eq!(cache.stats().rejected, 1);
    assert_eq!(cache.stats().failed, 0);

    assert_eq!(cache.refresh_now().await, RefreshOutcome::Rejected);
}

#[tokio::test(start_paused = true)]
async fn timestamp_only_moves_forward_on_accepted_refresh() {
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = test_cache(&source, false);
    cache.start().await.unwrap();
    let first = cache.last_updated_at();
    assert!(first > 0);

    source.set(Step::Fail("boom"));
    assert_eq!(cache.refresh_now().await, RefreshOutcome::Failed);
    assert_eq!(cache.last_updated_at(), first);

    source.set(Step::Value(TestDetails::version("v2")));
    assert_eq!(cache.refresh_now().await, RefreshOutcome::Replaced);
    assert!(cache.last_updated_at() >= first);
    assert_eq!(cache.get().as_deref(), Some(&TestDetails::version("v2")));
}

#[tokio::test(start_paused = true)]
async fn start_fails_when_source_yields_nothing() {
    let source = TestSource::new(Step::Empty);
    let cache = test_cache(&source, true);

    let err = cache.start().await.unwrap_err();
    assert!(err.is_refresh_failed());
    assert!(matches!(err, RefreshError::RefreshFailed { source: FetchError::Empty, .. }));
    assert!(cache.get().is_none());
    assert_eq!(cache.last_updated_at(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_failure_falls_back_to_default_value() {
    let fallback = TestDetails::version("default");
    let source = TestSource::new(Step::Fail("Error in fetching data from supplier"));
    let cache = RefreshableCache::builder(source.clone())
        .interval(Duration::from_secs(1))
        .default_value(fallback.clone())
        .build()
        .unwrap();

    assert_eq!(cache.get().as_deref(), Some(&fallback));
    let err = cache.start().await.unwrap_err();
    let cause = err.source().and_then(|e| e.source()).map(|e| e.to_string());
    assert_eq!(cause.as_deref(), Some("Error in fetching data from supplier"));
    assert_eq!(cache.get().as_deref(), Some(&fallback));
}

#[tokio::test(start_paused = true)]
async fn timer_stays_armed_after_failed_start() {
    let source = TestSource::new(Step::Empty);
    let cache = test_cache(&source, true);
    assert!(cache.start().await.is_err());

    source.set(Step::Value(TestDetails::version("late")));
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(cache.get().as_deref(), Some(&TestDetails::version("late")));
}

#[tokio::test(start_paused = true)]
async fn stop_freezes_the_cache() {
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = test_cache(&source, true);
    cache.start().await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    let calls = source.calls();

    cache.stop();
    cache.stop();
    source.set(Step::Value(TestDetails::version("v2")));
    sleep(Duration::from_millis(2500)).await;

    assert_eq!(source.calls(), calls);
    assert_eq!(cache.get().as_deref(), Some(&TestDetails::version("v1")));
    assert!(!cache.is_refreshing_periodically());
    assert!(matches!(cache.start().await, Err(RefreshError::AlreadyStarted { .. })));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_cache_ends_refreshes() {
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = test_cache(&source, true);
    cache.start().await.unwrap();
    drop(cache);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() {
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = test_cache(&source, true);
    cache.start().await.unwrap();

    assert!(matches!(cache.start().await, Err(RefreshError::AlreadyStarted { .. })));
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_only_when_periodic_disabled() {
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = test_cache(&source, false);
    cache.start().await.unwrap();
    assert!(!cache.is_refreshing_periodically());

    source.set(Step::Value(TestDetails::version("v2")));
    sleep(Duration::from_secs(5)).await;
    assert_eq!(source.calls(), 1);
    assert_eq!(cache.get().as_deref(), Some(&TestDetails::version("v1")));

    assert_eq!(cache.refresh_now().await, RefreshOutcome::Replaced);
    assert_eq!(cache.get().as_deref(), Some(&TestDetails::version("v2")));
}

#[test]
fn zero_interval_is_rejected_for_periodic_refresh() {
    let source = TestSource::new(Step::Empty);
    let built: Result<TestCache, _> = RefreshableCache::builder(source.clone())
        .name("zero")
        .interval(Duration::ZERO)
        .build();
    assert!(matches!(built, Err(RefreshError::InvalidInterval { ref name }) if name == "zero"));

    let manual: Result<TestCache, _> = RefreshableCache::builder(source)
        .interval(Duration::ZERO)
        .periodic_refresh(false)
        .build();
    assert!(manual.is_ok());
}

#[test]
fn name_defaults_to_source_name() {
    let cache: TestCache = RefreshableCache::builder(TestSource::new(Step::Empty)).build().unwrap();
    assert_eq!(cache.name(), "TestSource");
}

/// Takes longer than the refresh interval and records overlapping calls.
#[derive(Clone, Default)]
struct SlowSource {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl DataSource<usize> for SlowSource {
    async fn produce(&self) -> Result<Option<usize>, BoxError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_secs(3)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(self.calls.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

#[tokio::test(start_paused = true)]
async fn slow_source_is_never_called_concurrently() {
    let source = SlowSource::default();
    let cache: RefreshableCache<usize, SlowSource> = RefreshableCache::builder(source.clone())
        .interval(Duration::from_secs(1))
        .build()
        .unwrap();
    cache.start().await.unwrap();

    let (a, b) = tokio::join!(cache.refresh_now(), cache.refresh_now());
    assert_eq!((a, b), (RefreshOutcome::Replaced, RefreshOutcome::Replaced));
    sleep(Duration::from_secs(10)).await;
    cache.stop();

    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(source.calls.load(Ordering::SeqCst) >= 5);
}

#[tokio::test(start_paused = true)]
async fn refresher_applies_named_policy() {
    let v1 = TestDetails::version("v1");
    let source = TestSource::new(Step::Value(v1.clone()));
    let config = CacheConfig {
        name: "test refresher".to_string(),
        refresh_interval: 1,
        update_policy: NamedPolicy::IfChanged,
        ..CacheConfig::default()
    };
    let refresher = Refresher::start(source.clone(), &config).await.unwrap();
    assert_eq!(refresher.data().as_deref(), Some(&v1));
    let updated_at = refresher.last_updated_at();

    assert_eq!(refresher.refresh().await, RefreshOutcome::Rejected);
    assert_eq!(refresher.last_updated_at(), updated_at);

    source.set(Step::Value(TestDetails::version("v2")));
    assert_eq!(refresher.refresh().await, RefreshOutcome::Replaced);
    assert_eq!(refresher.cache().name(), "test refresher");
    refresher.stop();
}

#[tokio::test(start_paused = true)]
async fn refresher_propagates_start_failure() {
    let source = TestSource::new(Step::Empty);
    let result = Refresher::start(source, &CacheConfig::default()).await;
    assert!(matches!(result, Err(RefreshError::RefreshFailed { .. })));

    let zero = CacheConfig { refresh_interval: 0, ..CacheConfig::default() };
    let result = Refresher::start(TestSource::new(Step::Empty), &zero).await;
    assert!(matches!(result, Err(RefreshError::InvalidInterval { .. })));
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_after_stop_is_ignored() {
    let v1 = TestDetails::version("v1");
    let source = TestSource::new(Step::Value(v1.clone()));
    let cache = test_cache(&source, false);
    cache.start().await.unwrap();
    let updated_at = cache.last_updated_at();

    cache.stop();
    source.set(Step::Value(TestDetails::version("v2")));

    assert_eq!(cache.refresh_now().await, RefreshOutcome::Stopped);
    assert_eq!(source.calls(), 1);
    assert_eq!(cache.get().as_deref(), Some(&v1));
    assert_eq!(cache.last_updated_at(), updated_at);
}

#[tokio::test(start_paused = true)]
async fn queued_manual_refresh_does_not_run_after_stop() {
    let source = SlowSource::default();
    let cache: RefreshableCache<usize, SlowSource> = RefreshableCache::builder(source.clone())
        .periodic_refresh(false)
        .build()
        .unwrap();
    cache.start().await.unwrap();
    assert_eq!(cache.get().as_deref(), Some(&1));

    // the first refresh holds the lock for 3s, the second waits behind it
    let (running, queued, _) = tokio::join!(cache.refresh_now(), cache.refresh_now(), async {
        sleep(Duration::from_secs(1)).await;
        cache.stop();
    });

    assert_eq!(running, RefreshOutcome::Replaced);
    assert_eq!(queued, RefreshOutcome::Stopped);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get().as_deref(), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn policy_rejecting_initial_value_is_not_a_start_failure() {
    let fallback = TestDetails::version("default");
    let source = TestSource::new(Step::Value(TestDetails::version("v1")));
    let cache = RefreshableCache::builder(source.clone())
        .periodic_refresh(false)
        .default_value(fallback.clone())
        .update_policy(from_fn(|current: Option<&TestDetails>, _candidate: &TestDetails| current.is_some()))
        .build()
        .unwrap();

    assert!(cache.start().await.is_ok());
    assert_eq!(source.calls(), 1);
    assert_eq!(cache.get().as_deref(), Some(&fallback));
    assert_eq!(cache.last_updated_at(), 0);
    assert_eq!(cache.stats().rejected, 1);
    assert_eq!(cache.stats().failed, 0);
}
