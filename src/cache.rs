use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use arc_swap::ArcSwap;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use crate::config::CacheConfig;
use crate::data_sources::data_source::DataSource;
use crate::error::{FetchError, RefreshError};
use crate::policy::{AlwaysReplace, UpdatePolicy};

/// Interval used when the builder is not given one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Immutable snapshot stored in the cache. Swapped as a whole, so readers never see
/// a value paired with another value's timestamp.
struct Slot<T> {
    // Arc keeps handed out values alive after the slot is replaced
    value: Option<Arc<T>>,
    updated_at_millis: u64,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Slot { value: None, updated_at_millis: 0 }
    }
}

/// Result of a refresh attempt that did not fail.
enum Accepted {
    Replaced,
    Rejected,
    Stopped,
}

/// What happened during a manual refresh. Failures are already logged and counted,
/// inspecting this is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The candidate was accepted and is now cached
    Replaced,
    /// The update policy kept the current value
    Rejected,
    /// The data source failed or produced nothing, the current value is kept
    Failed,
    /// The cache was stopped, the data source was not called
    Stopped,
}

/// Counters of refresh attempts, see [`RefreshableCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub attempts: u64,
    pub replaced: u64,
    pub rejected: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    replaced: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// State shared with the background refresh task.
struct Shared<T, S, P> {
    name: String,
    source: S,
    policy: P,
    slot: ArcSwap<Slot<T>>,
    // Serializes initial, scheduled and manual refreshes
    refresh_lock: Mutex<()>,
    // Set once by `stop`, checked under `refresh_lock`
    stopped: AtomicBool,
    counters: Counters,
}

impl<T, S, P> Shared<T, S, P>
where
    T: Send + Sync,
    S: DataSource<T>,
    P: UpdatePolicy<T>,
{
    /// One refresh attempt. The cached slot is only written on an accepted candidate.
    async fn refresh(&self) -> Result<Accepted, FetchError> {
        let _guard = self.refresh_lock.lock().await;
        if self.stopped.load(Ordering::Acquire) {
            tracing::debug!(cache = %self.name, "cache is stopped, skipping refresh");
            return Ok(Accepted::Stopped);
        }
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);

        let candidate = match self.source.produce().await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                if self.slot.load().value.is_some() {
                    tracing::warn!(cache = %self.name, "data source produced no value, keeping cached value");
                } else {
                    tracing::warn!(cache = %self.name, "data source produced no value, nothing cached yet");
                }
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(FetchError::Empty);
            }
            Err(err) => {
                tracing::error!(cache = %self.name, error = %err, "data source failed");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(FetchError::Source(err));
            }
        };

        let current = self.slot.load_full();
        if !self.policy.should_replace(current.value.as_deref(), &candidate) {
            tracing::info!(cache = %self.name, "update policy rejected candidate, keeping cached value");
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(Accepted::Rejected);
        }

        // never move the timestamp backwards, even if the wall clock does
        let updated_at_millis = now_millis().max(current.updated_at_millis);
        self.slot.store(Arc::new(Slot {
            value: Some(Arc::new(candidate)),
            updated_at_millis,
        }));
        self.counters.replaced.fetch_add(1, Ordering::Relaxed);
        tracing::info!(cache = %self.name, updated_at_millis, "cached value replaced");
        Ok(Accepted::Replaced)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

enum Lifecycle {
    Created,
    Running {
        shutdown: watch::Sender<bool>,
        task: Option<JoinHandle<()>>,
    },
    Stopped,
}

/// Holds the last successfully fetched value and refreshes it on a fixed schedule.
///
/// Construction does nothing, call [`start`](Self::start) to load the first value and arm the timer.
/// Once a value is cached, failed refreshes never clear it: readers keep getting the last good value.
///
/// Must be started from within a tokio runtime when periodic refresh is enabled.
pub struct RefreshableCache<T, S, P = AlwaysReplace> {
    shared: Arc<Shared<T, S, P>>,
    default_value: Option<Arc<T>>,
    interval: Duration,
    periodic_refresh: bool,
    lifecycle: std::sync::Mutex<Lifecycle>,
}

impl<T, S> RefreshableCache<T, S, AlwaysReplace>
where
    T: Send + Sync + 'static,
    S: DataSource<T> + 'static,
{
    pub fn builder(source: S) -> CacheBuilder<T, S, AlwaysReplace> {
        CacheBuilder {
            name: None,
            source,
            policy: AlwaysReplace,
            default_value: None,
            interval: DEFAULT_INTERVAL,
            periodic_refresh: true,
        }
    }
}

impl<T, S, P> RefreshableCache<T, S, P>
where
    T: Send + Sync + 'static,
    S: DataSource<T> + 'static,
    P: UpdatePolicy<T> + 'static,
{
    /// Arm the refresh timer (if periodic refresh is enabled) and load the first value.
    ///
    /// The first scheduled refresh happens one interval after this call.
    /// # Errors
    /// [`RefreshError::RefreshFailed`] if the initial load fails. The timer stays armed,
    /// so a later tick may still fill the cache.
    ///
    /// [`RefreshError::AlreadyStarted`] if the cache was started or stopped before.
    pub async fn start(&self) -> Result<(), RefreshError> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if !matches!(*lifecycle, Lifecycle::Created) {
                return Err(RefreshError::AlreadyStarted { name: self.shared.name.clone() });
            }
            let (shutdown, signal) = watch::channel(false);
            let task = self.periodic_refresh.then(|| {
                tokio::spawn(run_periodic(Arc::clone(&self.shared), self.interval, signal))
            });
            *lifecycle = Lifecycle::Running { shutdown, task };
        }
        tracing::debug!(cache = %self.shared.name, periodic = self.periodic_refresh, interval = ?self.interval, "cache started");

        match self.shared.refresh().await {
            Ok(_) => Ok(()),
            Err(source) => Err(RefreshError::RefreshFailed {
                name: self.shared.name.clone(),
                source,
            }),
        }
    }

    /// Refresh once, right now. Failures are logged and counted, never returned as errors.
    ///
    /// Waits for a scheduled refresh that is already running. Does nothing once the cache is stopped.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        match self.shared.refresh().await {
            Ok(Accepted::Replaced) => RefreshOutcome::Replaced,
            Ok(Accepted::Rejected) => RefreshOutcome::Rejected,
            Ok(Accepted::Stopped) => RefreshOutcome::Stopped,
            Err(_) => RefreshOutcome::Failed,
        }
    }
}

impl<T, S, P> RefreshableCache<T, S, P> {
    /// Cached value, or the default value if nothing was loaded yet.
    pub fn get(&self) -> Option<Arc<T>> {
        self.shared
            .slot
            .load()
            .value
            .clone()
            .or_else(|| self.default_value.clone())
    }

    /// Milliseconds since the unix epoch of the last accepted refresh, 0 if there was none.
    pub fn last_updated_at(&self) -> u64 {
        self.shared.slot.load().updated_at_millis
    }

    pub fn stats(&self) -> RefreshStats {
        let counters = &self.shared.counters;
        RefreshStats {
            attempts: counters.attempts.load(Ordering::Relaxed),
            replaced: counters.replaced.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Disarm the refresh timer for good. A refresh that is already running is allowed to finish,
    /// no further refresh happens, manual ones included. The cache keeps serving its last value.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.stopped.store(true, Ordering::Release);
        if let Lifecycle::Running { shutdown, .. } = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            // receiver may already be gone if the task was never spawned
            let _ = shutdown.send(true);
            tracing::debug!(cache = %self.shared.name, "cache stopped");
        }
    }

    /// True while the background task is alive.
    pub fn is_refreshing_periodically(&self) -> bool {
        let lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Running { task: Some(task), .. } => !task.is_finished(),
            _ => false,
        }
    }
}

impl<T, S, P> Drop for RefreshableCache<T, S, P> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_periodic<T, S, P>(shared: Arc<Shared<T, S, P>>, interval: Duration, mut shutdown: watch::Receiver<bool>)
where
    T: Send + Sync,
    S: DataSource<T>,
    P: UpdatePolicy<T>,
{
    // Delay: a slow tick pushes the next one back instead of firing a burst
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        tracing::debug!(cache = %shared.name, "scheduled refresh");
        // errors are already logged, a failed tick must not end the loop
        let _ = shared.refresh().await;
        if *shutdown.borrow() {
            break;
        }
    }
    tracing::debug!(cache = %shared.name, "refresh task finished");
}

/// Builder for [`RefreshableCache`].
pub struct CacheBuilder<T, S, P> {
    name: Option<String>,
    source: S,
    policy: P,
    default_value: Option<T>,
    interval: Duration,
    periodic_refresh: bool,
}

impl<T, S, P> CacheBuilder<T, S, P>
where
    T: Send + Sync + 'static,
    S: DataSource<T> + 'static,
    P: UpdatePolicy<T> + 'static,
{
    /// Diagnostic name. Defaults to the data source name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn periodic_refresh(mut self, enabled: bool) -> Self {
        self.periodic_refresh = enabled;
        self
    }

    /// Value returned by [`RefreshableCache::get`] until the first successful refresh.
    pub fn default_value(mut self, value: T) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn update_policy<P2: UpdatePolicy<T> + 'static>(self, policy: P2) -> CacheBuilder<T, S, P2> {
        CacheBuilder {
            name: self.name,
            source: self.source,
            policy,
            default_value: self.default_value,
            interval: self.interval,
            periodic_refresh: self.periodic_refresh,
        }
    }

    /// Apply name, interval and periodic flag from `config`. The named policy is not applied,
    /// pass `config.update_policy` to [`update_policy`](Self::update_policy) for that.
    /// # Errors
    /// [`RefreshError::InvalidInterval`] if the configured interval is zero.
    pub fn with_config(self, config: &CacheConfig) -> Result<Self, RefreshError> {
        let interval = config.interval()?;
        Ok(self
            .name(config.name.clone())
            .interval(interval)
            .periodic_refresh(config.periodic_refresh))
    }

    /// # Errors
    /// [`RefreshError::InvalidInterval`] if periodic refresh is enabled with a zero interval.
    pub fn build(self) -> Result<RefreshableCache<T, S, P>, RefreshError> {
        let name = match self.name {
            Some(name) => name,
            None => self.source.name().to_string(),
        };
        if self.periodic_refresh && self.interval.is_zero() {
            return Err(RefreshError::InvalidInterval { name });
        }
        Ok(RefreshableCache {
            shared: Arc::new(Shared {
                name,
                source: self.source,
                policy: self.policy,
                slot: ArcSwap::from_pointee(Slot::empty()),
                refresh_lock: Mutex::new(()),
                stopped: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            default_value: self.default_value.map(Arc::new),
            interval: self.interval,
            periodic_refresh: self.periodic_refresh,
            lifecycle: std::sync::Mutex::new(Lifecycle::Created),
        })
    }
}
