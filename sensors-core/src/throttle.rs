//! Time-based throttling of vendor calls with a stale-cache fallback.
//!
//! A [`Throttled`] value owns the last successfully fetched payload and the
//! instant it was fetched. [`Throttled::update`] only runs the fetch once
//! `min_interval` has elapsed since that instant; failed or empty fetches
//! leave both untouched so the next eligible call simply tries again.

use std::{
    fmt::Debug,
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{debug, error, warn};

/// Source of "now" for throttling decisions.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// What a call to [`Throttled::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Called again before `min_interval` elapsed; nothing was fetched.
    Throttled,
    /// Fetched and replaced the cached payload.
    Updated,
    /// The vendor answered with nothing; cache kept.
    Empty,
    /// The vendor call failed; cache kept.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Throttled<T> {
    label: &'static str,
    min_interval: Duration,
    last_fetch: Option<Instant>,
    payload: Option<T>,
}

impl<T> Throttled<T> {
    /// `label` only shows up in diagnostics.
    pub fn new(label: &'static str, min_interval: Duration) -> Self {
        Self {
            label,
            min_interval,
            last_fetch: None,
            payload: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_fetch(&self) -> Option<Instant> {
        self.last_fetch
    }

    /// Last successfully fetched payload, `None` until the first success.
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fetch {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    /// Run `fetch` unless throttled.
    ///
    /// `Ok(Some(_))` replaces the payload and records `now`; `Ok(None)` is an
    /// empty vendor response and `Err(_)` a failed call, both of which keep
    /// the previous payload and timestamp.
    pub async fn update<F, Fut>(&mut self, now: Instant, fetch: F) -> Refresh
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        if !self.is_due(now) {
            debug!(label = self.label, "update throttled");
            return Refresh::Throttled;
        }

        match fetch().await {
            Ok(Some(payload)) => {
                self.payload = Some(payload);
                self.last_fetch = Some(now);
                debug!(label = self.label, "payload refreshed");
                Refresh::Updated
            }
            Ok(None) => {
                warn!(label = self.label, "Failed to fetch {} data: empty response", self.label);
                Refresh::Empty
            }
            Err(e) => {
                error!(label = self.label, "Error while updating {} data: {e:#}", self.label);
                Refresh::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::{
        cell::Cell,
        sync::{Arc, Mutex},
    };
    use tracing_subscriber::{layer::Context, prelude::*};

    /// Records the target of every event.
    #[derive(Clone, Default)]
    struct Targets(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Targets {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0.lock().unwrap().push(event.metadata().target().to_string());
        }
    }

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[tokio::test]
    async fn first_call_always_fetches() {
        let clock = ManualClock::new();
        let mut poller: Throttled<&str> = Throttled::new("test", TEN_MINUTES);

        assert!(poller.payload().is_none());
        let outcome = poller.update(clock.now(), || async { Ok(Some("P1")) }).await;

        assert_eq!(outcome, Refresh::Updated);
        assert_eq!(poller.payload(), Some(&"P1"));
        assert_eq!(poller.last_fetch(), Some(clock.now()));
    }

    #[tokio::test]
    async fn calls_inside_interval_never_reach_the_vendor() {
        let clock = ManualClock::new();
        let calls = Cell::new(0);
        let mut poller: Throttled<u32> = Throttled::new("test", TEN_MINUTES);

        // 20 ticks, 30 seconds apart, spanning 9.5 minutes.
        for _ in 0..20 {
            poller
                .update(clock.now(), || async {
                    calls.set(calls.get() + 1);
                    Ok(Some(calls.get()))
                })
                .await;
            clock.advance(Duration::from_secs(30));
        }
        assert_eq!(calls.get(), 1);

        clock.advance(Duration::from_secs(30));
        let outcome = poller.update(clock.now(), || async { Ok(Some(99)) }).await;
        assert_eq!(outcome, Refresh::Updated);
        assert_eq!(poller.payload(), Some(&99));
    }

    #[tokio::test]
    async fn scenario_p1_p1_p2() {
        let clock = ManualClock::new();
        let mut poller: Throttled<&str> = Throttled::new("test", TEN_MINUTES);
        let mut seen = Vec::new();

        poller.update(clock.now(), || async { Ok(Some("P1")) }).await;
        seen.push(*poller.payload().unwrap());

        clock.advance(minutes(5));
        let outcome = poller.update(clock.now(), || async { Ok(Some("P2")) }).await;
        assert_eq!(outcome, Refresh::Throttled);
        seen.push(*poller.payload().unwrap());

        clock.advance(minutes(6));
        poller.update(clock.now(), || async { Ok(Some("P2")) }).await;
        seen.push(*poller.payload().unwrap());

        assert_eq!(seen, ["P1", "P1", "P2"]);
    }

    #[tokio::test]
    async fn failure_keeps_payload_and_timestamp() {
        let clock = ManualClock::new();
        let mut poller: Throttled<&str> = Throttled::new("test", TEN_MINUTES);

        poller.update(clock.now(), || async { Ok(Some("P1")) }).await;
        let fetched_at = poller.last_fetch();

        clock.advance(minutes(10));
        let outcome = poller
            .update(clock.now(), || async { Err(anyhow!("connection reset")) })
            .await;

        assert_eq!(outcome, Refresh::Failed);
        assert_eq!(poller.payload(), Some(&"P1"));
        assert_eq!(poller.last_fetch(), fetched_at);
        // Not throttled: the failed attempt did not count as a fetch.
        assert!(poller.is_due(clock.now()));
    }

    #[tokio::test]
    async fn failure_before_first_fetch_then_success() {
        let clock = ManualClock::new();
        let mut poller: Throttled<&str> = Throttled::new("test", TEN_MINUTES);

        let outcome = poller.update(clock.now(), || async { Err(anyhow!("boom")) }).await;
        assert_eq!(outcome, Refresh::Failed);
        assert!(poller.payload().is_none());
        assert!(poller.last_fetch().is_none());

        clock.advance(minutes(10));
        let outcome = poller.update(clock.now(), || async { Ok(Some("P1")) }).await;
        assert_eq!(outcome, Refresh::Updated);
        assert_eq!(poller.payload(), Some(&"P1"));
    }

    #[tokio::test]
    async fn empty_response_is_distinct_from_failure_but_keeps_state() {
        let clock = ManualClock::new();
        let mut poller: Throttled<&str> = Throttled::new("test", TEN_MINUTES);

        poller.update(clock.now(), || async { Ok(Some("P1")) }).await;
        clock.advance(minutes(11));

        let outcome = poller.update(clock.now(), || async { Ok(None) }).await;
        assert_eq!(outcome, Refresh::Empty);
        assert_eq!(poller.payload(), Some(&"P1"));
        assert!(poller.is_due(clock.now()));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let before = other.now();

        clock.advance(minutes(3));
        assert_eq!(other.now() - before, minutes(3));
    }

    #[tokio::test]
    async fn every_outcome_logs_under_the_module_target() {
        let targets = Targets::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(targets.clone()));

        let clock = ManualClock::new();
        let mut poller: Throttled<u32> = Throttled::new("test", TEN_MINUTES);

        assert_eq!(poller.update(clock.now(), || async { Ok(Some(1)) }).await, Refresh::Updated);
        assert_eq!(poller.update(clock.now(), || async { Ok(Some(2)) }).await, Refresh::Throttled);
        clock.advance(TEN_MINUTES);
        assert_eq!(poller.update(clock.now(), || async { Ok(None) }).await, Refresh::Empty);
        assert_eq!(
            poller.update(clock.now(), || async { Err(anyhow!("HttpError 503")) }).await,
            Refresh::Failed
        );

        let seen = targets.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|t| t == "sensors_core::throttle"), "{seen:?}");
    }
}
