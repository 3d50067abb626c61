use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;

/// Millisecond wall-clock source.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        i64::try_from(millis).unwrap_or(i64::MAX)
    }
}

/// Never reports a value lower than one it already returned.
#[derive(Debug)]
pub struct MonotonicClock<C> {
    inner: C,
    high_water: AtomicI64,
}

impl<C: Clock> MonotonicClock<C> {
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self { inner, high_water: AtomicI64::new(i64::MIN) }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now_millis(&self) -> i64 {
        let now = self.inner.now_millis();
        let previous = self.high_water.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }
}

/// Settable clock for tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(now_millis: i64) -> Self {
        Self { now: AtomicI64::new(now_millis) }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_millis(&self) -> i64 {
        (**self).now_millis()
    }
}
