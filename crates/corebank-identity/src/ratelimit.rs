use crate::IdentityError;
use chrono::{DateTime, Utc};
use corebank_types::{Clock, SharedClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub default_rpm: u32,
    pub auth_rpm: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_rpm: 100,
            auth_rpm: 10,
        }
    }
}

/// Endpoint classes carry different budgets and different outage policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Auth,
    Business,
}

/// Shared counter store behind the limiter. `try_take` returns an error
/// when the store itself is unreachable; the limiter decides what an outage
/// means per endpoint class.
pub trait CounterStore: Send + Sync {
    fn try_take(
        &self,
        key: &str,
        capacity: u32,
        refill_per_minute: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, String>;
}

#[derive(Debug, Clone)]
struct Bucket {
    /// Token balance scaled by 1000 to avoid float drift.
    milli_tokens: u64,
    last_refill: DateTime<Utc>,
}

/// In-process token buckets.
#[derive(Default)]
pub struct InMemoryCounterStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn try_take(
        &self,
        key: &str,
        capacity: u32,
        refill_per_minute: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, String> {
        let capacity_milli = capacity as u64 * 1000;
        let mut buckets = self.buckets.lock().expect("bucket lock poisoned");
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            milli_tokens: capacity_milli,
            last_refill: now,
        });

        let elapsed_ms = (now - bucket.last_refill).num_milliseconds().max(0) as u64;
        let refill = elapsed_ms * refill_per_minute as u64 / 60_000 * 1000;
        if refill > 0 {
            bucket.milli_tokens = (bucket.milli_tokens + refill).min(capacity_milli);
            bucket.last_refill = now;
        }

        if bucket.milli_tokens >= 1000 {
            bucket.milli_tokens -= 1000;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Token-bucket limiter keyed `(subject, endpoint)`.
///
/// On a counter-store outage business endpoints fail open and auth
/// endpoints fail closed.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimiterConfig,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimiterConfig, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn check(
        &self,
        subject: &str,
        endpoint: &str,
        class: EndpointClass,
    ) -> Result<(), IdentityError> {
        let key = format!("{subject}|{endpoint}");
        let rpm = match class {
            EndpointClass::Auth => self.config.auth_rpm,
            EndpointClass::Business => self.config.default_rpm,
        };

        match self.store.try_take(&key, rpm, rpm, self.clock.now()) {
            Ok(true) => Ok(()),
            Ok(false) => Err(IdentityError::RateLimited(key)),
            Err(outage) => match class {
                EndpointClass::Business => {
                    tracing::warn!(error = %outage, "rate-limit store outage, failing open");
                    Ok(())
                }
                EndpointClass::Auth => {
                    tracing::error!(error = %outage, "rate-limit store outage, failing closed");
                    Err(IdentityError::RateLimited(key))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use corebank_types::ManualClock;

    fn limiter(store: Arc<dyn CounterStore>) -> (RateLimiter, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::at(start));
        (
            RateLimiter::new(
                store,
                RateLimiterConfig {
                    default_rpm: 5,
                    auth_rpm: 2,
                },
                clock.clone(),
            ),
            clock,
        )
    }

    #[test]
    fn bucket_empties_then_refills_over_time() {
        let (limiter, clock) = limiter(Arc::new(InMemoryCounterStore::new()));

        for _ in 0..5 {
            limiter.check("u1", "/transfers", EndpointClass::Business).unwrap();
        }
        let err = limiter
            .check("u1", "/transfers", EndpointClass::Business)
            .unwrap_err();
        assert!(matches!(err, IdentityError::RateLimited(_)));

        // One minute refills the full budget.
        clock.advance(Duration::minutes(1));
        limiter.check("u1", "/transfers", EndpointClass::Business).unwrap();
    }

    #[test]
    fn buckets_are_isolated_per_subject_and_endpoint() {
        let (limiter, _clock) = limiter(Arc::new(InMemoryCounterStore::new()));

        for _ in 0..5 {
            limiter.check("u1", "/transfers", EndpointClass::Business).unwrap();
        }
        // Other keys still have budget.
        limiter.check("u2", "/transfers", EndpointClass::Business).unwrap();
        limiter.check("u1", "/accounts", EndpointClass::Business).unwrap();
    }

    struct BrokenStore;

    impl CounterStore for BrokenStore {
        fn try_take(
            &self,
            _key: &str,
            _capacity: u32,
            _refill_per_minute: u32,
            _now: DateTime<Utc>,
        ) -> Result<bool, String> {
            Err("connection refused".to_string())
        }
    }

    #[test]
    fn outage_fails_open_for_business_and_closed_for_auth() {
        let (limiter, _clock) = limiter(Arc::new(BrokenStore));

        limiter.check("u1", "/transfers", EndpointClass::Business).unwrap();
        let err = limiter
            .check("u1", "/auth/login", EndpointClass::Auth)
            .unwrap_err();
        assert!(matches!(err, IdentityError::RateLimited(_)));
    }
}
