//! Fixed-window admission control per client identity.
//!
//! The counting store is advisory: if it cannot be reached the request is admitted.
//! A window whose expiry never landed is re-armed the first time it denies a request.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{CacheKeys, CounterStore};
use crate::persist::bounded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Requests allowed per window.
    pub limit: u64,
    pub window: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { count: u64 },
    /// Over the limit for the current window.
    Denied { count: u64 },
    /// The counter could not be consulted; admitted anyway.
    Unchecked,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied { .. })
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    counters: Arc<dyn CounterStore>,
    keys: CacheKeys,
    policy: AdmissionPolicy,
    timeout: Duration,
}

impl AdmissionController {
    pub fn new(counters: Arc<dyn CounterStore>, keys: CacheKeys, policy: AdmissionPolicy) -> Self {
        Self {
            counters,
            keys,
            policy,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub async fn check(&self, client: &str) -> Decision {
        let key = self.keys.rate(client);

        let count = match bounded(self.timeout, self.counters.incr(&key)).await {
            Ok(count) => count,
            Err(error) => {
                warn!(client, %error, "admission counter unavailable; admitting");
                return Decision::Unchecked;
            }
        };

        // The first hit opens the window.
        if count == 1 {
            if let Err(error) = bounded(self.timeout, self.counters.expire(&key, self.policy.window)).await {
                warn!(client, %error, "failed to set admission window expiry");
            }
        }

        if count <= self.policy.limit {
            return Decision::Allowed { count };
        }

        debug!(client, count, limit = self.policy.limit, "admission denied");
        self.rearm_window(client, &key).await;
        Decision::Denied { count }
    }

    /// Give a counter without a TTL a fresh window, so a lost EXPIRE cannot lock a
    /// client out for good.
    async fn rearm_window(&self, client: &str, key: &str) {
        match bounded(self.timeout, self.counters.has_expiry(key)).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(client, "admission window had no expiry; re-arming");
                if let Err(error) =
                    bounded(self.timeout, self.counters.expire(key, self.policy.window)).await
                {
                    warn!(client, %error, "failed to re-arm admission window");
                }
            }
            Err(error) => warn!(client, %error, "failed to read admission window expiry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, InMemoryCache};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn controller(counters: Arc<dyn CounterStore>) -> AdmissionController {
        AdmissionController::new(counters, CacheKeys::new("t"), AdmissionPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_request_in_window_is_denied() {
        let admission = controller(InMemoryCache::arc());

        for expected in 1..=5 {
            assert_eq!(
                admission.check("10.0.0.1").await,
                Decision::Allowed { count: expected }
            );
        }
        assert_eq!(admission.check("10.0.0.1").await, Decision::Denied { count: 6 });

        // Other clients have their own window.
        assert!(admission.check("10.0.0.2").await.is_allowed());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            admission.check("10.0.0.1").await,
            Decision::Allowed { count: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_fixed_not_sliding() {
        let admission = controller(InMemoryCache::arc());
        admission.check("c").await;

        // Requests late in the window do not extend it.
        tokio::time::advance(Duration::from_secs(59)).await;
        for _ in 0..4 {
            assert!(admission.check("c").await.is_allowed());
        }
        assert!(!admission.check("c").await.is_allowed());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(admission.check("c").await.is_allowed());
    }

    struct BrokenCounters;

    #[async_trait]
    impl CounterStore for BrokenCounters {
        async fn incr(&self, _key: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn has_expiry(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn fails_open_when_counter_is_down() {
        let admission = controller(Arc::new(BrokenCounters));
        for _ in 0..20 {
            assert_eq!(admission.check("c").await, Decision::Unchecked);
        }
    }

    /// Counts correctly, but the first EXPIRE is lost.
    #[derive(Default)]
    struct LossyExpiry {
        inner: InMemoryCache,
        lost_one: AtomicBool,
    }

    #[async_trait]
    impl CounterStore for LossyExpiry {
        async fn incr(&self, key: &str) -> Result<u64, CacheError> {
            self.inner.incr(key).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
            if !self.lost_one.swap(true, Ordering::SeqCst) {
                return Err(CacheError::Timeout);
            }
            self.inner.expire(key, ttl).await
        }

        async fn has_expiry(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.has_expiry(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_without_expiry_is_rearmed_once_it_denies() {
        let admission = controller(Arc::new(LossyExpiry::default()));

        for _ in 0..5 {
            assert!(admission.check("c").await.is_allowed());
        }
        assert_eq!(admission.check("c").await, Decision::Denied { count: 6 });

        // Still denied inside the re-armed window, admitted after it.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!admission.check("c").await.is_allowed());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(admission.check("c").await, Decision::Allowed { count: 1 });
    }
}
