use async_trait::async_trait;
use log::warn;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use crate::models::chat::HistoryEntry;
use super::{ HistoryStore, StoreError };

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Bounded retry with exponential backoff, applied only to transient store errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, StoreError>
        where F: FnMut() -> Fut, Fut: Future<Output = Result<T, StoreError>>
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    warn!("{} attempt {} failed: {}", operation, attempt, e);
                    if attempt >= self.max_attempts {
                        return Err(StoreError::Exhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e);
                }
            }
        }
    }
}

/// Wraps any [`HistoryStore`] so every operation goes through a [`RetryPolicy`].
/// Around a store that never reports transient errors this is a pass-through.
pub struct RetryingStore {
    inner: Arc<dyn HistoryStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn HistoryStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl HistoryStore for RetryingStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.policy.run("init_schema", move || inner.init_schema()).await
    }

    async fn log_conversation(
        &self,
        session_id: &str,
        user_input: &str,
        ai_response: &str
    ) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.policy.run("log_conversation", move || {
            inner.log_conversation(session_id, user_input, ai_response)
        }).await
    }

    async fn log_feedback(
        &self,
        session_id: Option<&str>,
        query: &str,
        response: &str,
        helpful: bool
    ) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.policy.run("log_feedback", move || {
            inner.log_feedback(session_id, query, response, helpful)
        }).await
    }

    async fn get_history(
        &self,
        session_id: &str,
        limit: usize
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = &self.inner;
        self.policy.run("get_history", move || inner.get_history(session_id, limit)).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{ AtomicU32, Ordering };
    use tokio::time::Instant;

    /// Fails the first `failures` calls of every operation with `error`.
    struct FlakyStore {
        failures: u32,
        transient: bool,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32, transient: bool) -> Arc<Self> {
            Arc::new(Self { failures, transient, calls: AtomicU32::new(0) })
        }

        fn attempt(&self) -> Result<(), StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.transient {
                    return Err(StoreError::Transient("connection refused".into()));
                }
                return Err(StoreError::Query("null value violates not-null constraint".into()));
            }
            Ok(())
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HistoryStore for FlakyStore {
        async fn init_schema(&self) -> Result<(), StoreError> {
            self.attempt()
        }

        async fn log_conversation(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
            self.attempt()
        }

        async fn log_feedback(
            &self,
            _: Option<&str>,
            _: &str,
            _: &str,
            _: bool
        ) -> Result<(), StoreError> {
            self.attempt()
        }

        async fn get_history(&self, _: &str, _: usize) -> Result<Vec<HistoryEntry>, StoreError> {
            self.attempt().map(|_| Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let flaky = FlakyStore::new(2, true);
        let store = RetryingStore::new(flaky.clone(), RetryPolicy::default());

        let started = Instant::now();
        store.log_feedback(Some("s"), "q", "r", true).await.unwrap();

        assert_eq!(flaky.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let flaky = FlakyStore::new(u32::MAX, true);
        let store = RetryingStore::new(flaky.clone(), RetryPolicy::default());

        let started = Instant::now();
        let err = store.log_feedback(None, "q", "r", false).await.unwrap_err();

        assert_eq!(flaky.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(7));
        assert!(matches!(err, StoreError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_are_not_retried() {
        let flaky = FlakyStore::new(1, false);
        let store = RetryingStore::new(flaky.clone(), RetryPolicy::default());

        let started = Instant::now();
        let err = store.log_conversation("s", "hi", "hello").await.unwrap_err();

        assert_eq!(flaky.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn every_operation_is_wrapped() {
        let flaky = FlakyStore::new(1, true);
        let store = RetryingStore::new(flaky.clone(), RetryPolicy::default());

        store.init_schema().await.unwrap();
        assert_eq!(flaky.calls(), 2);
        store.get_history("s", 5).await.unwrap();
        assert_eq!(flaky.calls(), 3);
    }

    #[test]
    fn policy_always_allows_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::from_millis(10)).max_attempts(), 1);
    }
}
