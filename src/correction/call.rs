//! Timeout-bounded, retried provider calls.

use super::{CorrectionProvider, CorrectionRequest, CorrectionResponse};
use crate::error::{Error, Result};
use crate::orchestrator::CancellationToken;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How provider calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(45),
        }
    }
}

/// Fixed set of worker threads running provider calls for one run.
///
/// A call that outlives its timeout keeps its worker busy until the provider
/// returns. Later calls queue behind it instead of spawning more threads, and
/// queued calls whose caller gave up, or whose run was cancelled, never start.
pub struct CallPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl CallPool {
    /// Create a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("docqa-correction-{}", i))
            .panic_handler(|_| log::error!("correction provider panicked"))
            .build()
            .map_err(|e| Error::Other(format!("failed to start correction workers: {}", e)))?;
        Ok(Self { pool, workers })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// One attempt, abandoned after `timeout`. A late answer is dropped.
    fn call_once(
        &self,
        provider: &Arc<dyn CorrectionProvider>,
        request: &CorrectionRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CorrectionResponse> {
        let (tx, rx) = bounded(1);
        let abandoned = Arc::new(AtomicBool::new(false));

        let worker_abandoned = Arc::clone(&abandoned);
        let worker_cancel = cancel.clone();
        let worker_provider = Arc::clone(provider);
        let worker_request = request.clone();
        self.pool.spawn(move || {
            if worker_abandoned.load(Ordering::SeqCst) || worker_cancel.is_cancelled() {
                return;
            }
            let result = worker_provider.correct(&worker_request);
            // Receiver is gone after a timeout
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::SeqCst);
                Err(Error::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::CorrectionProvider(
                "provider worker exited without answering".to_string(),
            )),
        }
    }

    /// Call the provider with retries and exponential backoff.
    ///
    /// Returns the last error once every attempt has failed. No further
    /// attempt starts after `cancel` fires.
    pub fn call(
        &self,
        provider: &Arc<dyn CorrectionProvider>,
        request: &CorrectionRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<CorrectionResponse> {
        let attempts = policy.max_attempts.max(1);
        let mut delay = policy.backoff;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(Error::CorrectionProvider("run cancelled".to_string()));
            }
            match self.call_once(provider, request, policy.timeout, cancel) {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log::warn!(
                        "{} attempt {}/{} failed for {} correction: {}",
                        provider.name(),
                        attempt,
                        attempts,
                        request.kind,
                        e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts && !delay.is_zero() {
                thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
        }

        Err(last_error.unwrap_or_else(|| Error::CorrectionProvider("no attempt was made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::{CorrectionKind, CorrectionTarget};
    use crossbeam_channel::{Receiver, Sender};
    use std::sync::atomic::AtomicU32;

    fn request() -> CorrectionRequest {
        CorrectionRequest::new(CorrectionKind::Formatting, CorrectionTarget::Page { page: 1 }, "#Title", 0.5)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    fn pool() -> CallPool {
        CallPool::new(2).unwrap()
    }

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl CorrectionProvider for Flaky {
        fn correct(&self, _request: &CorrectionRequest) -> Result<CorrectionResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(Error::CorrectionProvider("503".into()))
            } else {
                Ok(CorrectionResponse::new("# Title", 0.9))
            }
        }
    }

    struct Slow;

    impl CorrectionProvider for Slow {
        fn correct(&self, _request: &CorrectionRequest) -> Result<CorrectionResponse> {
            thread::sleep(Duration::from_millis(300));
            Ok(CorrectionResponse::new("late", 1.0))
        }
    }

    #[test]
    fn test_succeeds_after_retries() {
        let flaky = Arc::new(Flaky { failures: 2, calls: AtomicU32::new(0) });
        let provider: Arc<dyn CorrectionProvider> = flaky.clone();
        let response = pool().call(&provider, &request(), &fast_policy(), &CancellationToken::new()).unwrap();
        assert_eq!(response.corrected_snippet, "# Title");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let flaky = Arc::new(Flaky { failures: 10, calls: AtomicU32::new(0) });
        let provider: Arc<dyn CorrectionProvider> = flaky.clone();
        let err = pool().call(&provider, &request(), &fast_policy(), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::CorrectionProvider(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_timeout_is_failed_attempt() {
        let provider: Arc<dyn CorrectionProvider> = Arc::new(Slow);
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
            timeout: Duration::from_millis(20),
        };
        let err = pool().call(&provider, &request(), &policy, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    /// Blocks every call until released, counting how many started.
    struct Hung {
        started: AtomicU32,
        release: Receiver<()>,
    }

    impl Hung {
        fn new() -> (Arc<Self>, Sender<()>) {
            let (tx, rx) = crossbeam_channel::unbounded();
            (Arc::new(Self { started: AtomicU32::new(0), release: rx }), tx)
        }
    }

    impl CorrectionProvider for Hung {
        fn correct(&self, _request: &CorrectionRequest) -> Result<CorrectionResponse> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv_timeout(Duration::from_secs(10));
            Ok(CorrectionResponse::new("late", 1.0))
        }
    }

    #[test]
    fn test_hung_provider_bounded_by_pool() {
        let (hung, release) = Hung::new();
        let provider: Arc<dyn CorrectionProvider> = hung.clone();
        let pool = CallPool::new(2).unwrap();
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
            timeout: Duration::from_millis(20),
        };

        for _ in 0..5 {
            let err = pool.call(&provider, &request(), &policy, &CancellationToken::new()).unwrap_err();
            assert!(matches!(err, Error::Timeout(_)));
        }
        // 15 attempts timed out, but at most the two workers entered the provider
        let started = hung.started.load(Ordering::SeqCst);
        assert!((1..=2).contains(&started), "started {}", started);
        assert_eq!(pool.workers(), 2);
        drop(release);
    }

    #[test]
    fn test_cancelled_call_never_reaches_provider() {
        let flaky = Arc::new(Flaky { failures: 0, calls: AtomicU32::new(0) });
        let provider: Arc<dyn CorrectionProvider> = flaky.clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(pool().call(&provider, &request(), &fast_policy(), &cancel).is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }
}
