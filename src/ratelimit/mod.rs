//! C2: per-key rate limiting with FIFO spacing and exponential backoff retry.
//!
//! [`RateLimiter`] enforces a minimum interval between actions sharing a key
//! and retries a failing action with `backoffFactor^attempt` second delays.
//! At most one action per key is in flight at any moment; callers arriving
//! while one runs join that key's FIFO queue in arrival order. Different keys
//! are fully independent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{CortexDxError, Result};

/// Default threshold after which an idle key is swept from the map.
pub const DEFAULT_IDLE_SWEEP: Duration = Duration::from_secs(10 * 60);

/// Per-call retry/backoff policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum interval enforced between two actions under the same key.
    pub min_interval: Duration,
    /// Number of retries attempted after the first failure.
    pub max_retries: u32,
    /// Exponential backoff base; sleep before retry `n` is `backoff_factor^n` seconds.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_retries: 3,
            backoff_factor: 2.0,
        }
    }
}

/// Point-in-time status for a single key's queue.
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    /// Number of callers currently waiting for their turn under this key.
    pub queue_length: usize,
    /// Timestamp of the last completed action, if any.
    pub last_request_time: Option<Instant>,
}

struct KeyState {
    /// Serializes access to one key: the holder of this lock is the single
    /// running or waiting action; the lock itself is the FIFO queue.
    gate: Arc<Mutex<()>>,
    last_request: Arc<Mutex<Option<Instant>>>,
    queue_length: Arc<std::sync::atomic::AtomicUsize>,
    last_activity: Arc<Mutex<Instant>>,
}

impl KeyState {
    fn new() -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            last_request: Arc::new(Mutex::new(None)),
            queue_length: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

/// Generates correlation ids of the shape `cortex_<epoch-ms>_<8-hex>` for
/// structured log correlation across a single `with_rate_limit` call.
fn next_correlation_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("cortex_{epoch_ms}_{n:08x}")
}

/// Governs rate-limited execution across an arbitrary set of string keys.
///
/// Cloning shares the same underlying key map; every clone observes the same
/// queues.
#[derive(Clone)]
pub struct RateLimiter {
    keys: Arc<Mutex<HashMap<String, Arc<KeyState>>>>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self {
            keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn key_state(&self, key: &str) -> Arc<KeyState> {
        let mut keys = self.keys.lock().await;
        Arc::clone(
            keys.entry(key.to_string())
                .or_insert_with(|| Arc::new(KeyState::new())),
        )
    }

    /// Run `action` under `key`'s FIFO queue, spacing and retrying per
    /// `config`. At most one action per key runs at a time; this call blocks
    /// (asynchronously) until it is this caller's turn.
    ///
    /// # Errors
    ///
    /// Returns [`CortexDxError::Timeout`] if `deadline` would be exceeded by
    /// the pre-action wait. Returns [`CortexDxError::RateLimitExhausted`] if
    /// the action still fails after `config.max_retries` retries.
    pub async fn with_rate_limit<F, Fut, T>(
        &self,
        key: &str,
        config: &RetryConfig,
        deadline: Option<Instant>,
        mut action: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let correlation_id = next_correlation_id();
        let state = self.key_state(key).await;
        state.queue_length.fetch_add(1, Ordering::SeqCst);
        tracing::info!(correlation_id = %correlation_id, key = %key, "rate limiter: accepted");

        let _permit = state.gate.lock().await;
        state.queue_length.fetch_sub(1, Ordering::SeqCst);
        *state.last_activity.lock().await = Instant::now();

        let wait_until = {
            let last = state.last_request.lock().await;
            last.map(|t| t + config.min_interval)
        };

        if let Some(until) = wait_until {
            let now = Instant::now();
            if until > now {
                if let Some(dl) = deadline {
                    if until > dl {
                        tracing::warn!(correlation_id = %correlation_id, key = %key, "rate limiter: deadline exceeded during wait");
                        return Err(anyhow::anyhow!(CortexDxError::Timeout(format!(
                            "rate-limit wait for key '{key}' would exceed deadline"
                        ))));
                    }
                }
                tracing::debug!(correlation_id = %correlation_id, key = %key, wait_ms = (until - now).as_millis() as u64, "rate limiter: waiting");
                tokio::time::sleep(until - now).await;
            }
        }

        tracing::info!(correlation_id = %correlation_id, key = %key, "rate limiter: running");

        let mut attempt: u32 = 0;
        loop {
            match action().await {
                Ok(value) => {
                    *state.last_request.lock().await = Some(Instant::now());
                    tracing::info!(correlation_id = %correlation_id, key = %key, attempt, "rate limiter: succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= config.max_retries {
                        *state.last_request.lock().await = Some(Instant::now());
                        tracing::warn!(correlation_id = %correlation_id, key = %key, attempt, error = %e, "rate limiter: failed, retries exhausted");
                        return Err(anyhow::anyhow!(CortexDxError::RateLimitExhausted {
                            key: key.to_string(),
                            last_error: e.to_string(),
                        }));
                    }
                    let sleep_secs = config.backoff_factor.powi(attempt as i32);
                    tracing::info!(correlation_id = %correlation_id, key = %key, attempt, sleep_secs, "rate limiter: retrying");
                    tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Status of a key's queue, or `None` if the key has never been seen.
    pub async fn status(&self, key: &str) -> Option<RateLimitStatus> {
        let keys = self.keys.lock().await;
        let state = keys.get(key)?;
        Some(RateLimitStatus {
            queue_length: state.queue_length.load(Ordering::SeqCst),
            last_request_time: *state.last_request.lock().await,
        })
    }

    /// Remove keys whose queue is empty and whose last activity precedes
    /// `idle_threshold`. In-flight or non-empty queues are never swept.
    pub async fn sweep_idle(&self, idle_threshold: Duration) -> usize {
        let mut keys = self.keys.lock().await;
        let mut to_remove = Vec::new();
        for (key, state) in keys.iter() {
            if state.queue_length.load(Ordering::SeqCst) > 0 {
                continue;
            }
            if state.gate.try_lock().is_err() {
                continue;
            }
            let last_activity = *state.last_activity.lock().await;
            if last_activity.elapsed() >= idle_threshold {
                to_remove.push(key.clone());
            }
        }
        let count = to_remove.len();
        for key in to_remove {
            keys.remove(&key);
        }
        count
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn first_call_for_key_runs_immediately() {
        let limiter = RateLimiter::new();
        let config = RetryConfig {
            min_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let started = Instant::now();
        let result: Result<()> = limiter
            .with_rate_limit("user:test", &config, None, || async { Ok(()) })
            .await;
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn second_call_waits_min_interval() {
        let limiter = RateLimiter::new();
        let config = RetryConfig {
            min_interval: Duration::from_millis(100),
            ..Default::default()
        };
        limiter
            .with_rate_limit("k", &config, None, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();

        let started = Instant::now();
        limiter
            .with_rate_limit("k", &config, None, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let limiter = RateLimiter::new();
        let config = RetryConfig {
            min_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let started = Instant::now();
        limiter
            .with_rate_limit("a", &config, None, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        limiter
            .with_rate_limit("b", &config, None, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn retries_exhaust_and_surface_last_error() {
        let limiter = RateLimiter::new();
        let config = RetryConfig {
            min_interval: Duration::ZERO,
            max_retries: 2,
            backoff_factor: 1.0,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let result: Result<()> = limiter
            .with_rate_limit("k", &config, None, move || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("boom"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved_per_key() {
        let limiter = Arc::new(RateLimiter::new());
        let config = Arc::new(RetryConfig {
            min_interval: Duration::ZERO,
            ..Default::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = Arc::clone(&limiter);
            let config = Arc::clone(&config);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter
                    .with_rate_limit("seq", &config, None, || {
                        let order = Arc::clone(&order);
                        async move {
                            order.lock().await.push(i);
                            Ok::<_, anyhow::Error>(())
                        }
                    })
                    .await
                    .unwrap();
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn status_reports_none_for_unknown_key() {
        let limiter = RateLimiter::new();
        assert!(limiter.status("nope").await.is_none());
    }

    #[tokio::test]
    async fn sweep_idle_removes_only_idle_empty_keys() {
        let limiter = RateLimiter::new();
        let config = RetryConfig::default();
        limiter
            .with_rate_limit("stale", &config, None, || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        let removed = limiter.sweep_idle(Duration::ZERO).await;
        assert_eq!(removed, 1);
        assert!(limiter.status("stale").await.is_none());
    }
}
