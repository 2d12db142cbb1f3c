

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::providers::SignalError;


struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every caller of external providers. Waiters
/// sleep until a token is due instead of spinning.
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_sec: rate_per_sec.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate_per_sec)
            };
            debug!("Rate limited, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn available_tokens(&self) -> f64 {
        self.state.lock().await.tokens
    }
}

/// Rate limit plus per-call timeout around one external call.
#[derive(Clone)]
pub struct SignalGuard {
    limiter: Arc<TokenBucket>,
    timeout: Duration,
}

impl SignalGuard {
    pub fn new(limiter: Arc<TokenBucket>, timeout: Duration) -> Self {
        Self { limiter, timeout }
    }

    pub async fn call<T, F>(&self, fut: F) -> Result<T, SignalError>
    where
        F: Future<Output = Result<T, SignalError>>,
    {
        self.limiter.acquire().await;
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SignalError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_wait() {
        let bucket = TokenBucket::new(20.0, 2);
        let start = std::time::Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(30));

        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_guard_times_out() {
        let guard = SignalGuard::new(Arc::new(TokenBucket::new(100.0, 5)), Duration::from_millis(20));
        let result: Result<(), SignalError> = guard
            .call(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(SignalError::Timeout(20))));
    }

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let guard = SignalGuard::new(Arc::new(TokenBucket::new(100.0, 5)), Duration::from_secs(1));
        let value = guard.call(async { Ok::<_, SignalError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
