use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mnemo_backend::{BackendError, MemoryBackend};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Whether the memory backend is believed reachable.
///
/// Starts pessimistic. Set by health checks, cleared when a call fails with a
/// transport-level or module-disabled error.
#[derive(Debug, Clone, Default)]
pub struct Availability {
    up: Arc<AtomicBool>,
}

impl Availability {
    pub fn new(initial: bool) -> Self {
        Self {
            up: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    pub fn set(&self, available: bool) {
        let was = self.up.swap(available, Ordering::AcqRel);
        if was != available {
            if available {
                tracing::info!("memory backend available");
            } else {
                tracing::warn!("memory backend unavailable");
            }
        }
    }

    /// Mark down on errors that mean the backend is gone, not just unhappy with one request.
    pub fn note_failure(&self, err: &BackendError) {
        if err.is_unavailable() {
            self.set(false);
        }
    }

    /// Check health up to `attempts` times, sleeping `backoff` between tries.
    pub async fn check_health(
        &self,
        backend: &dyn MemoryBackend,
        attempts: u32,
        backoff: Duration,
    ) -> bool {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match backend.health().await {
                Ok(()) => {
                    self.set(true);
                    return true;
                }
                Err(e) => {
                    tracing::debug!(attempt, attempts, error = %e, "health check failed");
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        self.set(false);
        false
    }

    /// Re-check once per `interval` until cancelled.
    pub fn spawn_recheck(
        &self,
        backend: Arc<dyn MemoryBackend>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("health recheck stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        this.check_health(backend.as_ref(), 1, Duration::ZERO).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_backend::mock::MockBackend;

    #[tokio::test(start_paused = true)]
    async fn health_check_retries_then_succeeds() {
        let mock = MockBackend::new().with_health_failures(2);
        let a = Availability::default();
        assert!(a.check_health(&mock, 3, Duration::from_millis(2000)).await);
        assert!(a.is_available());
        assert_eq!(mock.health_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_gives_up_after_attempts() {
        let mock = MockBackend::new().with_health_failures(5);
        let a = Availability::new(true);
        assert!(!a.check_health(&mock, 3, Duration::from_millis(2000)).await);
        assert!(!a.is_available());
        assert_eq!(mock.health_calls(), 3);
    }

    #[test]
    fn only_unavailable_errors_mark_down() {
        let a = Availability::new(true);
        a.note_failure(&BackendError::RequestFailed("400".into()));
        assert!(a.is_available());
        a.note_failure(&BackendError::ModuleDisabled("503".into()));
        assert!(!a.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn recheck_recovers_availability() {
        let mock = Arc::new(MockBackend::new());
        mock.set_healthy(false);
        let a = Availability::default();
        let token = CancellationToken::new();
        let handle = a.spawn_recheck(mock.clone(), Duration::from_secs(60), token.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!a.is_available());

        mock.set_healthy(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(a.is_available());

        token.cancel();
        handle.await.unwrap();
    }
}
