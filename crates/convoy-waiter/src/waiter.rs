//! The polling loop.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use convoy_core::{DeployError, DeployResult};

use crate::progress::Progress;

/// Fixed poll interval used throughout a release.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Bounded polling of a remote resource.
///
/// Waiting is the only suspension point of a release. A wait is never
/// retried: exhausting the budget, a failure predicate, or a shutdown
/// signal during a sleep all abort with an error.
#[derive(Debug, Clone)]
pub struct Waiter {
    interval: Duration,
    timeout: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Waiter {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            shutdown: None,
        }
    }

    /// A waiter allowed exactly `polls` probes.
    pub fn with_polls(interval: Duration, polls: u32) -> Self {
        Self::new(interval, interval * polls)
    }

    /// Abort sleeps when `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: Option<watch::Receiver<bool>>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Same interval and shutdown signal, different budget.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            interval: self.interval,
            timeout,
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of probes the budget allows (at least one).
    pub fn max_polls(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        u32::try_from(self.timeout.as_millis() / interval)
            .unwrap_or(u32::MAX)
            .max(1)
    }

    /// Poll `probe` until `is_terminal` holds.
    ///
    /// Each round sleeps one interval first, then probes. `is_failure` is
    /// checked before `is_terminal`, so a status that is both (a completed
    /// rollback) fails. Probe errors propagate unchanged.
    pub async fn until<T, F, Fut>(
        &self,
        what: &str,
        mut probe: F,
        is_terminal: impl Fn(&T) -> bool,
        is_failure: impl Fn(&T) -> bool,
    ) -> DeployResult<T>
    where
        T: Progress,
        F: FnMut() -> Fut,
        Fut: Future<Output = DeployResult<T>>,
    {
        let max_polls = self.max_polls();
        debug!(what, max_polls, interval_secs = self.interval.as_secs(), "waiting");

        for attempt in 1..=max_polls {
            self.pause(what).await?;
            let value = probe().await?;
            info!(what, attempt, max_polls, status = %value.progress(), "polled");

            if is_failure(&value) {
                return Err(DeployError::Unrecoverable(format!(
                    "{what} failed: {}",
                    value.progress()
                )));
            }
            if is_terminal(&value) {
                return Ok(value);
            }
        }

        Err(DeployError::Timeout {
            what: what.to_string(),
            waited: self.interval * max_polls,
        })
    }

    /// Sleep one interval, aborting with `Interrupted` on shutdown.
    pub async fn pause(&self, what: &str) -> DeployResult<()> {
        let Some(shutdown) = &self.shutdown else {
            tokio::time::sleep(self.interval).await;
            return Ok(());
        };

        let mut shutdown = shutdown.clone();
        if *shutdown.borrow() {
            return Err(DeployError::Interrupted(what.to_string()));
        }

        let sleep = tokio::time::sleep(self.interval);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone; nobody can interrupt any more.
                        sleep.await;
                        return Ok(());
                    }
                    if *shutdown.borrow() {
                        return Err(DeployError::Interrupted(what.to_string()));
                    }
                }
            }
        }
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, Duration::from_secs(15 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Count(u32);

    impl Progress for Count {
        fn progress(&self) -> String {
            format!("count={}", self.0)
        }
    }

    fn counter() -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<DeployResult<Count>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let probe_calls = calls.clone();
        let probe = move || {
            let n = probe_calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(Count(n)))
        };
        (calls, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_on_terminal() {
        let waiter = Waiter::with_polls(Duration::from_secs(10), 10);
        let (calls, probe) = counter();
        let start = tokio::time::Instant::now();

        let value = waiter
            .until("counter", probe, |c| c.0 == 3, |_| false)
            .await
            .unwrap();

        assert_eq!(value.0, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Sleeps before every probe.
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn raises_on_failure_before_terminal() {
        let waiter = Waiter::with_polls(Duration::from_secs(10), 10);
        let (_, probe) = counter();

        let err = waiter
            .until("counter", probe, |c| c.0 >= 2, |c| c.0 == 2)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Unrecoverable(msg) if msg.contains("count=2")));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_budget() {
        let waiter = Waiter::with_polls(Duration::from_secs(10), 6);
        let (calls, probe) = counter();

        let err = waiter
            .until("counter", probe, |_| false, |_| false)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_propagate() {
        let waiter = Waiter::with_polls(Duration::from_secs(1), 5);
        let err = waiter
            .until(
                "broken",
                || std::future::ready(Err::<Count, _>(DeployError::unrecoverable("api down"))),
                |_| true,
                |_| false,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("api down"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_sleep() {
        let (tx, rx) = watch::channel(false);
        let waiter = Waiter::with_polls(Duration::from_secs(60), 10).with_shutdown(Some(rx));
        let (calls, probe) = counter();

        let handle = tokio::spawn(async move {
            waiter.until("counter", probe, |_| false, |_| false).await
        });
        tokio::time::sleep(Duration::from_secs(90)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, DeployError::Interrupted(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_does_not_interrupt() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let waiter = Waiter::with_polls(Duration::from_secs(5), 2).with_shutdown(Some(rx));
        waiter.pause("idle").await.unwrap();
    }

    #[test]
    fn poll_budget_from_timeout() {
        let waiter = Waiter::new(Duration::from_secs(10), Duration::from_secs(15 * 60));
        assert_eq!(waiter.max_polls(), 90);
        let tiny = Waiter::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(tiny.max_polls(), 1);
        assert_eq!(tiny.with_timeout(Duration::from_secs(60)).max_polls(), 6);
    }

    #[test]
    fn oversized_budget_saturates_poll_count() {
        let waiter = Waiter::new(Duration::from_millis(1), Duration::from_secs(u64::MAX / 2));
        assert_eq!(waiter.max_polls(), u32::MAX);
        let just_over = Waiter::new(
            Duration::from_millis(1),
            Duration::from_millis(u64::from(u32::MAX) + 5),
        );
        assert_eq!(just_over.max_polls(), u32::MAX);
    }
}
