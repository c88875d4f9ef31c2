//! Background refresh timer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::MAX_POLL_INTERVAL_MINUTES;

/// The work performed on every tick.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

enum PollState {
    Stopped,
    Running {
        interval: Duration,
        task: JoinHandle<()>,
    },
}

/// Runs a refresh callback on a fixed interval until stopped.
pub struct PollingRefresher {
    refresh: RefreshFn,
    state: Mutex<PollState>,
}

impl PollingRefresher {
    pub fn new(refresh: RefreshFn) -> Self {
        Self {
            refresh,
            state: Mutex::new(PollState::Stopped),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start polling every `interval_minutes`, capped at one year. Zero leaves
    /// polling stopped.
    pub fn start(&self, interval_minutes: u64) {
        if interval_minutes == 0 {
            self.stop();
            info!("polling disabled");
            return;
        }
        let minutes = interval_minutes.min(MAX_POLL_INTERVAL_MINUTES);
        self.start_every(Duration::from_secs(minutes.saturating_mul(60)));
    }

    /// Start polling with an arbitrary period, replacing any running timer.
    ///
    /// The first refresh happens one full period after the call.
    pub fn start_every(&self, interval: Duration) {
        let refresh = self.refresh.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("polling tick");
                refresh().await;
            }
        });

        let previous = std::mem::replace(&mut *self.lock(), PollState::Running { interval, task });
        if let PollState::Running { task, .. } = previous {
            task.abort();
        }
        info!(interval_secs = interval.as_secs(), "polling started");
    }

    /// Stop the timer. Safe to call when already stopped.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock(), PollState::Stopped);
        if let PollState::Running { task, .. } = previous {
            task.abort();
            debug!("polling stopped");
        }
    }

    pub fn restart(&self, interval_minutes: u64) {
        self.stop();
        self.start(interval_minutes);
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), PollState::Running { .. })
    }

    pub fn interval(&self) -> Option<Duration> {
        match &*self.lock() {
            PollState::Running { interval, .. } => Some(*interval),
            PollState::Stopped => None,
        }
    }
}

impl Drop for PollingRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (PollingRefresher, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let refresh: RefreshFn = Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        (PollingRefresher::new(refresh), count)
    }

    #[tokio::test]
    async fn test_zero_interval_stays_stopped() {
        let (poller, _) = counting();
        poller.start(0);
        assert!(!poller.is_running());
        assert_eq!(poller.interval(), None);
    }

    #[tokio::test]
    async fn test_start_sets_interval() {
        let (poller, count) = counting();
        poller.start(5);
        assert!(poller.is_running());
        assert_eq!(poller.interval(), Some(Duration::from_secs(300)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        poller.stop();
    }

    #[tokio::test]
    async fn test_ticks_invoke_refresh() {
        let (poller, count) = counting();
        poller.start_every(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        poller.stop();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_stop_halts_refresh_and_is_idempotent() {
        let (poller, count) = counting();
        poller.start_every(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(70)).await;
        poller.stop();
        poller.stop();
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_restart_replaces_interval() {
        let (poller, _) = counting();
        poller.start(5);
        poller.restart(10);
        assert_eq!(poller.interval(), Some(Duration::from_secs(600)));
        poller.restart(0);
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_huge_interval_is_capped() {
        let (poller, _) = counting();
        poller.start(u64::MAX);
        assert!(poller.is_running());
        assert_eq!(
            poller.interval(),
            Some(Duration::from_secs(MAX_POLL_INTERVAL_MINUTES * 60))
        );
        tokio::task::yield_now().await;
        assert!(poller.is_running());
        poller.stop();
    }
}
