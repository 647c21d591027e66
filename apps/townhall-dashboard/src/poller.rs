use std::collections::BTreeMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::section::Section;

/// Handle to one repeating timer. Aborts the timer task when stopped or dropped.
#[derive(Debug)]
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    /// Calls `on_tick` every `period`, first after one full period. The timer
    /// ends by itself once `on_tick` returns `false`.
    pub fn every<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let first = time::Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Section → timer registry. Holds at most one timer per section.
#[derive(Debug, Default)]
pub struct PollerRegistry {
    timers: BTreeMap<Section, Timer>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a poller for `section` unless one already exists.
    /// Returns `true` when a new timer was started.
    pub fn start<F>(&mut self, section: Section, period: Duration, on_tick: F) -> bool
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if self.timers.contains_key(&section) {
            tracing::debug!(%section, "poller already running");
            return false;
        }
        self.timers.insert(section, Timer::every(period, on_tick));
        tracing::debug!(%section, period_ms = period.as_millis() as u64, "poller started");
        true
    }

    /// Safe to call for a section without a poller.
    pub fn stop(&mut self, section: Section) -> bool {
        match self.timers.remove(&section) {
            Some(timer) => {
                timer.stop();
                tracing::debug!(%section, "poller stopped");
                true
            }
            None => false,
        }
    }

    /// Returns how many timers were cancelled.
    pub fn stop_all(&mut self) -> usize {
        let timers = std::mem::take(&mut self.timers);
        let n = timers.len();
        for timer in timers.into_values() {
            timer.stop();
        }
        n
    }

    pub fn is_active(&self, section: Section) -> bool {
        self.timers.contains_key(&section)
    }

    pub fn active(&self) -> Vec<Section> {
        self.timers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(hits: &Arc<AtomicUsize>) -> impl FnMut() -> bool + Send + 'static {
        let hits = hits.clone();
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_keeps_one_timer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut reg = PollerRegistry::new();
        assert!(reg.start(Section::Events, Duration::from_secs(30), counting(&hits)));
        assert!(!reg.start(Section::Events, Duration::from_secs(30), counting(&hits)));
        assert_eq!(reg.len(), 1);

        time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_period() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut reg = PollerRegistry::new();
        reg.start(Section::Residents, Duration::from_secs(10), counting(&hits));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_cancels_every_timer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut reg = PollerRegistry::new();
        reg.start(Section::Residents, Duration::from_secs(5), counting(&hits));
        reg.start(Section::Events, Duration::from_secs(5), counting(&hits));
        assert!(!reg.stop(Section::Users));
        assert_eq!(reg.stop_all(), 2);
        assert!(reg.is_empty());
        assert_eq!(reg.stop_all(), 0);

        time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn period_counts_from_start_not_first_poll() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut reg = PollerRegistry::new();
        reg.start(Section::Events, Duration::from_secs(10), counting(&hits));
        // The timer task has not been polled yet when the clock moves.
        time::advance(Duration::from_secs(4)).await;
        settle().await;
        time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ends_when_callback_declines() {
        let timer = Timer::every(Duration::from_secs(1), || false);
        time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert!(timer.is_finished());
    }
}
