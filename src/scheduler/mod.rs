use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One unit of scheduled work.
pub trait Cycle: Send + Sync + 'static {
    /// Summary returned by each run.
    type Report: Send;

    /// Runs the work to completion. Must not fail: errors are handled inside.
    fn run_once(&self) -> impl Future<Output = Self::Report> + Send;
}

/// Runs a [`Cycle`] back to back with a fixed pause between runs.
///
/// The pause is measured from the end of one run to the start of the next, so
/// runs never overlap. Cancellation is observed between runs and during the
/// pause; a run in progress is always allowed to finish.
pub struct Scheduler<C> {
    cycle: C,
    interval: Duration,
    cancel: CancellationToken,
}

impl<C: Cycle> Scheduler<C> {
    pub fn new(cycle: C, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            cycle,
            interval,
            cancel,
        }
    }

    /// Runs until cancelled, returning the number of completed runs.
    pub async fn run(self) -> u64 {
        let mut runs = 0u64;

        info!(interval = ?self.interval, "scheduler started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            runs += 1;
            debug!(run = runs, "starting pipeline run");
            self.cycle.run_once().await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(runs, "scheduler stopped");

        runs
    }

    /// Spawns [`Scheduler::run`] on the current runtime.
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;

    /// Records start/end instants and takes `work` of simulated time.
    struct Recorder {
        work: Duration,
        spans: Arc<parking_lot::Mutex<Vec<(Instant, Instant)>>>,
        running: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn new(work: Duration) -> Self {
            Self {
                work,
                spans: Arc::new(parking_lot::Mutex::new(Vec::new())),
                running: Arc::new(AtomicBool::new(false)),
                overlaps: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Cycle for Recorder {
        type Report = ();

        async fn run_once(&self) {
            if self.running.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            let start = Instant::now();
            tokio::time::sleep(self.work).await;
            self.spans.lock().push((start, Instant::now()));
            self.running.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_runs_in_three_minutes() {
        let cycle = Recorder::new(Duration::from_secs(1));
        let spans = Arc::clone(&cycle.spans);
        let overlaps = Arc::clone(&cycle.overlaps);
        let cancel = CancellationToken::new();

        let handle = Scheduler::new(cycle, Duration::from_secs(60), cancel.clone()).spawn();

        // Runs start at 0s, 61s and 122s; the next would start at 183s.
        tokio::time::sleep(Duration::from_secs(180)).await;
        cancel.cancel();

        let runs = handle.await.expect("scheduler task");
        assert_eq!(runs, 3);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);

        let spans = spans.lock();
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            let (_, prev_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start >= prev_end + Duration::from_secs(60));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_interrupt_a_run() {
        let cycle = Recorder::new(Duration::from_secs(30));
        let spans = Arc::clone(&cycle.spans);
        let cancel = CancellationToken::new();

        let handle = Scheduler::new(cycle, Duration::from_secs(60), cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let runs = handle.await.expect("scheduler task");
        assert_eq!(runs, 1);
        assert_eq!(spans.lock().len(), 1, "in-flight run completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_never_runs() {
        let cycle = Recorder::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let runs = Scheduler::new(cycle, Duration::from_secs(60), cancel).run().await;
        assert_eq!(runs, 0);
    }
}
