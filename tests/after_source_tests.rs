// Chained tiers: wait for the source tier to cover the window, bounded by a wait limit

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rollupd::aggregator::{AfterSource, Aggregatable, Scheduler, TickOutcome};
use rollupd::checkpoint::MemoryCheckpointStore;
use tokio::time::Instant;

const MINUTE: i64 = 300_000;
const HOUR: i64 = 3_600_000;

#[derive(Clone, Default)]
struct Counter {
    calls: Arc<AtomicUsize>,
}

impl Counter {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Aggregatable for Counter {
    async fn do_work(&self, _start: i64, _end: i64) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Minute tier whose persisted checkpoint is `checkpoint`.
fn minute_tier(checkpoint: i64) -> Scheduler<Counter, MemoryCheckpointStore> {
    let store = MemoryCheckpointStore::new().with_checkpoint("host_minute", checkpoint);
    Scheduler::new("host_minute", MINUTE, 3, Counter::default(), Arc::new(store))
}

#[tokio::test(start_paused = true)]
async fn runs_at_once_when_source_covers_window() {
    let source = minute_tier(HOUR - MINUTE);
    assert_eq!(
        source.run_once(HOUR).await.unwrap(),
        TickOutcome::Aggregated {
            start: HOUR - MINUTE,
            end: HOUR
        }
    );
    let hourly = Counter::default();
    let gated = AfterSource::new(hourly.clone(), source.status(), Duration::from_secs(3600));

    let began = Instant::now();
    assert!(gated.do_work(0, HOUR).await.unwrap());

    assert_eq!(hourly.calls(), 1);
    assert!(began.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn waits_for_source_backlog_to_drain() {
    let source = minute_tier(HOUR - 2 * MINUTE);
    source.run_once(HOUR).await.unwrap();
    let status = source.status();
    assert_eq!(status.last_aggregated_end_time(), HOUR - MINUTE);

    let catch_up = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        source.run_once(HOUR).await.unwrap()
    });
    let hourly = Counter::default();
    let gated = AfterSource::new(hourly.clone(), status.clone(), Duration::from_secs(3600));

    let began = Instant::now();
    assert!(gated.do_work(0, HOUR).await.unwrap());

    assert_eq!(hourly.calls(), 1);
    assert_eq!(status.last_aggregated_end_time(), HOUR);
    assert!(began.elapsed() >= Duration::from_secs(10));
    assert!(began.elapsed() < Duration::from_secs(60));
    assert_eq!(
        catch_up.await.unwrap(),
        TickOutcome::Aggregated {
            start: HOUR - MINUTE,
            end: HOUR
        }
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_source_does_not_block_past_wait_limit() {
    let source = minute_tier(HOUR - 2 * MINUTE);
    source.run_once(HOUR).await.unwrap();
    let hourly = Counter::default();
    let gated = AfterSource::new(hourly.clone(), source.status(), Duration::from_secs(30));

    let began = Instant::now();
    assert!(gated.do_work(0, HOUR).await.unwrap());

    assert_eq!(hourly.calls(), 1);
    assert!(began.elapsed() >= Duration::from_secs(30));
    assert!(began.elapsed() < Duration::from_secs(32));
}
