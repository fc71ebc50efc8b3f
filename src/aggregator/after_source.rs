// Chained tiers: hold a window until the tier it reads from has covered it,
// for at most `max_wait`. After that the window runs on whatever is stored.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Aggregatable, AggregatorStatus};

const SOURCE_POLL: Duration = Duration::from_secs(1);

pub struct AfterSource<A> {
    inner: A,
    source: Arc<AggregatorStatus>,
    max_wait: Duration,
}

impl<A: Aggregatable> AfterSource<A> {
    pub fn new(inner: A, source: Arc<AggregatorStatus>, max_wait: Duration) -> Self {
        Self {
            inner,
            source,
            max_wait,
        }
    }
}

impl<A: Aggregatable> Aggregatable for AfterSource<A> {
    async fn do_work(&self, start: i64, end: i64) -> anyhow::Result<bool> {
        let deadline = tokio::time::Instant::now() + self.max_wait;
        loop {
            let covered = self.source.last_aggregated_end_time();
            if covered >= end {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    source = self.source.id(),
                    covered, end, "source tier still behind, aggregating stored rows"
                );
                break;
            }
            debug!(source = self.source.id(), covered, end, "waiting for source tier");
            tokio::time::sleep(SOURCE_POLL).await;
        }
        self.inner.do_work(start, end).await
    }
}
