// ── Sample sink ──
//
// Polling tasks persist decoded samples through `SampleSink`. The
// in-memory store keeps samples per (serial, category) in time order and
// prunes anything older than the configured history window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PollingConfig;
use crate::error::CoreError;
use crate::model::{SampleCategory, StoredSample};

/// How often the in-memory store drops expired samples.
pub const GC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Time-series store collaborator.
#[async_trait]
pub trait SampleSink: Send + Sync + 'static {
    /// Append one sample, keyed by appliance serial, category and time.
    async fn append(&self, record: StoredSample) -> Result<(), CoreError>;

    /// Samples at or after `since`, oldest first.
    async fn read_recent(
        &self,
        serial: &str,
        category: SampleCategory,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredSample>, CoreError>;
}

// ── MemorySampleStore ────────────────────────────────────────────

/// In-memory `SampleSink`.
#[derive(Default)]
pub struct MemorySampleStore {
    series: DashMap<(String, SampleCategory), Vec<StoredSample>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop samples older than `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for mut series in self.series.iter_mut() {
            let before = series.len();
            series.retain(|s| s.timestamp >= cutoff);
            removed += before - series.len();
        }
        self.series.retain(|_, samples| !samples.is_empty());
        removed
    }

    /// Drop every sample of an appliance.
    pub fn purge_appliance(&self, serial: &str) {
        self.series.retain(|(s, _), _| s != serial);
    }

    /// Total number of stored samples.
    pub fn len(&self) -> usize {
        self.series.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic garbage collector.
    ///
    /// The history window is read from `config` on every pass.
    pub fn spawn_gc(
        self: &Arc<Self>,
        config: watch::Receiver<PollingConfig>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(gc_task(Arc::clone(self), config, cancel))
    }
}

#[async_trait]
impl SampleSink for MemorySampleStore {
    async fn append(&self, record: StoredSample) -> Result<(), CoreError> {
        let key = (record.serial.clone(), record.category);
        let mut series = self.series.entry(key).or_default();
        // Keep time order even if a late write carries an older stamp.
        let at = series.partition_point(|s| s.timestamp <= record.timestamp);
        series.insert(at, record);
        Ok(())
    }

    async fn read_recent(
        &self,
        serial: &str,
        category: SampleCategory,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredSample>, CoreError> {
        let key = (serial.to_owned(), category);
        Ok(self
            .series
            .get(&key)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

async fn gc_task(
    store: Arc<MemorySampleStore>,
    config: watch::Receiver<PollingConfig>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(GC_INTERVAL);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let window = config.borrow().max_history();
                let cutoff = Utc::now() - window;
                let removed = store.prune_older_than(cutoff);
                debug!(removed, %cutoff, "sample gc pass");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Sample;
    use chrono::TimeZone;

    fn record(serial: &str, category: SampleCategory, secs: i64) -> StoredSample {
        StoredSample {
            serial: serial.into(),
            category,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            sample: Sample::Metrics(std::collections::BTreeMap::new()),
        }
    }

    #[tokio::test]
    async fn read_recent_filters_by_key_and_time() {
        let store = MemorySampleStore::new();
        store.append(record("0001", SampleCategory::Mp, 100)).await.unwrap();
        store.append(record("0001", SampleCategory::Mp, 200)).await.unwrap();
        store.append(record("0001", SampleCategory::Dp, 200)).await.unwrap();
        store.append(record("0002", SampleCategory::Mp, 200)).await.unwrap();

        let since = Utc.timestamp_opt(150, 0).unwrap();
        let recent = store
            .read_recent("0001", SampleCategory::Mp, since)
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].timestamp.timestamp(), 200);
    }

    #[tokio::test]
    async fn out_of_order_appends_stay_sorted() {
        let store = MemorySampleStore::new();
        store.append(record("0001", SampleCategory::Ifs, 300)).await.unwrap();
        store.append(record("0001", SampleCategory::Ifs, 100)).await.unwrap();

        let all = store
            .read_recent("0001", SampleCategory::Ifs, DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap();
        let stamps: Vec<_> = all.iter().map(|s| s.timestamp.timestamp()).collect();
        assert_eq!(stamps, vec![100, 300]);
    }

    #[tokio::test]
    async fn prune_drops_expired_samples() {
        let store = MemorySampleStore::new();
        store.append(record("0001", SampleCategory::Mp, 100)).await.unwrap();
        store.append(record("0001", SampleCategory::Mp, 500)).await.unwrap();

        let removed = store.prune_older_than(Utc.timestamp_opt(200, 0).unwrap());
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);

        store.purge_appliance("0001");
        assert!(store.is_empty());
    }
}
