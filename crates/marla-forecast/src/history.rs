//! RateHistory — bounded time series of observed request rates.
//!
//! Samples are appended in arrival order and never mutated. Samples older
//! than the retention window (measured from the newest sample) are evicted,
//! and the series never holds more than `max_samples` entries.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use marla_state::RateSample;

use crate::error::{ForecastError, ForecastResult};

/// Retention and locking parameters for the rate history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Samples older than this (relative to the newest one) are evicted.
    pub retention_secs: u64,
    /// Hard cap on the number of retained samples.
    pub max_samples: usize,
    /// Deadline for acquiring the history lock.
    pub lock_deadline_ms: u64,
    /// JSONL file written by the traffic logger; sampling is off when unset.
    pub rate_log: Option<PathBuf>,
    /// How often the sampler polls the rate log.
    pub sample_interval_secs: u64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retention_secs: 6 * 60 * 60,
            max_samples: 720,
            lock_deadline_ms: 500,
            rate_log: None,
            sample_interval_secs: 10,
        }
    }
}

/// Shared, lock-guarded rate history.
///
/// Cloning yields another handle to the same series.
#[derive(Debug, Clone)]
pub struct RateHistory {
    samples: Arc<Mutex<VecDeque<RateSample>>>,
    retention: Duration,
    max_samples: usize,
    lock_deadline: Duration,
}

impl RateHistory {
    pub fn new(retention: Duration, max_samples: usize, lock_deadline: Duration) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(max_samples.min(4096)))),
            retention,
            max_samples: max_samples.max(1),
            lock_deadline,
        }
    }

    pub fn from_settings(settings: &HistorySettings) -> Self {
        Self::new(
            Duration::from_secs(settings.retention_secs),
            settings.max_samples,
            Duration::from_millis(settings.lock_deadline_ms),
        )
    }

    async fn lock(&self) -> ForecastResult<MutexGuard<'_, VecDeque<RateSample>>> {
        tokio::time::timeout(self.lock_deadline, self.samples.lock())
            .await
            .map_err(|_| ForecastError::LockTimeout(self.lock_deadline))
    }

    /// Append one sample. Returns `false` if it was dropped for arriving
    /// out of order.
    pub async fn append(&self, sample: RateSample) -> ForecastResult<bool> {
        let mut samples = self.lock().await?;
        Ok(self.push(&mut samples, sample))
    }

    /// Append a batch of samples under a single lock acquisition.
    /// Returns how many were accepted.
    pub async fn extend(&self, batch: impl IntoIterator<Item = RateSample>) -> ForecastResult<usize> {
        let mut samples = self.lock().await?;
        let mut accepted = 0;
        for sample in batch {
            if self.push(&mut samples, sample) {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    fn push(&self, samples: &mut VecDeque<RateSample>, sample: RateSample) -> bool {
        if let Some(newest) = samples.back()
            && sample.timestamp < newest.timestamp
        {
            debug!(
                timestamp = %sample.timestamp,
                newest = %newest.timestamp,
                "dropping out-of-order rate sample"
            );
            return false;
        }

        samples.push_back(sample);

        while samples.len() > self.max_samples {
            samples.pop_front();
        }
        while let Some(oldest) = samples.front() {
            let expired = sample
                .timestamp
                .signed_duration_since(oldest.timestamp)
                .to_std()
                .is_ok_and(|age| age > self.retention);
            if !expired {
                break;
            }
            samples.pop_front();
        }
        true
    }

    /// Copy of the current series, oldest first.
    pub async fn snapshot(&self) -> ForecastResult<Vec<RateSample>> {
        let samples = self.lock().await?;
        Ok(samples.iter().copied().collect())
    }

    pub async fn len(&self) -> ForecastResult<usize> {
        Ok(self.lock().await?.len())
    }

    pub async fn is_empty(&self) -> ForecastResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Newest sample, if any.
    pub async fn latest(&self) -> ForecastResult<Option<RateSample>> {
        Ok(self.lock().await?.back().copied())
    }

    /// Hold the lock for `duration`, stalling every other caller.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn hold_lock(&self, duration: Duration) {
        let _guard = self.samples.lock().await;
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn sample_at(secs: i64, rate: f64) -> RateSample {
        let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        RateSample::new(ts, rate).unwrap()
    }

    fn history(retention_secs: u64, max: usize) -> RateHistory {
        RateHistory::new(
            Duration::from_secs(retention_secs),
            max,
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn append_keeps_arrival_order() {
        let h = history(3600, 10);
        h.append(sample_at(0, 10.0)).await.unwrap();
        h.append(sample_at(60, 20.0)).await.unwrap();

        let snap = h.snapshot().await.unwrap();
        let rates: Vec<f64> = snap.iter().map(|s| s.rate).collect();
        assert_eq!(rates, vec![10.0, 20.0]);
    }

    #[tokio::test]
    async fn evicts_beyond_max_samples() {
        let h = history(3600, 3);
        for i in 0..5 {
            h.append(sample_at(i * 60, i as f64)).await.unwrap();
        }
        let snap = h.snapshot().await.unwrap();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].rate, 2.0);
    }

    #[tokio::test]
    async fn evicts_beyond_retention_window() {
        let h = history(120, 100);
        h.append(sample_at(0, 1.0)).await.unwrap();
        h.append(sample_at(60, 2.0)).await.unwrap();
        h.append(sample_at(180, 3.0)).await.unwrap();

        let snap = h.snapshot().await.unwrap();
        let rates: Vec<f64> = snap.iter().map(|s| s.rate).collect();
        assert_eq!(rates, vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn drops_out_of_order_samples() {
        let h = history(3600, 10);
        assert!(h.append(sample_at(60, 1.0)).await.unwrap());
        assert!(!h.append(sample_at(0, 2.0)).await.unwrap());
        assert_eq!(h.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn extend_counts_accepted() {
        let h = history(3600, 10);
        let accepted = h
            .extend([sample_at(0, 1.0), sample_at(60, 2.0), sample_at(30, 9.0)])
            .await
            .unwrap();
        assert_eq!(accepted, 2);
        assert_eq!(h.latest().await.unwrap().unwrap().rate, 2.0);
    }

    #[tokio::test]
    async fn lock_timeout_is_reported() {
        let h = history(3600, 10);
        let _guard = h.samples.lock().await;

        let err = h.snapshot().await.unwrap_err();
        assert!(matches!(err, ForecastError::LockTimeout(_)));
    }

    #[tokio::test]
    async fn clones_share_the_series() {
        let h = history(3600, 10);
        let other = h.clone();
        other
            .append(RateSample::new(Utc::now() - TimeDelta::seconds(5), 7.0).unwrap())
            .await
            .unwrap();
        assert_eq!(h.len().await.unwrap(), 1);
    }
}
