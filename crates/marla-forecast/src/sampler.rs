//! RateSampler — background task feeding the rate history.
//!
//! Polls a [`RateLogSource`] on a fixed interval and appends whatever it
//! returns to the shared [`RateHistory`]. Each poll takes the history lock
//! once, for one batch append.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ForecastResult;
use crate::history::RateHistory;
use crate::source::RateLogSource;

pub struct RateSampler {
    source: RateLogSource,
    history: RateHistory,
    interval: Duration,
}

impl RateSampler {
    pub fn new(source: RateLogSource, history: RateHistory, interval: Duration) -> Self {
        Self {
            source,
            history,
            interval,
        }
    }

    /// Poll the source once and append the new samples.
    /// Returns how many samples the history accepted.
    ///
    /// The source offset only advances once the history has taken the
    /// batch; a failed append leaves the lines to be read again.
    pub async fn poll_once(&mut self) -> ForecastResult<usize> {
        let batch = self.source.read_batch().await?;
        let end = batch.end();
        if batch.samples.is_empty() {
            self.source.commit(end);
            return Ok(0);
        }
        let read = batch.samples.len();
        let accepted = self.history.extend(batch.samples).await?;
        self.source.commit(end);
        debug!(read, accepted, "rate samples ingested");
        Ok(accepted)
    }

    /// Run the sampling loop until shutdown signal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            path = %self.source.path().display(),
            interval_secs = self.interval.as_secs(),
            "rate sampler started"
        );

        // Load whatever is already on disk before the first tick.
        if let Err(e) = self.poll_once().await {
            warn!(error = %e, "initial rate log read failed");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "rate sampling failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("rate sampler shutting down");
                    break;
                }
            }
        }
    }
}
