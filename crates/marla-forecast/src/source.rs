//! RateLogSource — tails the traffic logger's JSONL rate file.
//!
//! Each line is one object: `{"timestamp": "<ISO-8601>", "rps": <number>}`.
//! Timestamps without an offset are read as UTC. The source remembers the
//! byte offset it has consumed and only returns complete lines written
//! since the last committed batch. A file that shrinks is assumed to have
//! been rotated and is re-read from the start.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use marla_state::RateSample;

use crate::error::ForecastResult;

#[derive(Debug, Deserialize)]
struct RateLine {
    timestamp: String,
    rps: f64,
}

/// Samples read past the committed offset.
///
/// The lines stay unconsumed until the batch is passed to
/// [`RateLogSource::commit`], so a batch that could not be stored is read
/// again on the next poll.
#[derive(Debug, Default)]
pub struct RateBatch {
    pub samples: Vec<RateSample>,
    end: u64,
}

impl RateBatch {
    /// Byte offset just past the last complete line in this batch.
    pub fn end(&self) -> u64 {
        self.end
    }
}

#[derive(Debug)]
pub struct RateLogSource {
    path: PathBuf,
    offset: u64,
}

impl RateLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every complete line appended after the committed offset.
    ///
    /// A missing file yields an empty batch rather than an error, so the
    /// sampler can start before the traffic logger does.
    pub async fn read_batch(&mut self) -> ForecastResult<RateBatch> {
        let empty = RateBatch {
            samples: Vec::new(),
            end: self.offset,
        };
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "rate log not present yet");
                return Ok(empty);
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            debug!(path = %self.path.display(), len, offset = self.offset, "rate log truncated, rereading");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(RateBatch {
                samples: Vec::new(),
                end: self.offset,
            });
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf).await?;

        // Leave a trailing partial line for the next read.
        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(idx) => idx + 1,
            None => {
                return Ok(RateBatch {
                    samples: Vec::new(),
                    end: self.offset,
                });
            }
        };
        let end = self.offset + complete as u64;

        let text = String::from_utf8_lossy(&buf[..complete]);
        let samples = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match parse_line(line) {
                Some(sample) => Some(sample),
                None => {
                    warn!(path = %self.path.display(), line, "skipping malformed rate log line");
                    None
                }
            })
            .collect();
        Ok(RateBatch { samples, end })
    }

    /// Mark everything up to `end` as consumed.
    pub fn commit(&mut self, end: u64) {
        self.offset = end;
    }
}

fn parse_line(line: &str) -> Option<RateSample> {
    let parsed: RateLine = serde_json::from_str(line).ok()?;
    let timestamp = parse_timestamp(&parsed.timestamp)?;
    RateSample::new(timestamp, parsed.rps)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    async fn poll(source: &mut RateLogSource) -> Vec<RateSample> {
        let batch = source.read_batch().await.unwrap();
        source.commit(batch.end());
        batch.samples
    }

    #[test]
    fn parses_naive_and_offset_timestamps() {
        let naive = parse_timestamp("2024-05-01T12:00:00.250000").unwrap();
        assert_eq!(naive, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::TimeDelta::milliseconds(250));

        let offset = parse_timestamp("2024-05-01T14:00:00+02:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn missing_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = RateLogSource::new(dir.path().join("absent.jsonl"));
        assert!(poll(&mut source).await.is_empty());
    }

    #[tokio::test]
    async fn returns_only_new_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rps_schedule.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"timestamp": "2024-05-01T12:00:00", "rps": 100}}"#).unwrap();
        writeln!(file, r#"{{"timestamp": "2024-05-01T12:01:00", "rps": 250.5}}"#).unwrap();
        write!(file, r#"{{"timestamp": "2024-05-01T12:02:00", "#).unwrap();
        file.flush().unwrap();

        let mut source = RateLogSource::new(&path);
        let first = poll(&mut source).await;
        let rates: Vec<f64> = first.iter().map(|s| s.rate).collect();
        assert_eq!(rates, vec![100.0, 250.5]);

        writeln!(file, r#""rps": 300}}"#).unwrap();
        file.flush().unwrap();

        let second = poll(&mut source).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].rate, 300.0);
        assert!(poll(&mut source).await.is_empty());
    }

    #[tokio::test]
    async fn uncommitted_batch_is_read_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.jsonl");
        std::fs::write(&path, "{\"timestamp\": \"2024-05-01T12:00:00\", \"rps\": 7}\n").unwrap();

        let mut source = RateLogSource::new(&path);
        let first = source.read_batch().await.unwrap();
        assert_eq!(first.samples.len(), 1);

        let again = source.read_batch().await.unwrap();
        assert_eq!(again.samples.len(), 1);
        assert_eq!(again.end(), first.end());

        source.commit(again.end());
        assert!(source.read_batch().await.unwrap().samples.is_empty());
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.jsonl");
        std::fs::write(
            &path,
            concat!(
                "not json\n",
                "{\"timestamp\": \"2024-05-01T12:00:00\", \"rps\": -3}\n",
                "{\"timestamp\": \"2024-05-01T12:00:30\", \"rps\": 42}\n",
            ),
        )
        .unwrap();

        let mut source = RateLogSource::new(&path);
        let samples = poll(&mut source).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].rate, 42.0);
    }

    #[tokio::test]
    async fn truncated_file_is_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"timestamp\": \"2024-05-01T12:00:00\", \"rps\": 1}\n",
                "{\"timestamp\": \"2024-05-01T12:01:00\", \"rps\": 2}\n",
            ),
        )
        .unwrap();

        let mut source = RateLogSource::new(&path);
        assert_eq!(poll(&mut source).await.len(), 2);

        std::fs::write(&path, "{\"timestamp\": \"2024-05-01T13:00:00\", \"rps\": 9}\n").unwrap();
        let samples = poll(&mut source).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].rate, 9.0);
    }
}
