//! Forecaster contract and the concrete next-interval models.
//!
//! A forecaster turns an ordered rate series into one scalar: the expected
//! request rate for the next control interval. Every model refuses to
//! forecast from fewer than `min_samples` points and never returns a
//! negative rate.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tracing::trace;

use marla_state::RateSample;

use crate::error::{ForecastError, ForecastResult};

/// Next-interval rate forecaster.
pub trait Forecaster: Send + Sync + Debug {
    /// Minimum history length needed before [`Forecaster::forecast`] succeeds.
    fn min_samples(&self) -> usize;

    /// Forecast the next-interval rate from an oldest-first series.
    fn forecast(&self, history: &[RateSample]) -> ForecastResult<f64>;
}

fn ensure_enough(history: &[RateSample], needed: usize) -> ForecastResult<()> {
    if history.len() < needed {
        return Err(ForecastError::InsufficientData {
            supplied: history.len(),
            needed,
        });
    }
    Ok(())
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_finite() { rate.max(0.0) } else { 0.0 }
}

// ── Settings ───────────────────────────────────────────────────────

/// Which model to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    #[default]
    Linear,
    Ewma,
    Last,
}

/// Forecaster configuration (the `[forecast]` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub model: ForecastModel,
    /// Samples required before any forecast is attempted.
    pub min_samples: usize,
    /// Trailing samples the linear model fits over.
    pub window: usize,
    /// Smoothing factor for the EWMA model, in `(0, 1]`.
    pub alpha: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            model: ForecastModel::Linear,
            min_samples: 10,
            window: 30,
            alpha: 0.3,
        }
    }
}

impl ForecastSettings {
    pub fn validate(&self) -> ForecastResult<()> {
        if self.min_samples == 0 {
            return Err(ForecastError::Settings("min_samples must be at least 1".into()));
        }
        if self.model == ForecastModel::Linear && self.window < 2 {
            return Err(ForecastError::Settings("linear window must be at least 2".into()));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ForecastError::Settings(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }

    /// Build the configured forecaster.
    pub fn build(&self) -> ForecastResult<Box<dyn Forecaster>> {
        self.validate()?;
        Ok(match self.model {
            ForecastModel::Linear => {
                Box::new(LinearTrendForecaster::new(self.min_samples, self.window))
            }
            ForecastModel::Ewma => Box::new(EwmaForecaster::new(self.min_samples, self.alpha)),
            ForecastModel::Last => Box::new(LastValueForecaster::new(self.min_samples)),
        })
    }
}

// ── Linear trend ───────────────────────────────────────────────────

/// Least-squares line over the trailing window, evaluated one mean sample
/// interval past the newest sample.
#[derive(Debug, Clone)]
pub struct LinearTrendForecaster {
    min_samples: usize,
    window: usize,
}

impl LinearTrendForecaster {
    pub fn new(min_samples: usize, window: usize) -> Self {
        Self {
            min_samples: min_samples.max(1),
            window: window.max(2),
        }
    }
}

impl Forecaster for LinearTrendForecaster {
    fn min_samples(&self) -> usize {
        self.min_samples
    }

    fn forecast(&self, history: &[RateSample]) -> ForecastResult<f64> {
        ensure_enough(history, self.min_samples)?;

        let start = history.len().saturating_sub(self.window);
        let data = &history[start..];
        let origin = data[0].timestamp;
        let points: Vec<(f64, f64)> = data
            .iter()
            .map(|s| {
                let x = s.timestamp.signed_duration_since(origin).num_milliseconds() as f64 / 1000.0;
                (x, s.rate)
            })
            .collect();

        let n = points.len() as f64;
        let (sum_x, sum_y, sum_xy, sum_x2) = points.iter().fold(
            (0.0, 0.0, 0.0, 0.0),
            |(acc_x, acc_y, acc_xy, acc_x2), (x, y)| {
                (acc_x + x, acc_y + y, acc_xy + x * y, acc_x2 + x * x)
            },
        );
        let mean = sum_y / n;

        let denominator = n * sum_x2 - sum_x * sum_x;
        let last_x = points[points.len() - 1].0;
        if points.len() < 2 || denominator.abs() < f64::EPSILON || last_x <= 0.0 {
            trace!(samples = points.len(), mean, "degenerate timestamps, using mean rate");
            return Ok(clamp_rate(mean));
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;
        let step = last_x / (n - 1.0);
        let next_x = last_x + step;
        let forecast = slope * next_x + intercept;

        trace!(slope, intercept, next_x, forecast, "linear trend forecast");
        Ok(clamp_rate(forecast))
    }
}

// ── EWMA ───────────────────────────────────────────────────────────

/// Exponentially weighted moving average over the whole series.
#[derive(Debug, Clone)]
pub struct EwmaForecaster {
    min_samples: usize,
    alpha: f64,
}

impl EwmaForecaster {
    pub fn new(min_samples: usize, alpha: f64) -> Self {
        Self {
            min_samples: min_samples.max(1),
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
        }
    }
}

impl Forecaster for EwmaForecaster {
    fn min_samples(&self) -> usize {
        self.min_samples
    }

    fn forecast(&self, history: &[RateSample]) -> ForecastResult<f64> {
        ensure_enough(history, self.min_samples)?;

        let mut iter = history.iter();
        let mut value = iter.next().map(|s| s.rate).unwrap_or(0.0);
        for sample in iter {
            value = self.alpha * sample.rate + (1.0 - self.alpha) * value;
        }
        Ok(clamp_rate(value))
    }
}

// ── Last value ─────────────────────────────────────────────────────

/// The most recent observed rate, unchanged.
#[derive(Debug, Clone)]
pub struct LastValueForecaster {
    min_samples: usize,
}

impl LastValueForecaster {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(1),
        }
    }
}

impl Forecaster for LastValueForecaster {
    fn min_samples(&self) -> usize {
        self.min_samples
    }

    fn forecast(&self, history: &[RateSample]) -> ForecastResult<f64> {
        ensure_enough(history, self.min_samples)?;
        Ok(history.last().map(|s| clamp_rate(s.rate)).unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(rates: &[f64]) -> Vec<RateSample> {
        rates
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
                RateSample::new(ts, *r).unwrap()
            })
            .collect()
    }

    #[test]
    fn insufficient_data_is_reported() {
        let f = LinearTrendForecaster::new(10, 30);
        let err = f.forecast(&series(&[1.0, 2.0, 3.0])).unwrap_err();
        match err {
            ForecastError::InsufficientData { supplied, needed } => {
                assert_eq!(supplied, 3);
                assert_eq!(needed, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn linear_extrapolates_trend() {
        let f = LinearTrendForecaster::new(3, 30);
        let forecast = f.forecast(&series(&[100.0, 200.0, 300.0, 400.0])).unwrap();
        assert!((forecast - 500.0).abs() < 1e-6, "got {forecast}");
    }

    #[test]
    fn linear_uses_trailing_window() {
        let f = LinearTrendForecaster::new(2, 3);
        let forecast = f
            .forecast(&series(&[9000.0, 10.0, 10.0, 10.0]))
            .unwrap();
        assert!((forecast - 10.0).abs() < 1e-6, "got {forecast}");
    }

    #[test]
    fn linear_clamps_negative_forecast() {
        let f = LinearTrendForecaster::new(3, 30);
        let forecast = f.forecast(&series(&[300.0, 150.0, 0.0])).unwrap();
        assert_eq!(forecast, 0.0);
    }

    #[test]
    fn linear_falls_back_to_mean_for_identical_timestamps() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let history: Vec<RateSample> = [10.0, 20.0, 30.0]
            .iter()
            .map(|r| RateSample::new(ts, *r).unwrap())
            .collect();
        let f = LinearTrendForecaster::new(3, 30);
        assert_eq!(f.forecast(&history).unwrap(), 20.0);
    }

    #[test]
    fn ewma_weights_recent_samples() {
        let f = EwmaForecaster::new(1, 0.5);
        let forecast = f.forecast(&series(&[0.0, 100.0])).unwrap();
        assert_eq!(forecast, 50.0);
    }

    #[test]
    fn last_value_returns_newest() {
        let f = LastValueForecaster::new(1);
        assert_eq!(f.forecast(&series(&[5.0, 1800.0])).unwrap(), 1800.0);
    }

    #[test]
    fn settings_build_selected_model() {
        let settings = ForecastSettings {
            model: ForecastModel::Last,
            min_samples: 2,
            ..Default::default()
        };
        let f = settings.build().unwrap();
        assert_eq!(f.min_samples(), 2);
        assert_eq!(f.forecast(&series(&[1.0, 7.0])).unwrap(), 7.0);
    }

    #[test]
    fn settings_reject_bad_alpha() {
        let settings = ForecastSettings {
            alpha: 0.0,
            ..Default::default()
        };
        assert!(settings.build().is_err());
    }

    #[test]
    fn default_gate_is_ten_samples() {
        assert_eq!(ForecastSettings::default().min_samples, 10);
    }
}
