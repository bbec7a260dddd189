use crate::{Error, FeatureSource, IndexPolicy, LabelEncoding, ModelKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Interval, in processed samples, between temporal missPerKI snapshots.
pub const TEMPORAL_INTERVAL: u64 = 100;

/// One point of the temporal missPerKI curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemporalPoint {
    /// number of samples processed when the snapshot was taken
    pub sample: u64,
    pub miss_per_ki: f64,
}

/// Running hit/miss counters for one trace run, mutated once per sample.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub total: u64,
    pub correct: u64,
    /// cumulative instruction count of the most recent sample
    pub last_inst_count: u64,
    pub temporal: Vec<TemporalPoint>,
}

impl RunMetrics {
    /// Score one prediction. Every `TEMPORAL_INTERVAL`-th sample the running
    /// missPerKI is snapshotted into the temporal series.
    pub fn record(&mut self, correct: bool, inst_count: u64) {
        self.total += 1;
        self.correct += correct as u64;
        self.last_inst_count = inst_count;

        if self.total % TEMPORAL_INTERVAL == 0 {
            if let Ok(miss_per_ki) = self.miss_per_ki() {
                self.temporal.push(TemporalPoint {
                    sample: self.total,
                    miss_per_ki,
                });
            }
        }
    }

    pub fn misses(&self) -> u64 {
        self.total - self.correct
    }

    /// Prediction accuracy in percent.
    pub fn accuracy(&self) -> Result<f64, Error> {
        if self.total == 0 {
            return Err(Error::NoSamples);
        }
        Ok(self.correct as f64 / self.total as f64 * 100.0)
    }

    /// Mispredictions per thousand instructions.
    pub fn miss_per_ki(&self) -> Result<f64, Error> {
        if self.last_inst_count == 0 {
            return Err(Error::NoSamples);
        }
        Ok(1000.0 * self.misses() as f64 / self.last_inst_count as f64)
    }
}

/// Aggregate missPerKI across independent runs: the ratio of summed misses
/// to summed instruction counts, so long traces weigh more. Never an average
/// of per-run rates.
pub fn aggregate_miss_per_ki(runs: &[(u64, u64)]) -> Result<f64, Error> {
    let misses: u64 = runs.iter().map(|(miss, _)| miss).sum();
    let inst_count: u64 = runs.iter().map(|(_, inst)| inst).sum();
    if inst_count == 0 {
        return Err(Error::NoSamples);
    }
    Ok(1000.0 * misses as f64 / inst_count as f64)
}

/// Serializable result of one trace run: the configuration that produced it
/// plus the final counters and derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResult {
    /// configuration
    pub trace_path: PathBuf,
    pub trace_name: String,
    pub model: ModelKind,
    pub bhr_len: usize,
    pub table_size: usize,
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub num_samples: Option<usize>,
    pub index_policy: IndexPolicy,
    pub label_encoding: LabelEncoding,
    pub feature_source: FeatureSource,

    /// counters
    pub total: u64,
    pub correct: u64,
    pub miss_count: u64,
    pub inst_count: u64,

    /// derived metrics
    pub accuracy: f64,
    pub miss_per_ki: f64,

    /// missPerKI sampled every `TEMPORAL_INTERVAL` predictions
    pub temporal: Vec<TemporalPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_and_miss_per_ki_are_consistent() {
        let mut metrics = RunMetrics::default();
        for i in 0..250u64 {
            metrics.record(i % 5 != 0, (i + 1) * 4);
        }

        let accuracy = metrics.accuracy().unwrap();
        let miss_per_ki = metrics.miss_per_ki().unwrap();

        // both derive from the same (correct, total, inst_count) triple
        let misses_from_accuracy = metrics.total as f64 * (1.0 - accuracy / 100.0);
        assert!((misses_from_accuracy - metrics.misses() as f64).abs() < 1e-9);
        assert!(
            (miss_per_ki - 1000.0 * metrics.misses() as f64 / metrics.last_inst_count as f64).abs()
                < 1e-9
        );
    }

    #[test]
    fn zero_samples_is_an_error() {
        let metrics = RunMetrics::default();
        assert!(matches!(metrics.accuracy(), Err(Error::NoSamples)));
        assert!(matches!(metrics.miss_per_ki(), Err(Error::NoSamples)));
    }

    #[test]
    fn zero_inst_count_is_an_error() {
        let mut metrics = RunMetrics::default();
        metrics.record(true, 0);
        assert!(metrics.accuracy().is_ok());
        assert!(matches!(metrics.miss_per_ki(), Err(Error::NoSamples)));
    }

    #[test]
    fn temporal_series_samples_every_hundredth() {
        let mut metrics = RunMetrics::default();
        for i in 0..350u64 {
            metrics.record(i % 2 == 0, i + 1);
        }
        let samples: Vec<u64> = metrics.temporal.iter().map(|p| p.sample).collect();
        assert_eq!(samples, vec![100, 200, 300]);
    }

    #[test]
    fn aggregate_is_ratio_of_sums() {
        // short accurate run + long inaccurate run
        let runs = [(10u64, 1000u64), (500, 100000)];
        let aggregate = aggregate_miss_per_ki(&runs).unwrap();
        assert!((aggregate - 1000.0 * 510.0 / 101000.0).abs() < 1e-9);

        // distinct from the mean of per-run rates
        let mean_of_rates = (1000.0 * 10.0 / 1000.0 + 1000.0 * 500.0 / 100000.0) / 2.0;
        assert!((aggregate - mean_of_rates).abs() > 1e-3);
    }

    #[test]
    fn aggregate_of_nothing_is_an_error() {
        assert!(matches!(aggregate_miss_per_ki(&[]), Err(Error::NoSamples)));
    }
}
