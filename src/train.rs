use crate::{
    BranchTrace, Error, FeatureSource, IndexPolicy, LabelEncoding, ModelKind, PredictorModel,
    RunMetrics, Sample, SampleTransform, TrainResult, new_predictor_model,
};
use indicatif::ProgressBar;
use log::info;
use rand::{SeedableRng, rngs::StdRng};

/// Full configuration of one training run.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub model: ModelKind,
    /// branch history length in bits
    pub bhr_len: usize,
    /// number of independent model shards
    pub table_size: usize,
    pub learning_rate: f64,
    /// sample cap; `None` trains on the whole trace
    pub num_samples: Option<usize>,
    /// recurrent variant only
    pub hidden_size: usize,
    pub index_policy: IndexPolicy,
    pub label_encoding: LabelEncoding,
    pub feature_source: FeatureSource,
    /// parameter initialization seed
    pub seed: u64,
}

impl Default for TrainConfig {
    /// Defaults of the recurrent harness: table of 512 GRUs over an 8-bit
    /// history, Adam at 0.15, 10000-sample cap.
    fn default() -> Self {
        TrainConfig {
            model: ModelKind::Recurrent,
            bhr_len: 8,
            table_size: 512,
            learning_rate: 0.15,
            num_samples: Some(10000),
            hidden_size: 2,
            index_policy: IndexPolicy::ModuloShard,
            label_encoding: LabelEncoding::ZeroOne,
            feature_source: FeatureSource::HistoryBits,
            seed: 0,
        }
    }
}

impl TrainConfig {
    fn validate(&self) -> Result<(), Error> {
        self.transform().validate()?;
        if self.model == ModelKind::Recurrent && self.hidden_size == 0 {
            return Err(Error::InvalidConfig("hidden_size must be at least 1".into()));
        }
        Ok(())
    }

    fn transform(&self) -> SampleTransform {
        SampleTransform {
            bhr_len: self.bhr_len,
            table_size: self.table_size,
            index_policy: self.index_policy,
            label_encoding: self.label_encoding,
            feature_source: self.feature_source,
        }
    }
}

/// Outcome of one online update.
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub shard: usize,
    pub taken: bool,
    pub correct: bool,
    pub loss: f64,
}

/// A table of independently trained predictor models.
///
/// Each incoming sample is routed to exactly one shard by
/// `sample.index % table_size`, that shard takes one gradient step, and the
/// decision is scored. Shards never interact; within a shard, updates follow
/// trace order.
pub struct ShardedTrainer {
    config: TrainConfig,
    transform: SampleTransform,
    shards: Vec<Box<dyn PredictorModel + Send>>,
    metrics: RunMetrics,
}

impl ShardedTrainer {
    pub fn new(config: TrainConfig) -> Result<Self, Error> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let shards = (0..config.table_size)
            .map(|_| {
                new_predictor_model(
                    config.model,
                    config.bhr_len,
                    config.hidden_size,
                    config.learning_rate,
                    &mut rng,
                )
            })
            .collect();
        Ok(ShardedTrainer {
            transform: config.transform(),
            config,
            shards,
            metrics: RunMetrics::default(),
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Route one sample to its shard, take one gradient step there, and
    /// score the decision.
    pub fn train_sample(&mut self, sample: &Sample) -> StepOutcome {
        let shard = (sample.index % self.shards.len() as u64) as usize;
        let model = &mut self.shards[shard];

        model.zero_grad();
        let prediction = model.forward(sample.feature.view());
        let loss = model.loss(&prediction, sample.label);
        model.backward_step(&prediction, sample.label);

        let taken = model.decide(&prediction);
        let correct = taken == sample.label.taken();
        self.metrics.record(correct, sample.inst_count);

        StepOutcome {
            shard,
            taken,
            correct,
            loss,
        }
    }

    /// Replay a trace in order, one update per record. Stops at end of trace
    /// or once the post-step cap check `idx > num_samples` fires, whichever
    /// comes first (the cap keeps the original's off-by-one).
    pub fn run(&mut self, trace: &BranchTrace) {
        self.run_with_progress(trace, None)
    }

    pub fn run_with_progress(&mut self, trace: &BranchTrace, progress: Option<&ProgressBar>) {
        for idx in 0..trace.len() {
            let sample = self.transform.sample_at(&trace.records, idx);
            self.train_sample(&sample);
            if let Some(pbar) = progress {
                pbar.inc(1);
            }

            if let Some(cap) = self.config.num_samples {
                if idx > cap {
                    break;
                }
            }
        }

        info!(
            "{}: processed {} samples, {} misses",
            trace.name(),
            self.metrics.total,
            self.metrics.misses()
        );
    }

    /// Final result of the run. Fails with `NoSamples` on an empty trace or
    /// a zero instruction count rather than dividing by zero.
    pub fn finish(&self, trace: &BranchTrace) -> Result<TrainResult, Error> {
        let accuracy = self.metrics.accuracy()?;
        let miss_per_ki = self.metrics.miss_per_ki()?;

        Ok(TrainResult {
            trace_path: trace.path.clone(),
            trace_name: trace.name(),
            model: self.config.model,
            bhr_len: self.config.bhr_len,
            table_size: self.config.table_size,
            hidden_size: self.config.hidden_size,
            learning_rate: self.config.learning_rate,
            num_samples: self.config.num_samples,
            index_policy: self.config.index_policy,
            label_encoding: self.config.label_encoding,
            feature_source: self.config.feature_source,
            total: self.metrics.total,
            correct: self.metrics.correct,
            miss_count: self.metrics.misses(),
            inst_count: self.metrics.last_inst_count,
            accuracy,
            miss_per_ki,
            temporal: self.metrics.temporal.clone(),
        })
    }
}
