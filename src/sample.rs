use crate::{Error, TraceRecord};
use clap::ValueEnum;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// How a sample's table index is derived from the branch PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum IndexPolicy {
    /// `index = (pc ^ bhr) & (2^bhr_len - 1)`
    XorHash,
    /// `index = pc % table_size`, history fed to the model unhashed
    ModuloShard,
}

/// Label encoding expected by the model's loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum LabelEncoding {
    /// class index 0 (not taken) / 1 (taken)
    ZeroOne,
    /// -1.0 (not taken) / +1.0 (taken)
    Signed,
}

/// Which bit vector is fed to the model under the xor-hash policy.
///
/// Under `ModuloShard` the feature is always the raw history bits; the index
/// only routes shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum FeatureSource {
    /// bits of the hashed index
    IndexBits,
    /// bits of the raw branch history register
    HistoryBits,
}

/// Taken/not-taken label in the configured encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Label {
    Class(usize),
    Signed(f64),
}

impl Label {
    pub fn taken(&self) -> bool {
        match self {
            Label::Class(class) => *class == 1,
            Label::Signed(value) => *value > 0.0,
        }
    }
}

/// A derived training sample. Never stored: computed lazily per position.
#[derive(Debug, Clone)]
pub struct Sample {
    /// branch history register, most recent outcome at the high bit
    pub bhr: u64,
    /// table index per the active policy
    pub index: u64,
    /// model input, one element per history bit, low bit first
    pub feature: Array1<f64>,
    pub label: Label,
    pub inst_count: u64,
}

/// Pure transform from a trace position to a training sample.
///
/// One configuration of this transform replaces the near-duplicate dataset
/// classes of the original scripts: the indexing policy, label encoding and
/// feature source are all parameters.
#[derive(Debug, Clone, Copy)]
pub struct SampleTransform {
    pub bhr_len: usize,
    pub table_size: usize,
    pub index_policy: IndexPolicy,
    pub label_encoding: LabelEncoding,
    pub feature_source: FeatureSource,
}

impl SampleTransform {
    /// Bounds check: `bhr_len` must leave the shift in `bhr_mask` defined
    /// (1..=63) and the table needs at least one shard. Callers building a
    /// transform from external input go through this before deriving samples.
    pub fn validate(&self) -> Result<(), Error> {
        if self.table_size == 0 {
            return Err(Error::InvalidConfig("table_size must be at least 1".into()));
        }
        if self.bhr_len == 0 || self.bhr_len > 63 {
            return Err(Error::InvalidConfig(format!(
                "bhr_len must be in 1..=63, got {}",
                self.bhr_len
            )));
        }
        Ok(())
    }

    pub fn bhr_mask(&self) -> u64 {
        assert!(self.bhr_len >= 1 && self.bhr_len <= 63, "bhr_len out of range");
        (1u64 << self.bhr_len) - 1
    }

    /// Branch history register at position `idx`: the last `bhr_len` outcomes
    /// preceding the sample, shifted in oldest-last so the most recent
    /// outcome sits at bit `bhr_len - 1`. Positions before the history fills
    /// contribute 0 bits.
    pub fn bhr_at(&self, records: &[TraceRecord], idx: usize) -> u64 {
        let mut bhr = 0u64;
        for j in 1..=self.bhr_len {
            let taken = idx >= j && records[idx - j].taken;
            bhr = (bhr << 1) | taken as u64;
        }
        bhr
    }

    /// Derive the sample at `idx`. Pure function of `(records, idx)` and this
    /// transform's configuration; the records are never mutated.
    pub fn sample_at(&self, records: &[TraceRecord], idx: usize) -> Sample {
        let record = &records[idx];
        let bhr = self.bhr_at(records, idx);

        let index = match self.index_policy {
            IndexPolicy::XorHash => (record.pc ^ bhr) & self.bhr_mask(),
            IndexPolicy::ModuloShard => record.pc % self.table_size as u64,
        };

        let feature_bits = match (self.index_policy, self.feature_source) {
            (IndexPolicy::XorHash, FeatureSource::IndexBits) => index,
            _ => bhr,
        };
        let feature =
            Array1::from_iter((0..self.bhr_len).map(|bit| ((feature_bits >> bit) & 1) as f64));

        let label = match self.label_encoding {
            LabelEncoding::ZeroOne => Label::Class(record.taken as usize),
            LabelEncoding::Signed => Label::Signed(if record.taken { 1.0 } else { -1.0 }),
        };

        Sample {
            bhr,
            index,
            feature,
            label,
            inst_count: record.inst_count,
        }
    }
}
