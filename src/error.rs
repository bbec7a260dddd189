use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by trace loading and metrics computation.
///
/// A failure is fatal to the trace run that produced it; concurrent runs on
/// other traces are unaffected.
#[derive(Debug, Error)]
pub enum Error {
    /// A trace line did not parse to exactly three unsigned integers.
    #[error("malformed record at {path}:{line}: {reason}")]
    MalformedRecord {
        path: PathBuf,
        /// 1-based line number
        line: usize,
        reason: String,
    },

    /// The trace path could not be opened or read.
    #[error("trace unavailable: {path}: {source}")]
    TraceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metrics were requested before any sample was processed, or the trace
    /// carried a zero instruction count.
    #[error("no samples processed (empty trace or zero instruction count)")]
    NoSamples,

    /// A run configuration that cannot be trained with (zero table size,
    /// out-of-range history length).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
