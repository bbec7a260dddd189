//! Train per-branch-table predictor models online over branch traces
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar};
use matplotlib::{Matplotlib, Mpl, Run, commands as c, serde_json::Value};
use nbp_experiments::{
    BranchTrace, Error, FeatureSource, IndexPolicy, LabelEncoding, ModelKind, ShardedTrainer,
    TrainConfig, TrainResult, aggregate_miss_per_ki, get_tqdm_style,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path(s) to trace files, one worker per trace
    #[arg(short, long, required = true)]
    trace_path: Vec<PathBuf>,

    /// Predictor model variant
    #[arg(short, long, value_enum, default_value = "recurrent")]
    model: ModelKind,

    /// Branch history register length in bits
    #[arg(short, long, default_value = "8")]
    bhr_len: usize,

    /// Number of independent model shards
    #[arg(long, default_value = "512")]
    table_size: usize,

    /// Adam learning rate
    #[arg(short, long, default_value = "0.15")]
    learning_rate: f64,

    /// Sample cap per trace
    #[arg(short, long, default_value = "10000")]
    num_samples: usize,

    /// Train on the whole trace, ignoring the sample cap
    #[arg(long)]
    all_samples: bool,

    /// Hidden state size (recurrent model only)
    #[arg(long, default_value = "2")]
    hidden_size: usize,

    /// How the table index is derived from the PC
    #[arg(long, value_enum, default_value = "modulo-shard")]
    index_policy: IndexPolicy,

    /// Label encoding fed to the loss
    #[arg(long, value_enum, default_value = "zero-one")]
    label_encoding: LabelEncoding,

    /// Which bit vector is fed to the model
    #[arg(long, value_enum, default_value = "history-bits")]
    feature_source: FeatureSource,

    /// Parameter initialization seed
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Path to result json (all runs)
    #[arg(short, long)]
    output_path: Option<PathBuf>,

    /// Render the temporal missPerKI curve of each run to a png
    #[arg(long)]
    plot: bool,
}

impl Cli {
    fn sample_cap(&self) -> Option<usize> {
        if self.all_samples {
            None
        } else {
            Some(self.num_samples)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct PlotPrelude;

impl Matplotlib for PlotPrelude {
    fn is_prelude(&self) -> bool {
        true
    }

    fn data(&self) -> Option<Value> {
        None
    }

    fn py_cmd(&self) -> String {
        "\
import io
import json
import os
import sys
import matplotlib
matplotlib.use(\"Agg\")
import matplotlib.pyplot as plt
import matplotlib.ticker as mticker
import numpy as np
"
        .into()
    }
}

fn run_trace(
    trace_path: &Path,
    config: TrainConfig,
    pbar: &ProgressBar,
) -> Result<TrainResult, Error> {
    let trace = BranchTrace::load(trace_path, config.num_samples)?;
    pbar.set_length(trace.len() as u64);

    let mut trainer = ShardedTrainer::new(config)?;
    trainer.run_with_progress(&trace, Some(pbar));
    pbar.finish();

    trainer.finish(&trace)
}

/// Plot file name composed from trace name, sample cap, table size, history
/// length and learning rate.
fn plot_path(result: &TrainResult) -> PathBuf {
    let cap = match result.num_samples {
        Some(cap) => cap.to_string(),
        None => "all".to_string(),
    };
    PathBuf::from(format!(
        "{}-s{}-t{}-h{}-lr{}.png",
        result.trace_name, cap, result.table_size, result.bhr_len, result.learning_rate
    ))
}

/// Render the curve; a run shorter than the snapshot interval has no
/// temporal points and nothing to draw.
fn plot_curve(result: &TrainResult) -> Option<PathBuf> {
    if result.temporal.is_empty() {
        return None;
    }
    let path = plot_path(result);
    Mpl::new()
        & PlotPrelude
        & c::DefInit
        & c::plot(
            result.temporal.iter().map(|point| point.sample as f64),
            result.temporal.iter().map(|point| point.miss_per_ki),
        )
        | Run::Save(path.clone());
    Some(path)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    println!(
        "Samples={}; TABLE_SIZE={}; HIDDEN_SIZE={}; BHR_LEN={}; LR={}",
        args.sample_cap()
            .map(|cap| cap.to_string())
            .unwrap_or_else(|| "all".to_string()),
        args.table_size,
        args.hidden_size,
        args.bhr_len,
        args.learning_rate
    );

    let config = TrainConfig {
        model: args.model,
        bhr_len: args.bhr_len,
        table_size: args.table_size,
        learning_rate: args.learning_rate,
        num_samples: args.sample_cap(),
        hidden_size: args.hidden_size,
        index_policy: args.index_policy,
        label_encoding: args.label_encoding,
        feature_source: args.feature_source,
        seed: args.seed,
    };

    // one worker per trace; workers share nothing and hand their result back
    // through the join handle
    let multi = MultiProgress::new();
    let mut runs: Vec<(PathBuf, Result<TrainResult, Error>)> = vec![];
    std::thread::scope(|scope| {
        let mut handles = vec![];
        for trace_path in &args.trace_path {
            let config = config.clone();
            let pbar = multi.add(ProgressBar::new(0));
            pbar.set_style(get_tqdm_style());
            handles.push((
                trace_path.clone(),
                scope.spawn(move || run_trace(trace_path, config, &pbar)),
            ));
        }
        for (trace_path, handle) in handles {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            runs.push((trace_path, outcome));
        }
    });

    // a failed trace is reported and skipped; the others still count
    let mut results = vec![];
    for (trace_path, outcome) in runs {
        match outcome {
            Ok(result) => {
                println!(
                    "{} ({}): miss = {} / {}; acc = {:0.2}%; missPerKI = {:0.3}",
                    result.trace_name,
                    result.inst_count,
                    result.miss_count,
                    result.total,
                    result.accuracy,
                    result.miss_per_ki
                );
                results.push(result);
            }
            Err(err) => eprintln!("{}: run failed: {}", trace_path.display(), err),
        }
    }

    if results.is_empty() {
        anyhow::bail!("all trace runs failed");
    }

    if results.len() > 1 {
        let counts: Vec<(u64, u64)> = results
            .iter()
            .map(|result| (result.miss_count, result.inst_count))
            .collect();
        println!(
            "Total missPerKI = {:0.3}",
            aggregate_miss_per_ki(&counts)?
        );
    }

    if args.plot {
        for result in &results {
            match plot_curve(result) {
                Some(path) => {
                    println!("Curve for {} written to {}", result.trace_name, path.display())
                }
                None => eprintln!(
                    "{}: no temporal points recorded, skipping plot",
                    result.trace_name
                ),
            }
        }
    }

    if let Some(output_path) = &args.output_path {
        std::fs::write(output_path, serde_json::to_vec(&results)?)?;
        println!("Results written to {}", output_path.display());
    }

    Ok(())
}
