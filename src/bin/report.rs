//! Compare saved training results
use clap::{Parser, ValueEnum};
use cli_table::{Cell, Table, print_stdout};
use nbp_experiments::{TrainResult, aggregate_miss_per_ki};
use std::{fs::File, io::BufReader, path::PathBuf};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Result json paths, as written by the train binary
    #[arg(short, long, required = true)]
    result_path: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let mut results: Vec<TrainResult> = vec![];
    for input_file in &args.result_path {
        println!("Loading results from {}", input_file.display());
        let mut loaded: Vec<TrainResult> =
            serde_json::from_reader(BufReader::new(File::open(input_file)?))?;
        results.append(&mut loaded);
    }

    results.sort_by(|left, right| left.miss_per_ki.total_cmp(&right.miss_per_ki));

    let mut table = vec![];
    for result in &results {
        let model = result
            .model
            .to_possible_value()
            .map(|value| value.get_name().to_string())
            .unwrap_or_default();
        table.push(vec![
            result.trace_name.clone().cell(),
            model.cell(),
            result.table_size.cell(),
            result.bhr_len.cell(),
            format!("{}", result.learning_rate).cell(),
            result.total.cell(),
            format!("{:.2}", result.accuracy).cell(),
            format!("{:.3}", result.miss_per_ki).cell(),
        ]);
    }
    let table = table.table().title(vec![
        "Trace".cell(),
        "Model".cell(),
        "Table Size".cell(),
        "BHR Len".cell(),
        "LR".cell(),
        "Samples".cell(),
        "Accuracy (%)".cell(),
        "missPerKI".cell(),
    ]);
    print_stdout(table)?;

    // weight by trace length: ratio of summed misses to summed instructions
    let counts: Vec<(u64, u64)> = results
        .iter()
        .map(|result| (result.miss_count, result.inst_count))
        .collect();
    println!("Total missPerKI = {:0.3}", aggregate_miss_per_ki(&counts)?);

    Ok(())
}
