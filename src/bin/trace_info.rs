//! Display statistics of a branch trace
use clap::Parser;
use cli_table::{Cell, Table, print_stdout};
use nbp_experiments::BranchTrace;
use std::{collections::HashMap, path::PathBuf};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to trace file
    trace: PathBuf,
}

/// Share of `count` in `total` as a percentage; 0 when there is nothing to
/// count, rather than NaN.
fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let trace = BranchTrace::load(&args.trace, None)?;
    println!("Got {} records from {}", trace.len(), trace.name());

    let mut per_pc: HashMap<u64, (u64, u64)> = HashMap::new();
    let mut taken_total = 0u64;
    for record in &trace.records {
        let entry = per_pc.entry(record.pc).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += record.taken as u64;
        taken_total += record.taken as u64;
    }

    println!("- Static branches: {}", per_pc.len());
    println!(
        "- Taken rate: {:.2}% = {} / {}",
        percent(taken_total, trace.len() as u64),
        taken_total,
        trace.len()
    );
    if let Some(last) = trace.records.last() {
        println!("- Final instruction count: {}", last.inst_count);
        println!(
            "- Conditional branches per kilo instructions: {:.2}",
            trace.len() as f64 * 1000.0 / last.inst_count as f64
        );
    }

    println!("Top branches by execution count:");
    let mut items: Vec<(&u64, &(u64, u64))> = per_pc.iter().collect();
    items.sort_by_key(|(_, (execution_count, _))| *execution_count);

    let mut table = vec![];
    for (pc, (execution_count, taken_count)) in items.iter().rev().take(10) {
        table.push(vec![
            format!("0x{:08x}", pc).cell(),
            execution_count.cell(),
            format!("{:.2}", percent(*taken_count, *execution_count)).cell(),
        ]);
    }
    let table = table.table().title(vec![
        "Branch PC".cell(),
        "Execution Count".cell(),
        "Taken Rate (%)".cell(),
    ]);
    print_stdout(table)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_an_empty_total_is_zero() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(3, 3), 100.0);
    }
}
