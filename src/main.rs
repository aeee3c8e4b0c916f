// ========================================================================================
//
//                      THE COMMAND-LINE FRONT END: EPISCAN
//
// ========================================================================================
//
// Parses the request, loads and packs the dataset, drives one search pass per requested
// order, and writes the merged per-order outputs and the best information gain table
// next to the output prefix. Any failure ends the run with status 1; outputs of passes
// that already completed stay on disk.

use clap::Parser;
use episcan::config::{MetricRequest, ScanPlan, ScanRequest};
use episcan::error::ScanError;
use episcan::genotype::GenotypeStore;
use episcan::io::{
    FileSinks, best_table_path, merged_output_path, read_genotype_csv, write_best_table,
};
use episcan::pipeline::Search;
use episcan::types::{MetricKind, Order};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[command(
    name = "episcan",
    version,
    about = "Exhaustive search for SNP combinations that separate cases from controls."
)]
struct Args {
    /// Genotype CSV: a label line (1 = case, 0 = control), then one line per SNP.
    #[arg(short = 'i', long, value_name = "CSV")]
    input: PathBuf,

    /// Prefix of every output file.
    #[arg(short = 'o', long, value_name = "PREFIX")]
    output: PathBuf,

    /// Number of worker threads. Defaults to the number of logical CPUs.
    #[arg(short = 't', long, value_name = "N")]
    threads: Option<usize>,

    /// Sort merged outputs by descending score.
    #[arg(long)]
    sort: bool,

    /// Find the best combination of every order for each SNP. Disables thresholded output.
    #[arg(long = "best-ig")]
    best_ig: bool,

    /// TOML file with a scan request. Command-line flags take precedence.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Purity of single SNPs; report those scoring at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    p1: Option<Option<f64>>,

    /// Purity of SNP pairs; report those scoring at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    p2: Option<Option<f64>>,

    /// Purity of SNP triplets; report those scoring at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    p3: Option<Option<f64>>,

    /// Purity of SNP quadlets; report those scoring at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    p4: Option<Option<f64>>,

    /// Information gain of single SNPs; report those gaining at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    ig1: Option<Option<f64>>,

    /// Information gain of SNP pairs; report those gaining at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    ig2: Option<Option<f64>>,

    /// Information gain of SNP triplets; report those gaining at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    ig3: Option<Option<f64>>,

    /// Information gain of SNP quadlets; report those gaining at least THR.
    #[arg(long, value_name = "THR", num_args = 0..=1, allow_negative_numbers = true)]
    ig4: Option<Option<f64>>,
}

impl Args {
    fn metric_flags(&self) -> [(Order, MetricKind, Option<Option<f64>>); 8] {
        [
            (Order::Single, MetricKind::Purity, self.p1),
            (Order::Pair, MetricKind::Purity, self.p2),
            (Order::Triplet, MetricKind::Purity, self.p3),
            (Order::Quadlet, MetricKind::Purity, self.p4),
            (Order::Single, MetricKind::InformationGain, self.ig1),
            (Order::Pair, MetricKind::InformationGain, self.ig2),
            (Order::Triplet, MetricKind::InformationGain, self.ig3),
            (Order::Quadlet, MetricKind::InformationGain, self.ig4),
        ]
    }

    /// Starts from the configuration file, if any, and applies the flags on top of it.
    fn request(&self) -> Result<ScanRequest, ScanError> {
        let mut request = match &self.config {
            Some(path) => ScanRequest::from_toml_file(path)?,
            None => ScanRequest::default(),
        };
        if let Some(threads) = self.threads {
            request.threads = threads;
        }
        request.sort |= self.sort;
        request.best_ig |= self.best_ig;
        for (order, metric, flag) in self.metric_flags() {
            if let Some(threshold) = flag {
                *request.order_mut(order).metric_mut(metric) = Some(MetricRequest { threshold });
            }
        }
        Ok(request)
    }
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), ScanError> {
    let started = Instant::now();

    // --- Phase 1: Configuration ---
    let request = args.request()?;
    debug!("Effective scan request:\n{}", request.to_toml_string()?);
    let plan = ScanPlan::resolve(&request)?;
    info!(
        "Scanning up to {} combinations on {} threads{}",
        plan.max_order(),
        plan.threads(),
        if plan.best_ig() { " in best-IG mode" } else { "" }
    );
    for (metric, order) in plan.reported() {
        info!(
            "{metric} rows of the {order} pass go to '{}'",
            merged_output_path(&args.output, metric, order).display()
        );
    }

    // --- Phase 2: Loading and packing ---
    let matrix = read_genotype_csv(&args.input)?;
    let store = GenotypeStore::build(&matrix, plan.max_order());
    drop(matrix);
    info!(
        "Loaded {} SNPs over {} samples ({} cases, {} controls)",
        store.num_variables(),
        store.num_samples(),
        store.num_cases(),
        store.num_controls()
    );

    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| ScanError::io(dir, e))?;
    }

    // --- Phase 3: The search ---
    let sinks = FileSinks::new(&args.output, plan.sort());
    let outcome = Search::new(&store, &plan).run(&sinks)?;

    // --- Phase 4: The best-IG table ---
    if let Some(best) = outcome.best {
        let path = best_table_path(&args.output);
        write_best_table(&path, &best, store.names())?;
        info!("Wrote the best information gain table to '{}'", path.display());
    }

    let scored: u64 = outcome.passes.iter().map(|p| p.tuples).sum();
    info!(
        "Scored {scored} combinations in {} passes; total time {:.2?}",
        outcome.passes.len(),
        started.elapsed()
    );
    Ok(())
}
