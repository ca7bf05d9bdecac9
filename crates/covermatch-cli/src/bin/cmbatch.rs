//! cmbatch - Compare many pairs of recordings on a worker pool
//!
//! Usage: cmbatch <pairs_file>
//!
//! Each non-empty line of the pairs file is `reference,candidate` with two
//! optional display titles: `reference,candidate,title_a,title_b`.
//! Lines starting with `#` are skipped.

use anyhow::{Context, Result};
use clap::Parser;
use covermatch_cli::batch::{parse_pairs, run_batch};
use covermatch_cli::output::print_json_batch;
use covermatch_core::{Comparator, FilesystemStore, ServiceConfig, WorkerPool};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cmbatch")]
#[command(about = "Compare pairs of audio recordings in parallel", long_about = None)]
struct Args {
    /// File listing one "reference,candidate[,title_a,title_b]" pair per line
    pairs_file: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads (overrides the configuration file)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    run_cmbatch(&args)
}

fn run_cmbatch(args: &Args) -> Result<()> {
    let pairs_path = Path::new(&args.pairs_file);
    if !pairs_path.exists() {
        anyhow::bail!("Pairs file not found: {}", pairs_path.display());
    }
    let content = std::fs::read_to_string(pairs_path)
        .with_context(|| format!("Failed to read {}", pairs_path.display()))?;
    let pairs = parse_pairs(&content);
    if pairs.is_empty() {
        anyhow::bail!("No pairs found in {}", pairs_path.display());
    }

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.worker.threads = threads;
    }

    let store = FilesystemStore::new(&config.library);
    let comparator = Arc::new(Comparator::new(config.analysis.clone())?);
    let pool = WorkerPool::new(&config.worker)?;

    log::info!(
        "Comparing {} pairs ({} pending jobs max)",
        pairs.len(),
        pool.max_pending()
    );

    let start = std::time::Instant::now();
    let mut results = run_batch(&pool, &comparator, &store, &pairs, args.verbose);

    log::info!(
        "Finished {} comparisons in {:.2}s",
        results.len(),
        start.elapsed().as_secs_f64()
    );

    print_json_batch(&mut results);

    Ok(())
}
