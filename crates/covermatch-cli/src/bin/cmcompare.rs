//! cmcompare - Compare two recordings for melodic and harmonic similarity
//!
//! Usage: cmcompare <reference> <candidate>

use anyhow::{Context, Result};
use clap::Parser;
use covermatch_cli::output::print_json_result;
use covermatch_core::{
    file_title, AudioStore, CancellationToken, Comparator, FilesystemStore, LogSink, NoopSink,
    ProgressSink, ServiceConfig, Titles,
};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "cmcompare")]
#[command(about = "Compare two audio recordings for cover or plagiarism detection", long_about = None)]
struct Args {
    /// Reference audio file, or identifier when --library is set
    reference: String,

    /// Candidate audio file, or identifier when --library is set
    candidate: String,

    /// Display name of the reference track
    #[arg(long)]
    title_a: Option<String>,

    /// Display name of the candidate track
    #[arg(long)]
    title_b: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resolve both tracks through the configured audio library
    #[arg(short, long)]
    library: bool,

    /// Print the plain-text summary instead of JSON
    #[arg(short, long)]
    summary: bool,

    /// Include cost matrices, paths and features in the JSON output
    #[arg(long)]
    raw: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Default: no logs (clean JSON output for parsing)
    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    run_cmcompare(&args)
}

fn run_cmcompare(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    let (reference, candidate) = if args.library {
        let store = FilesystemStore::new(&config.library);
        (
            store
                .load_audio(&args.reference)
                .with_context(|| format!("Failed to load {}", args.reference))?,
            store
                .load_audio(&args.candidate)
                .with_context(|| format!("Failed to load {}", args.candidate))?,
        )
    } else {
        (read_input(&args.reference)?, read_input(&args.candidate)?)
    };

    let titles = Titles::new(
        args.title_a
            .clone()
            .unwrap_or_else(|| file_title(Path::new(&args.reference))),
        args.title_b
            .clone()
            .unwrap_or_else(|| file_title(Path::new(&args.candidate))),
    );

    log::info!("Comparing {} with {}", titles.reference, titles.candidate);

    let comparator = Comparator::new(config.analysis)?;
    let progress: Box<dyn ProgressSink> = if args.verbose {
        Box::new(LogSink::new("cmcompare"))
    } else {
        Box::new(NoopSink)
    };

    let start = std::time::Instant::now();
    let result = comparator.compare_tracks(
        &reference,
        &candidate,
        &titles,
        progress.as_ref(),
        &CancellationToken::new(),
    )?;
    log::info!("Comparison finished in {:.2}s", start.elapsed().as_secs_f64());

    for warning in &result.warnings {
        log::warn!("{}", warning);
    }

    if args.summary {
        println!("{}", result.summary);
    } else if args.raw {
        print_json_result(&result);
    } else {
        print_json_result(&result.without_raw_data());
    }

    Ok(())
}

fn read_input(path: &str) -> Result<Vec<u8>> {
    let path = Path::new(path);
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}
