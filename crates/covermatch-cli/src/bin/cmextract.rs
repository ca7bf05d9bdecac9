//! cmextract - Extract similarity features from an audio file
//!
//! Usage: cmextract <input_audio_path> <output_dir>

use anyhow::{Context, Result};
use clap::Parser;
use covermatch_core::{decode_file, extract_features, ServiceConfig};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "cmextract")]
#[command(about = "Extract chroma, melody and rhythm features from an audio file", long_about = None)]
struct Args {
    /// Input audio file path
    input_audio_path: String,

    /// Output directory for .features.json files
    output_dir: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

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

    run_cmextract(&args.input_audio_path, &args.output_dir, args.config.as_deref())
}

fn run_cmextract(input_path: &str, output_dir: &str, config_path: Option<&Path>) -> Result<()> {
    let input_path = Path::new(input_path);
    let output_dir = Path::new(output_dir);

    if !input_path.exists() {
        anyhow::bail!("Input file not found: {}", input_path.display());
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let config = match config_path {
        Some(path) => ServiceConfig::load(path)?.analysis,
        None => ServiceConfig::default().analysis,
    };
    config.validate()?;

    log::info!("Processing: {}", input_path.display());

    let start = std::time::Instant::now();
    let signal = decode_file(input_path, config.sample_rate)?;
    log::info!(
        "Decoded audio: {:.1}s duration, {} samples @ {}Hz",
        signal.duration(),
        signal.len(),
        signal.sample_rate()
    );

    let features = extract_features(&signal, &config)?;
    let elapsed = start.elapsed();

    log::info!(
        "Extracted {} frames ({} voiced) in {:.2}s",
        features.num_frames(),
        features.voiced_count(),
        elapsed.as_secs_f64()
    );

    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("Input path has no file name")?;
    let output_path = output_dir.join(format!("{}.features.json", stem));

    let json = serde_json::to_string(&features)?;
    std::fs::write(&output_path, json)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    let result = serde_json::json!({
        "status": "success",
        "input_file": input_path.display().to_string(),
        "output_file": output_path.display().to_string(),
        "num_frames": features.num_frames(),
        "voiced_frames": features.voiced_count(),
        "tempo": features.tempo,
        "duration_seconds": features.duration,
        "processing_time_seconds": elapsed.as_secs_f64(),
    });

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
