use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use std::process;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use harvester_lib::constants::DEFAULT_RECORD_WIDTH;
use harvester_lib::decoder::FileReport;
use harvester_lib::{Decoder, DecoderConfig};

/// Converts raw session files into CSV under `processed_data/`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session files, or directories whose `.dat` files are all decoded.
    #[arg(default_value = "data")]
    inputs: Vec<PathBuf>,
    /// Number of f32 values per record.
    #[arg(short, long, default_value_t = DEFAULT_RECORD_WIDTH)]
    width: usize,
    /// Fail a file that ends with an unterminated frame.
    #[arg(long)]
    strict_tail: bool,
    /// Print a JSON summary to stdout.
    #[arg(long)]
    json: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Outcome {
    Ok(FileReport),
    Failed { input: PathBuf, error: String },
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    let decoder = Decoder::new(DecoderConfig {
        record_width: cli.width,
        strict_tail: cli.strict_tail,
    });

    let mut outcomes = Vec::new();
    for input in &cli.inputs {
        if input.is_dir() {
            let results = decoder
                .decode_all(input)
                .with_context(|| format!("Failed to scan {:?}", input))?;
            outcomes.extend(results.into_iter().map(|(path, result)| to_outcome(path, result)));
        } else {
            let result = decoder.decode_file(input);
            match &result {
                Ok(report) => info!(file = %input.display(), records = report.records, "Decoded"),
                Err(e) => error!(file = %input.display(), "Decoding aborted: {}", e),
            }
            outcomes.push(to_outcome(input.clone(), result));
        }
    }

    let failed = outcomes.iter().filter(|o| matches!(o, Outcome::Failed { .. })).count();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    }
    info!(files = outcomes.len(), failed, "Done");

    if failed > 0 {
        drop(guard);
        process::exit(1);
    }
    Ok(())
}

fn to_outcome(input: PathBuf, result: harvester_lib::Result<FileReport>) -> Outcome {
    match result {
        Ok(report) => Outcome::Ok(report),
        Err(e) => Outcome::Failed {
            input,
            error: e.to_string(),
        },
    }
}
