use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use sigcarve::config::DEFAULT_WINDOW_SIZE;
use sigcarve::database::load_database;
use sigcarve::extraction::ExtractionReport;
use sigcarve::{CancelToken, CarveOutcome, CarveSession, ConfigError, CoreError, ScanConfig, SignatureDatabase};

const EXIT_IO: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "sigcarve")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Identify and carve embedded files by byte signature")]
struct Cli {
    /// File, disk image or memory dump to scan
    input: PathBuf,

    /// JSON signature database (built-in table when omitted)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Write every carved region to the output directory
    #[arg(short, long)]
    extract: bool,

    /// Output directory for extracted files
    #[arg(short, long, default_value = "./carved")]
    output: PathBuf,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Scan shards run in parallel (0 = one per core)
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Bytes read per scan window
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window: usize,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            exit_code(&e)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    let config = err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<CoreError>().is_some_and(CoreError::is_config);
    ExitCode::from(if config { EXIT_CONFIG } else { EXIT_IO })
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let db = match &cli.database {
        Some(path) => load_database(path)
            .with_context(|| format!("Failed to load signature database {}", path.display()))?,
        None => SignatureDatabase::builtin(),
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("Failed to install Ctrl-C handler")?;

    let config = ScanConfig::new()
        .with_window_size(cli.window)
        .with_threads(cli.threads)
        .with_cancel(cancel);
    let session = CarveSession::new(db, config)?;

    let size = std::fs::metadata(&cli.input)
        .with_context(|| format!("Failed to open input: {}", cli.input.display()))?
        .len();
    let pb = progress_bar(size, cli.json)?;

    let outcome = session
        .carve_path(&cli.input, &|delta| pb.inc(delta))
        .with_context(|| format!("Failed to scan {}", cli.input.display()))?;
    pb.finish_and_clear();

    if outcome.cancelled {
        warn!(scanned = outcome.bytes_scanned, "scan interrupted, results cover the scanned prefix only");
    }

    let report = if cli.extract {
        let report = session
            .extract(&outcome.regions, &cli.input, &cli.output)
            .with_context(|| format!("Failed to extract into {}", cli.output.display()))?;
        Some(report)
    } else {
        None
    };

    if cli.json {
        print_json(&cli.input, &outcome, report.as_ref())?;
    } else {
        print_regions(&outcome);
        if let Some(report) = &report {
            print_extraction(report, &cli.output);
        }
    }

    let failed = report.as_ref().is_some_and(|r| r.failures() > 0);
    Ok(if failed { ExitCode::from(EXIT_IO) } else { ExitCode::SUCCESS })
}

fn progress_bar(size: u64, hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn print_regions(outcome: &CarveOutcome) {
    match outcome.identified() {
        Some(region) => println!("Identified as: {}", style(&region.type_id).green().bold()),
        None => println!("Identified as: {}", style("unknown").yellow()),
    }
    println!();

    if outcome.regions.is_empty() {
        println!("No signatures found.");
        return;
    }

    println!(
        "{:<6} {:<16} {:>18} {:>18} {:>12} {}",
        style("#").bold(),
        style("TYPE").bold(),
        style("START").bold(),
        style("END").bold(),
        style("SIZE").bold(),
        style("CONFIDENCE").bold()
    );
    println!("{}", "-".repeat(84));
    for (i, region) in outcome.regions.iter().enumerate() {
        println!(
            "{:<6} {:<16} {:>#18x} {:>#18x} {:>12} {}",
            i,
            region.type_id,
            region.start_offset,
            region.end_offset,
            region.len(),
            region.confidence
        );
    }

    println!();
    println!(
        "{} regions ({} exact) from {} headers, {} footers in {} bytes",
        style(outcome.regions.len()).green().bold(),
        outcome.exact_count(),
        outcome.headers,
        outcome.footers,
        outcome.bytes_scanned
    );
}

fn print_extraction(report: &ExtractionReport, output: &Path) {
    println!();
    println!(
        "Extracted {} files ({} bytes) to {}",
        style(report.succeeded()).green().bold(),
        report.bytes_written(),
        output.display()
    );
    if report.failures() > 0 {
        println!("{} regions failed:", style(report.failures()).red().bold());
        for failure in &report.failed {
            println!("  {}: {}", failure.region, failure.reason);
        }
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    input: String,
    identified: Option<&'a str>,
    #[serde(flatten)]
    outcome: &'a CarveOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    extraction: Option<&'a ExtractionReport>,
}

fn print_json(input: &Path, outcome: &CarveOutcome, report: Option<&ExtractionReport>) -> Result<()> {
    let output = JsonOutput {
        input: input.display().to_string(),
        identified: outcome.identified().map(|r| r.type_id.as_str()),
        outcome,
        extraction: report,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
