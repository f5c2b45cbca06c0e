//! Arc overhang CLI - rewrites slicer G-code in place.
//!
//! Usage:
//!   arc-overhang <input.gcode>
//!   arc-overhang <input.gcode> -o processed.gcode
//!
//! Exit codes:
//!   0  bridge regions replaced by arcs
//!   2  input file not found
//!   3  motion program could not be parsed
//!   4  no bridge regions found (file unchanged)
//!   5  all regions rejected or failed (file unchanged)
//!   6  configuration error (file unchanged)

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::time::Duration;

use arc_overhang::{gcode, ArcConfig, Error, MotionProgram, Pipeline};

/// Rewrite slicer G-code so bridge infill prints as concentric arc
/// overhangs.
#[derive(Parser, Debug)]
#[command(name = "arc-overhang")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input motion program (G-code); rewritten in place unless --output
    /// is given
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Write the result here instead of replacing the input
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Worker threads for region planning (0 = single-threaded)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let text = match std::fs::read_to_string(&cli.input) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("error: {} not found", cli.input.display());
            return Ok(2);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", cli.input.display()));
        }
    };

    let mut program = match MotionProgram::parse(&text) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(3);
        }
    };
    info!("parsed {} layers", program.layers.len());

    let mut config = match ArcConfig::from_program_with_sidecar(&program, &cli.input) {
        Ok(config) => config,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {}", e);
            return Ok(code);
        }
    };
    if cli.threads > 0 {
        config.threads = cli.threads;
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.set_message("planning arc overhangs...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let report = match Pipeline::new(config).process(&mut program) {
        Ok(report) => report,
        Err(e) => {
            spinner.finish_and_clear();
            eprintln!("error: {}", e);
            return Ok(exit_code_for(&e));
        }
    };
    spinner.finish_and_clear();

    if report.regions_found == 0 {
        println!("No bridge infill found; file unchanged.");
        return Ok(4);
    }
    if !report.modified() {
        println!(
            "Found {} bridge regions but none could be replaced ({} rejected, {} failed); \
             file unchanged.",
            report.regions_found, report.regions_rejected, report.regions_failed
        );
        return Ok(5);
    }

    let target = cli.output.as_deref().unwrap_or(&cli.input);
    gcode::write_atomic(target, &program.render())
        .with_context(|| format!("failed to write {}", target.display()))?;

    println!("Arc overhangs written to {}", target.display());
    println!(
        "  Regions: {} planned, {} rejected, {} failed",
        report.regions_planned, report.regions_rejected, report.regions_failed
    );
    println!("  Arcs: {}", report.arcs_emitted);
    Ok(0)
}

fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Parse(_) => 3,
        Error::Config(_) => 6,
        Error::Io(_) => 2,
        Error::Emit(_) | Error::Cancelled => 1,
    }
}
