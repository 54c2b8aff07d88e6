use anyhow::{Context, Result};
use bootcheck_config::{BoardManifest, Fault};
use bootcheck_core::board::SimBoard;
use bootcheck_core::memory::ProgramImage;
use bootcheck_core::metrics::RunMetrics;
use bootcheck_core::report::Reporter;
use bootcheck_core::sequencer::Sequencer;
use bootcheck_core::summary::RunSummary;
use bootcheck_core::EngineError;
use clap::Parser;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_TEST_FAILURE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_FATAL_INIT: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the board manifest (YAML)
    #[arg(short, long)]
    system: PathBuf,

    /// Firmware ELF whose loadable segments fill the simulated flash
    #[arg(short, long)]
    firmware: Option<PathBuf>,

    /// Inject a hardware fault (repeatable), e.g. `--fault sram`
    #[arg(long = "fault")]
    faults: Vec<Fault>,

    /// Give up on a polling test after this many invocations
    #[arg(long)]
    max_polls: Option<u64>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,

    /// Enable per-poll and interrupt-guard tracing
    #[arg(short, long)]
    trace: bool,

    /// Clear the terminal before printing the banner
    #[arg(long)]
    clear: bool,
}

/// Manifest and firmware, after the command line has been applied.
struct Inputs {
    manifest: BoardManifest,
    image: Option<ProgramImage>,
    firmware_hash: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting bootcheck");

    let inputs = match load_inputs(&args) {
        Ok(inputs) => inputs,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let summary = match run(&args, inputs) {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(EngineError::Console(_)) = e.downcast_ref::<EngineError>() {
                error!("Run aborted: {:#}", e);
                return ExitCode::from(EXIT_TEST_FAILURE);
            }
            error!("Fatal: {:#}", e);
            return ExitCode::from(EXIT_FATAL_INIT);
        }
    };

    if let Some(path) = &args.json {
        match write_summary(&summary, path) {
            Ok(()) => info!("Run summary written to {:?}", path),
            Err(e) => error!("{:#}", e),
        }
    }

    if summary.all_passed() {
        return ExitCode::SUCCESS;
    }
    for failure in summary.failures() {
        warn!("FAILED #{} {} ({})", failure.index, failure.name, failure.result);
    }
    ExitCode::from(EXIT_TEST_FAILURE)
}

fn load_inputs(args: &Args) -> Result<Inputs> {
    info!("Loading board manifest: {:?}", args.system);
    let mut manifest = BoardManifest::from_file(&args.system)?;

    for fault in &args.faults {
        if !manifest.faults.contains(fault) {
            manifest.faults.push(*fault);
        }
    }
    if args.max_polls.is_some() {
        manifest.limits.max_polls = args.max_polls;
    }
    manifest.validate()?;

    let (image, firmware_hash) = match &args.firmware {
        Some(path) => {
            info!("Loading firmware: {:?}", path);
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read firmware {:?}", path))?;
            let image = bootcheck_loader::parse_elf(&bytes)
                .with_context(|| format!("Failed to load firmware {:?}", path))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let hash = format!("{:x}", hasher.finalize());
            info!("Firmware loaded, entry point {:#x}, sha256 {}", image.entry_point, hash);
            (Some(image), Some(hash))
        }
        None => (None, None),
    };

    Ok(Inputs {
        manifest,
        image,
        firmware_hash,
    })
}

fn run(args: &Args, inputs: Inputs) -> Result<RunSummary> {
    let manifest = &inputs.manifest;
    if !manifest.faults.is_empty() {
        let names: Vec<&str> = manifest.faults.iter().map(|f| f.as_str()).collect();
        info!("Injected faults: {}", names.join(", "));
    }

    let mut board = SimBoard::with_image(manifest, inputs.image.as_ref())
        .context("Board initialization failed")?;

    let metrics = Arc::new(RunMetrics::new());
    let mut sequencer = Sequencer::from_manifest(manifest);
    sequencer.add_observer(metrics.clone());
    if args.clear {
        sequencer.clear_screen_first();
    }

    let stdout = std::io::stdout();
    let mut reporter = Reporter::new(stdout.lock());
    let mut summary = sequencer.run(&mut board, &mut reporter)?;
    summary.firmware_hash = inputs.firmware_hash;

    info!(
        "{} passed, {} failed, {} primitive invocations in {:?}",
        metrics.get_passed(),
        metrics.get_failed(),
        metrics.get_invocations(),
        metrics.get_elapsed().unwrap_or_default()
    );

    Ok(summary)
}

fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = summary.to_json().context("Failed to serialize run summary")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write summary to {:?}", path))
}
