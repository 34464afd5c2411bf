use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use platescan::config::{LocalizerConfig, SelectionMode};
use platescan::{DebugConfig, PipelineConfig, PlateResult, RecognitionError, Recognizer};

#[derive(Parser)]
#[command(name = "platescan")]
#[command(about = "Read vehicle license plates from photos")]
struct Cli {
    /// Input image files
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// Pipeline configuration file
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Directory holding the model files
    #[arg(long, value_name = "DIR")]
    models_dir: Option<PathBuf>,

    /// Keep only the widest plate candidate, or read every candidate
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Run the detector at scale factors 1.05 through 1.30
    #[arg(long)]
    multi_scale: bool,

    /// Skip the vehicle pre-filter
    #[arg(long)]
    skip_vehicle_check: bool,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Best,
    All,
}

#[derive(Serialize)]
struct ImageReport<'a> {
    image: &'a Path,
    readings: Vec<&'a str>,
    plates: &'a [PlateResult],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    retryable: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn build_config(args: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.models_dir {
        config.models.dir = dir.clone();
    }
    if let Some(mode) = args.mode {
        config.localizer.selection = match mode {
            Mode::Best => SelectionMode::Best,
            Mode::All => SelectionMode::All,
        };
    }
    if args.multi_scale {
        config.localizer.scale_factors = LocalizerConfig::multi_scale_factors();
        config.localizer.min_neighbors = 8;
    }
    if args.skip_vehicle_check {
        config.vehicle.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn recognize_file(
    recognizer: &Recognizer,
    path: &Path,
    debug: Option<&DebugConfig>,
) -> anyhow::Result<platescan::Recognition> {
    let bytes = std::fs::read(path)?;
    let image = image::load_from_memory(&bytes).map_err(RecognitionError::from)?;
    info!(image = %path.display(), width = image.width(), height = image.height(), "loaded image");

    let recognition = match debug {
        Some(debug) => recognizer.recognize_image_with_debug(&image, debug)?,
        None => recognizer.recognize_image(&image)?,
    };
    Ok(recognition)
}

fn debug_dir_for(root: &DebugConfig, index: usize, path: &Path, total: usize) -> DebugConfig {
    if total == 1 {
        return root.clone();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    root.child(&format!("{:02}_{}", index + 1, stem))
}

fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RecognitionError>()
        .is_some_and(RecognitionError::is_retryable)
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Cli::parse();
    init_logging(args.verbose);

    let config = build_config(&args)?;
    let recognizer = Recognizer::from_config(config)?;

    let debug_root = args
        .debug_out
        .as_ref()
        .map(|dir| DebugConfig::new(dir.clone()))
        .transpose()?;

    let total = args.images.len();
    let results: Vec<_> = args
        .images
        .par_iter()
        .enumerate()
        .map(|(i, path)| {
            let debug = debug_root.as_ref().map(|root| debug_dir_for(root, i, path, total));
            recognize_file(&recognizer, path, debug.as_ref())
        })
        .collect();

    let mut any_retryable = false;
    let mut any_hard = false;

    for (path, result) in args.images.iter().zip(&results) {
        let retryable = match result {
            Ok(_) => false,
            Err(e) if is_retryable(e) => {
                any_retryable = true;
                true
            }
            Err(e) => {
                error!(image = %path.display(), error = %e, "recognition failed");
                any_hard = true;
                false
            }
        };

        if args.json {
            let report = ImageReport {
                image: path,
                readings: result
                    .as_ref()
                    .map(|r| r.readings.iter().map(String::as_str).collect())
                    .unwrap_or_default(),
                plates: result.as_ref().map(|r| r.plates.as_slice()).unwrap_or(&[]),
                error: result.as_ref().err().map(|e| e.to_string()),
                retryable,
            };
            println!("{}", serde_json::to_string(&report)?);
            continue;
        }

        match result {
            Ok(recognition) => {
                let readings: Vec<&str> = recognition.readings.iter().map(String::as_str).collect();
                println!("{}: {}", path.display(), readings.join(", "));
            }
            Err(e) if retryable => {
                println!("{}: {} (please retake the photo)", path.display(), e);
            }
            Err(e) => {
                println!("{}: error: {}", path.display(), e);
            }
        }
    }

    Ok(if any_hard {
        ExitCode::from(1)
    } else if any_retryable {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}
