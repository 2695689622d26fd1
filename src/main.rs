use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use faceprobe::response::Response;
use faceprobe::{actions, logging, Action, CapabilityError, Config, FaceProcessor, Request};

/// Face detection, embedding comparison and image quality scoring.
///
/// Prints one JSON document to stdout (or --output). Diagnostics go to stderr;
/// set FACEPROBE_LOG=debug for detail.
#[derive(Parser, Debug)]
#[command(name = "faceprobe", version, about)]
struct Args {
    /// Action to perform
    #[arg(value_enum)]
    action: Action,

    /// Path or URL of the first image
    #[arg(long)]
    img1: Option<String>,

    /// Path or URL of the second image (for comparison)
    #[arg(long)]
    img2: Option<String>,

    /// First embedding as a JSON array
    #[arg(long)]
    emb1: Option<String>,

    /// Second embedding as a JSON array
    #[arg(long)]
    emb2: Option<String>,

    /// Write the JSON result to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file (default: $FACEPROBE_CONFIG or $XDG_CONFIG_HOME/faceprobe/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn request(&self) -> Request {
        Request {
            action: self.action,
            img1: self.img1.clone(),
            img2: self.img2.clone(),
            emb1: self.emb1.clone(),
            emb2: self.emb2.clone(),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, CapabilityError> {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    loaded.map_err(|e| CapabilityError::Config(format!("{:#}", e)))
}

fn emit(document: &serde_json::Value, output: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string(document)?;

    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write result to {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", text)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if let Err(e) = logging::init(args.log_dir.clone()) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    let request = args.request();
    let processor = load_config(args.config.as_deref())
        .and_then(|config| FaceProcessor::init(config, request.requirements()));

    let processor = match processor {
        Ok(processor) => processor,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            emit(&Response::<()>::failure(e.to_string()).to_json(), args.output.as_deref())?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let document = actions::run(&processor, &request);
    emit(&document, args.output.as_deref())?;

    Ok(ExitCode::SUCCESS)
}
