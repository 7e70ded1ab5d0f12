//! newsprint-ocr command line.
//!
//! ```bash
//! newsprint-ocr run -i scans/ -o output/ --stage both
//! newsprint-ocr run -i output/ -o output/ --stage 2 --no-resume
//! newsprint-ocr fix -i scans/ -o output/ --max-side 2500 --concurrency 2
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use newsprint_ocr::config::{self, LayoutMode, Settings};
use newsprint_ocr::pipeline::fix::{
    apply_fix_overrides, run_fix, DEFAULT_FIX_CONCURRENCY, DEFAULT_FIX_MAX_SIDE,
};
use newsprint_ocr::pipeline::{Pipeline, PipelineError, Stage};

/// Exit code after a second Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "newsprint-ocr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Two-stage OCR for scanned newspaper pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment and/or recognize a folder of pages
    Run {
        /// Input folder: images for stage 1/both, stage-1 output for stage 2
        #[arg(short, long)]
        input: PathBuf,

        /// Output folder
        #[arg(short, long)]
        output: PathBuf,

        /// Stage to run: 1 (layout), 2 (recognition) or both
        #[arg(long, default_value = "both")]
        stage: Stage,

        /// Reprocess items that already have output
        #[arg(long)]
        no_resume: bool,

        /// Config file (default: ./config.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the job-based layout API
        #[arg(long)]
        async_layout: bool,
    },
    /// Re-run pages whose document is missing or near-empty
    Fix {
        /// Folder of source images
        #[arg(short, long)]
        input: PathBuf,

        /// Output folder of the earlier run
        #[arg(short, long)]
        output: PathBuf,

        /// Config file (default: ./config.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Longest side of the copy submitted for layout analysis
        #[arg(long, default_value_t = DEFAULT_FIX_MAX_SIDE)]
        max_side: u32,

        /// Concurrent recognition requests
        #[arg(long, default_value_t = DEFAULT_FIX_CONCURRENCY)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    newsprint_ocr::init_tracing();
    let cli = Cli::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    tokio::spawn(watch_interrupts(Arc::clone(&shutdown)));

    let result = tokio::task::spawn_blocking(move || run_command(cli.command, shutdown)).await;
    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Run failed");
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline task panicked");
            ExitCode::from(1)
        }
    }
}

/// First Ctrl-C: stop dispatching new work. Second Ctrl-C: exit now.
async fn watch_interrupts(shutdown: Arc<AtomicBool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot install Ctrl-C handler");
        return;
    }
    shutdown.store(true, Ordering::Relaxed);
    tracing::warn!("Interrupt received, finishing in-flight requests (Ctrl-C again to exit)");

    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Second interrupt, exiting");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
}

fn load(config_path: Option<&Path>) -> Result<Settings, PipelineError> {
    let path = config::resolve_config_path(config_path);
    tracing::info!(path = %path.display(), "Loading configuration");
    Ok(config::load_settings(&path)?)
}

fn run_command(command: Commands, shutdown: Arc<AtomicBool>) -> Result<(), PipelineError> {
    match command {
        Commands::Run {
            input,
            output,
            stage,
            no_resume,
            config,
            async_layout,
        } => {
            let mut settings = load(config.as_deref())?;
            if async_layout {
                settings.layout.mode = LayoutMode::Async;
            }
            let pipeline = Pipeline::from_settings(&settings, stage, shutdown)?;
            let stats = pipeline.run_folder(&input, &output, stage, !no_resume)?;
            log_json("Final statistics", &stats);
        }
        Commands::Fix {
            input,
            output,
            config,
            max_side,
            concurrency,
        } => {
            let mut settings = load(config.as_deref())?;
            apply_fix_overrides(&mut settings, max_side, concurrency);
            let pipeline = Pipeline::from_settings(&settings, Stage::Both, shutdown)?;
            let stats = run_fix(
                &pipeline,
                &input,
                &output,
                settings.processing.min_document_bytes,
            )?;
            log_json("Fix statistics", &stats);
        }
    }
    Ok(())
}

fn log_json<T: serde::Serialize>(label: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => tracing::info!(stats = %json, "{label}"),
        Err(e) => tracing::warn!(error = %e, "Cannot serialize {label}"),
    }
}
