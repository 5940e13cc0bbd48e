//! # PaperRoute CLI (`paperroute`)
//!
//! ## Usage
//!
//! ```bash
//! paperroute [--config ./config.yaml] [-v] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `paperroute check` | Load and validate the configuration, print a summary |
//! | `paperroute ocr <FILE>` | Run one file through the OCR service |
//! | `paperroute completions <SHELL>` | Print a shell completion script |
//!
//! Without `--config`, `config.yaml` is searched for in the current
//! directory and its ancestors.

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use paperroute::config::{Config, ConfigLoader};
use paperroute::models::{JobStatus, ProcessingJob};
use paperroute::ocr::{self, OcrClient};

/// PaperRoute: document intake, OCR and routing.
#[derive(Parser)]
#[command(
    name = "paperroute",
    about = "PaperRoute: turn scanned documents into classified, routed Markdown",
    version
)]
struct Cli {
    /// Path to config.yaml.
    ///
    /// Defaults to the nearest `config.yaml` in the current directory or
    /// one of its parents.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration.
    ///
    /// Resolves `${VAR}` references, checks every required field and
    /// verifies that the watch directory exists.
    Check,

    /// Extract text from a PDF or image.
    ///
    /// Retries server errors and timeouts with exponential backoff.
    Ocr {
        /// File to upload (pdf, png, jpg, jpeg, tiff, tif).
        file: PathBuf,

        /// Print the full result as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// Print a shell completion script to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "paperroute=info",
        1 => "paperroute=debug",
        _ => "paperroute=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load(loader: &ConfigLoader, path: Option<&Path>) -> anyhow::Result<std::sync::Arc<Config>> {
    loader.load(path).context("Failed to load configuration")
}

fn print_summary(cfg: &Config) {
    println!("Configuration OK");
    println!("  watch:    {}", cfg.directories.watch.display());
    println!("  output:   {}", cfg.directories.output.display());
    println!("  service:  {}", cfg.deepfellow.base_url);
    println!("  ocr:      {}", ocr::build_url(&cfg.deepfellow));
    println!("  recipients:");
    for r in &cfg.recipients {
        println!("    - {} [{}]", r.name, r.tags.join(", "));
    }
}

async fn run_ocr(cfg: &Config, file: &Path, json: bool) -> anyhow::Result<()> {
    // A job is only created for a file the OCR service would accept.
    ocr::validate_file(file)?;

    let mut job = ProcessingJob::from_path(file)?;
    job.set_status(JobStatus::Processing);
    tracing::debug!(file = %job.file_path().display(), file_type = job.file_type(), "job started");

    let client = OcrClient::new(cfg);
    match client.extract_text(file).await {
        Ok(result) => {
            job.set_status(JobStatus::Done);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.text);
            }
            Ok(())
        }
        Err(e) => {
            job.set_status(JobStatus::Failed);
            tracing::error!(file = %job.file_path().display(), status = %job.status(), "job failed");
            Err(e).with_context(|| format!("OCR failed for {}", file.display()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "paperroute", &mut std::io::stdout());
        return Ok(());
    }

    let loader = ConfigLoader::new();
    let cfg = load(&loader, cli.config.as_deref())?;

    match cli.command {
        Commands::Check => print_summary(&cfg),
        Commands::Ocr { file, json } => run_ocr(&cfg, &file, json).await?,
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
