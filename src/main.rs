//! tabscore CLI
//!
//! Render requests from JSON files, inspect tab mappings and layouts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tabscore::storage::DirArtifactStore;
use tabscore::tab::DEFAULT_MAX_FRET;
use tabscore::{plan, request, HandlerConfig, RawRequest, RenderRequestHandler, TabMapper, Tuning};

/// Notation and tablature renderer for transcribed note data
#[derive(Parser, Debug)]
#[command(name = "tabscore")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a request file and write its artifacts
    Render {
        /// Path to the request JSON
        request: PathBuf,

        /// Directory for artifacts (kept inline in the summary when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show where a pitch lands on the fretboard
    Tab {
        /// MIDI pitch (0-127)
        pitch: u8,

        /// Tuning preset name
        #[arg(short, long, default_value = "standard")]
        tuning: String,

        /// Highest usable fret
        #[arg(long, default_value_t = DEFAULT_MAX_FRET)]
        max_fret: u8,
    },

    /// Print the layout plan for a request file as JSON
    Layout {
        /// Path to the request JSON
        request: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Render { request, out } => render(request, out),
        Commands::Tab { pitch, tuning, max_fret } => tab(pitch, &tuning, max_fret),
        Commands::Layout { request } => layout(request),
    }
}

fn read_request(path: &Path) -> Result<RawRequest> {
    let body = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    RawRequest::from_json(&body).with_context(|| format!("{} is not a valid request", path.display()))
}

fn render(path: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let raw = read_request(&path)?;
    let mut handler = RenderRequestHandler::new(HandlerConfig::default());
    if let Some(dir) = &out {
        let store = DirArtifactStore::new(dir).with_context(|| format!("cannot use {}", dir.display()))?;
        handler = handler.with_store(Arc::new(store));
    }

    let envelope = handler.handle(&raw)?;
    info!(
        fingerprint = %envelope.fingerprint,
        pages = envelope.metadata.page_count,
        "rendered {}",
        path.display()
    );
    println!("{}", serde_json::to_string_pretty(&envelope.summary())?);
    Ok(())
}

fn tab(pitch: u8, tuning: &str, max_fret: u8) -> Result<()> {
    if pitch > 127 {
        bail!("pitch must be between 0 and 127");
    }
    let Some(tuning) = Tuning::preset(tuning) else {
        bail!("unknown tuning preset '{tuning}'");
    };
    let mapping = TabMapper::new(tuning, max_fret).map(pitch);
    if mapping.mapped {
        println!("pitch {pitch}: string {}, fret {}", mapping.position.string, mapping.position.fret);
    } else {
        println!("pitch {pitch}: out of range, shown at string 1 fret 0");
    }
    Ok(())
}

fn layout(path: PathBuf) -> Result<()> {
    let raw = read_request(&path)?;
    let (score, options) = request::validate(&raw)?;
    println!("{}", serde_json::to_string_pretty(&plan(&score, &options))?);
    Ok(())
}
