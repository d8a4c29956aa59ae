use clap::Parser;
use std::fs;
use std::path::PathBuf;

use caption_dataset::{summarize_root_with_thresholds, ValidationOutcome, ValidationThresholds};
use captionforge_tools::ToolConfig;
use data_contracts::CaptionIndex;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Validate caption coverage over an image directory and emit a JSON report"
)]
struct Args {
    /// Image directory (defaults to the tool config's images_root).
    #[arg(long)]
    images: Option<PathBuf>,
    /// Caption index JSON (filename -> candidate token sequences and ids).
    /// When omitted, only the listing itself is summarized.
    #[arg(long)]
    captions: Option<PathBuf>,
    /// Fail when more than this many listed images lack a caption.
    #[arg(long)]
    max_missing: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = ToolConfig::load();

    let images = args.images.unwrap_or(cfg.images_root);
    if !images.exists() {
        anyhow::bail!("image directory not found: {}", images.display());
    }

    let captions = match &args.captions {
        Some(path) => {
            let raw = fs::read(path)?;
            let index: CaptionIndex = serde_json::from_slice(&raw)?;
            Some(index)
        }
        None => None,
    };

    // Environment thresholds apply first; the flag tightens missing captions.
    let mut thresholds = ValidationThresholds::from_env();
    if args.max_missing.is_some() {
        thresholds.max_missing_caption = args.max_missing;
    }

    let report = summarize_root_with_thresholds(&images, captions.as_ref(), None, &thresholds)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.outcome == ValidationOutcome::Fail {
        anyhow::bail!("corpus validation failed: {}", report.reasons.join("; "));
    }
    Ok(())
}
