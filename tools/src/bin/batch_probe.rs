use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use caption_dataset::{BatchGenerator, GeneratorConfig, IdentifierSourceConfig, ImageBatch};
use captionforge_tools::ToolConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Drive a few inference batches end-to-end and print shapes and timings"
)]
struct Args {
    /// Image directory (defaults to the tool config's images_root).
    #[arg(long)]
    images: Option<PathBuf>,
    /// Annotations JSON with the images[].file_name/id array
    /// (defaults to the tool config's annotations_path).
    #[arg(long)]
    annotations: Option<PathBuf>,
    /// Samples per batch.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Stop after this many batches.
    #[arg(long, default_value_t = 4)]
    max_batches: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = ToolConfig::load();

    let images = args.images.unwrap_or(cfg.images_root);
    let annotations = args.annotations.unwrap_or(cfg.annotations_path);
    if !annotations.exists() {
        anyhow::bail!("annotations document not found: {}", annotations.display());
    }

    let mut config = GeneratorConfig::new(&images);
    config.batch_size = Some(args.batch_size.unwrap_or(cfg.batch_size));
    config.target_size = cfg.target_size;
    config.identifier_source = IdentifierSourceConfig::Annotations(annotations);
    let gen = BatchGenerator::new(config, None)?;

    println!(
        "probing {} samples in windows of {} ({} batches per pass)",
        gen.num_samples(),
        gen.batch_size(),
        gen.num_batches()
    );

    let mut iter = gen.inference_batches()?;
    for i in 0..args.max_batches {
        let started = Instant::now();
        let Some(batch) = iter.next() else { break };
        let batch = batch?;
        let elapsed = started.elapsed();
        let shape = match &batch.images {
            ImageBatch::Pixels(a) => format!("pixels {:?}", a.shape()),
            ImageBatch::Features(a) => format!("features {:?}", a.shape()),
        };
        println!(
            "batch {i}: {shape} ids={}..{} assembled in {:.1}ms",
            batch.image_ids.first().copied().unwrap_or_default(),
            batch.image_ids.last().copied().unwrap_or_default(),
            elapsed.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
