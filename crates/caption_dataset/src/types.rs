//! Core types, error definitions, and batch structures for caption_dataset.

use data_contracts::{FeatureIndex, ValidationError};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, CaptionDatasetError>;

#[derive(Debug, Error)]
pub enum CaptionDatasetError {
    #[error("no image files found under {dir}")]
    NoImages { dir: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("annotations validation failed at {path}: {source}")]
    Annotations {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("caption index validation failed: {source}")]
    Captions {
        #[source]
        source: ValidationError,
    },
    #[error("invalid batch size 0")]
    InvalidBatchSize,
    #[error("no caption entry for {filename}")]
    MissingCaption { filename: String },
    #[error("no feature vector for {filename}")]
    MissingFeature { filename: String },
    #[error("no identifier for {filename}")]
    MissingIdentifier { filename: String },
    #[error("identifier emission requested but no caption index was supplied")]
    MissingCaptionIndex,
    #[error("inference batches require an annotations-built identifier map")]
    MissingAnnotationsIndex,
    #[error("feature vector for {filename} has unusable shape {shape:?}: {msg}")]
    FeatureShape {
        filename: String,
        shape: Vec<usize>,
        msg: String,
    },
}

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_TARGET_SIZE: (u32, u32) = (299, 299);

/// Where per-sample image data comes from. Resolved once at construction;
/// a supplied feature index fully replaces on-disk decoding.
#[derive(Debug, Clone, Default)]
pub enum ImageSourceConfig {
    #[default]
    DecodePixels,
    Features(FeatureIndex),
}

/// Where per-sample identifiers come from.
#[derive(Debug, Clone, Default)]
pub enum IdentifierSourceConfig {
    /// Training batches carry no identifier list.
    #[default]
    None,
    /// Resolve through the caption index's filename -> id map (evaluation
    /// against ground truth).
    CaptionIndex,
    /// Parse the annotations document at this path once at construction
    /// (inference without ground truth).
    Annotations(PathBuf),
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Directory scanned (non-recursively) for `*.jpg` files.
    pub image_dir: PathBuf,
    /// Samples per batch. `None` puts the whole dataset into a single batch.
    pub batch_size: Option<usize>,
    /// Target (width, height) for decoded images.
    pub target_size: (u32, u32),
    /// Seed for the generator-owned RNG driving caption selection.
    pub seed: u64,
    pub image_source: ImageSourceConfig,
    pub identifier_source: IdentifierSourceConfig,
}

impl GeneratorConfig {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            batch_size: None,
            target_size: DEFAULT_TARGET_SIZE,
            seed: DEFAULT_SEED,
            image_source: ImageSourceConfig::default(),
            identifier_source: IdentifierSourceConfig::default(),
        }
    }
}

/// Per-sample image data stacked along a leading batch dimension,
/// window order preserved.
#[derive(Debug, Clone)]
pub enum ImageBatch {
    /// Decoded pixels, `[batch, height, width, 3]`, values in [-0.5, 0.5).
    Pixels(Array4<f32>),
    /// Precomputed feature vectors, `[batch, dim]`.
    Features(Array2<f32>),
}

impl ImageBatch {
    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        match self {
            ImageBatch::Pixels(a) => a.shape()[0],
            ImageBatch::Features(a) => a.shape()[0],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Padded caption arrays for one window.
///
/// `inputs` and `labels` are `[batch, max_len]` where `max_len` is the
/// longest unpadded input within this window; positions at or past
/// `lengths[i]` hold the padding token. Row `i` of every field corresponds
/// to the same source filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionBatch {
    pub inputs: Array2<i64>,
    pub labels: Array2<i64>,
    /// Unpadded input length per sample.
    pub lengths: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TrainingBatch {
    pub images: ImageBatch,
    pub captions: CaptionBatch,
    /// Present when the generator was configured with an identifier source.
    pub image_ids: Option<Vec<u64>>,
}

#[derive(Debug, Clone)]
pub struct InferenceBatch {
    pub images: ImageBatch,
    pub image_ids: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusSummary {
    /// `*.jpg` files found in the listing.
    pub listed: usize,
    pub captioned: usize,
    pub missing_caption: usize,
    /// Samples with at least one candidate shorter than 2 tokens, or none.
    pub short_caption: usize,
    pub with_feature: usize,
    pub missing_feature: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_missing_caption: Option<usize>,
    pub max_short_caption: Option<usize>,
    pub max_missing_feature: Option<usize>,
    pub max_missing_caption_ratio: Option<f32>,
    pub max_missing_feature_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_ratio(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_missing_caption: parse_usize("CAPTION_DATASET_MAX_MISSING_CAPTION"),
            max_short_caption: parse_usize("CAPTION_DATASET_MAX_SHORT_CAPTION"),
            max_missing_feature: parse_usize("CAPTION_DATASET_MAX_MISSING_FEATURE"),
            max_missing_caption_ratio: parse_ratio("CAPTION_DATASET_MAX_MISSING_CAPTION_RATIO"),
            max_missing_feature_ratio: parse_ratio("CAPTION_DATASET_MAX_MISSING_FEATURE_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: CorpusSummary,
}
