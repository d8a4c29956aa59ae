//! Dataset listing, caption batching, and image preprocessing for training
//! caption models.
//!
//! This crate provides:
//! - Non-recursive `*.jpg` directory listing and annotation-document indexing
//! - Deterministic image preprocessing (center crop, normalize, resize)
//! - Padded caption-batch construction with per-window lengths
//! - Lazy training and inference batch iteration over fixed-size windows
//! - Corpus coverage summaries with threshold-driven validation

pub mod batch;
pub mod captions;
pub mod corpus;
pub mod preprocess;
pub mod types;
pub mod validation;

pub use batch::{BatchGenerator, InferenceBatches, TrainingBatches};
pub use captions::PAD_TOKEN;
pub use corpus::{list_images, load_identifier_map};
pub use preprocess::Preprocessor;
pub use types::{
    CaptionBatch, CaptionDatasetError, CorpusSummary, DatasetResult, GeneratorConfig,
    IdentifierSourceConfig, ImageBatch, ImageSourceConfig, InferenceBatch, TrainingBatch,
    ValidationOutcome, ValidationReport, ValidationThresholds, DEFAULT_SEED, DEFAULT_TARGET_SIZE,
};
pub use validation::{summarize_corpus, summarize_root_with_thresholds, validate_summary};
