//! Shared data contracts for annotation documents, caption indices, and
//! feature-vector indices.

pub mod annotations;

pub use annotations::{AnnotationsDoc, CaptionIndex, FeatureIndex, ImageEntry, ValidationError};
