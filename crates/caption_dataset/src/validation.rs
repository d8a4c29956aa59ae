//! Corpus validation and quality summaries.

use crate::corpus::{list_images, sample_key};
use crate::types::{
    CorpusSummary, DatasetResult, ValidationOutcome, ValidationReport, ValidationThresholds,
};
use data_contracts::{CaptionIndex, FeatureIndex};
use std::path::{Path, PathBuf};

/// Count coverage of the caption and feature indices over a listing.
pub fn summarize_corpus(
    listing: &[PathBuf],
    captions: Option<&CaptionIndex>,
    features: Option<&FeatureIndex>,
) -> CorpusSummary {
    let mut summary = CorpusSummary {
        listed: listing.len(),
        ..Default::default()
    };
    for path in listing {
        let key = sample_key(path);
        if let Some(index) = captions {
            match index.candidates(key) {
                Some(candidates) => {
                    summary.captioned += 1;
                    if candidates.is_empty() || candidates.iter().any(|c| c.len() < 2) {
                        summary.short_caption += 1;
                    }
                }
                None => summary.missing_caption += 1,
            }
        }
        if let Some(index) = features {
            if index.get(key).is_some() {
                summary.with_feature += 1;
            } else {
                summary.missing_feature += 1;
            }
        }
    }
    summary
}

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: ratio {ratio:.3} exceeds max {max_r:.3}"));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

pub fn validate_summary(
    summary: CorpusSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let denom = summary.listed.max(1) as f32;
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    apply_thresholds(
        "missing captions",
        summary.missing_caption,
        summary.missing_caption as f32 / denom,
        thresholds.max_missing_caption,
        thresholds.max_missing_caption_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "short captions",
        summary.short_caption,
        summary.short_caption as f32 / denom,
        thresholds.max_short_caption,
        None,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "missing features",
        summary.missing_feature,
        summary.missing_feature as f32 / denom,
        thresholds.max_missing_feature,
        thresholds.max_missing_feature_ratio,
        &mut outcome,
        &mut reasons,
    );

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

/// List a directory and validate index coverage against it in one step.
pub fn summarize_root_with_thresholds(
    dir: &Path,
    captions: Option<&CaptionIndex>,
    features: Option<&FeatureIndex>,
    thresholds: &ValidationThresholds,
) -> DatasetResult<ValidationReport> {
    let listing = list_images(dir)?;
    let summary = summarize_corpus(&listing, captions, features);
    Ok(validate_summary(summary, thresholds))
}
