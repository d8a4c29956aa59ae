//! Caption-batch construction: candidate selection, splitting, padding.

use crate::types::{CaptionBatch, CaptionDatasetError, DatasetResult};
use data_contracts::CaptionIndex;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;

/// Token id used to right-pad caption rows.
pub const PAD_TOKEN: i64 = 0;

/// Build the padded input/label arrays for one window of sample keys.
///
/// For each key one candidate caption is chosen uniformly from the index;
/// that choice is the only source of run-to-run variation and is driven
/// entirely by the generator-owned `rng`. The input row drops the final
/// boundary token, the label row drops the first, and both are padded to
/// the longest input length within this window only. The index has been
/// validated at generator construction, so every candidate list is
/// non-empty and every candidate holds at least its two boundary markers.
pub(crate) fn form_captions_batch(
    index: &CaptionIndex,
    keys: &[&str],
    rng: &mut StdRng,
) -> DatasetResult<CaptionBatch> {
    let mut inputs: Vec<&[i64]> = Vec::with_capacity(keys.len());
    let mut labels: Vec<&[i64]> = Vec::with_capacity(keys.len());
    let mut lengths: Vec<usize> = Vec::with_capacity(keys.len());

    for &key in keys {
        let candidates =
            index
                .candidates(key)
                .ok_or_else(|| CaptionDatasetError::MissingCaption {
                    filename: key.to_string(),
                })?;
        let caption = &candidates[rng.random_range(0..candidates.len())];
        inputs.push(&caption[..caption.len() - 1]);
        labels.push(&caption[1..]);
        lengths.push(caption.len() - 1);
    }

    let max_len = lengths.iter().copied().max().unwrap_or(0);
    let mut input_arr = Array2::from_elem((keys.len(), max_len), PAD_TOKEN);
    let mut label_arr = Array2::from_elem((keys.len(), max_len), PAD_TOKEN);
    for (i, (input, label)) in inputs.iter().zip(&labels).enumerate() {
        for (j, &token) in input.iter().enumerate() {
            input_arr[[i, j]] = token;
        }
        for (j, &token) in label.iter().enumerate() {
            label_arr[[i, j]] = token;
        }
    }

    Ok(CaptionBatch {
        inputs: input_arr,
        labels: label_arr,
        lengths,
    })
}
