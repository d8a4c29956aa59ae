//! Batch generation: windowing, image resolution, lazy iteration.

use crate::captions::form_captions_batch;
use crate::corpus::{list_images, load_identifier_map, sample_key};
use crate::preprocess::Preprocessor;
use crate::types::{
    CaptionDatasetError, DatasetResult, GeneratorConfig, IdentifierSourceConfig, ImageBatch,
    ImageSourceConfig, InferenceBatch, TrainingBatch,
};
use data_contracts::{CaptionIndex, FeatureIndex};
use ndarray::{Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug)]
enum ImageSource {
    Decode(Preprocessor),
    Features(FeatureIndex),
}

#[derive(Debug)]
enum IdentifierSource {
    None,
    Captions,
    Annotations(HashMap<String, u64>),
}

/// Pull-based generator over a fixed image listing.
///
/// Constructed once with static configuration and reused across epochs: the
/// batch-producing methods return fresh lazy iterators that restart from the
/// beginning of the listing, while the seeded RNG driving caption selection
/// advances for the generator's entire lifetime. The training iterator
/// borrows the generator mutably, so interleaving two iterations over one
/// instance is rejected at compile time.
pub struct BatchGenerator {
    listing: Vec<PathBuf>,
    batch_size: usize,
    images: ImageSource,
    identifiers: IdentifierSource,
    captions: Option<CaptionIndex>,
    rng: StdRng,
    log_every_samples: Option<usize>,
}

impl BatchGenerator {
    pub fn new(config: GeneratorConfig, captions: Option<CaptionIndex>) -> DatasetResult<Self> {
        let listing = list_images(&config.image_dir)?;
        let batch_size = match config.batch_size {
            Some(0) => return Err(CaptionDatasetError::InvalidBatchSize),
            Some(n) => n,
            None => {
                eprintln!(
                    "[dataset] batch size not set; using the full dataset ({} samples)",
                    listing.len()
                );
                listing.len()
            }
        };

        if let Some(index) = &captions {
            index
                .validate()
                .map_err(|source| CaptionDatasetError::Captions { source })?;
        }

        let identifiers = match config.identifier_source {
            IdentifierSourceConfig::None => IdentifierSource::None,
            IdentifierSourceConfig::CaptionIndex => {
                if captions.is_none() {
                    return Err(CaptionDatasetError::MissingCaptionIndex);
                }
                IdentifierSource::Captions
            }
            IdentifierSourceConfig::Annotations(path) => {
                IdentifierSource::Annotations(load_identifier_map(&path)?)
            }
        };

        let images = match config.image_source {
            ImageSourceConfig::DecodePixels => {
                ImageSource::Decode(Preprocessor::new(config.target_size))
            }
            ImageSourceConfig::Features(index) => ImageSource::Features(index),
        };

        Ok(Self {
            listing,
            batch_size,
            images,
            identifiers,
            captions,
            rng: StdRng::seed_from_u64(config.seed),
            log_every_samples: log_every_from_env(),
        })
    }

    pub fn num_samples(&self) -> usize {
        self.listing.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches per pass, counting the trailing partial window.
    pub fn num_batches(&self) -> usize {
        self.listing.len().div_ceil(self.batch_size)
    }

    /// Change the window size between passes. `None` restores whole-dataset
    /// batching.
    pub fn set_batch_size(&mut self, batch_size: Option<usize>) -> DatasetResult<()> {
        self.batch_size = match batch_size {
            Some(0) => return Err(CaptionDatasetError::InvalidBatchSize),
            Some(n) => n,
            None => self.listing.len(),
        };
        Ok(())
    }

    /// The filename-indexed caption view, when a caption index was supplied.
    pub fn captions(&self) -> Option<&CaptionIndex> {
        self.captions.as_ref()
    }

    /// Lazy training/evaluation pass over the listing: consecutive windows
    /// of `batch_size` samples, the last one possibly short. Requires a
    /// caption index.
    pub fn batches(&mut self) -> DatasetResult<TrainingBatches<'_>> {
        if self.captions.is_none() {
            return Err(CaptionDatasetError::MissingCaptionIndex);
        }
        let progress = Progress::new(self.log_every_samples);
        Ok(TrainingBatches {
            gen: self,
            cursor: 0,
            progress,
        })
    }

    /// Lazy inference pass: same windowing and image resolution as
    /// [`BatchGenerator::batches`], but each batch carries only images and
    /// the identifiers parsed from the annotations document.
    pub fn inference_batches(&self) -> DatasetResult<InferenceBatches<'_>> {
        if !matches!(self.identifiers, IdentifierSource::Annotations(_)) {
            return Err(CaptionDatasetError::MissingAnnotationsIndex);
        }
        Ok(InferenceBatches {
            gen: self,
            cursor: 0,
            progress: Progress::new(self.log_every_samples),
        })
    }

    fn assemble_training(&mut self, window: &[PathBuf]) -> DatasetResult<TrainingBatch> {
        let keys: Vec<&str> = window.iter().map(|p| sample_key(p)).collect();
        let images = resolve_images(&self.images, window)?;
        let index = self
            .captions
            .as_ref()
            .ok_or(CaptionDatasetError::MissingCaptionIndex)?;
        let captions = form_captions_batch(index, &keys, &mut self.rng)?;
        let image_ids = match &self.identifiers {
            IdentifierSource::Captions => Some(resolve_ids(&index.filename_to_id, &keys)?),
            _ => None,
        };
        Ok(TrainingBatch {
            images,
            captions,
            image_ids,
        })
    }

    fn assemble_inference(&self, window: &[PathBuf]) -> DatasetResult<InferenceBatch> {
        let keys: Vec<&str> = window.iter().map(|p| sample_key(p)).collect();
        let images = resolve_images(&self.images, window)?;
        let IdentifierSource::Annotations(map) = &self.identifiers else {
            return Err(CaptionDatasetError::MissingAnnotationsIndex);
        };
        let image_ids = resolve_ids(map, &keys)?;
        Ok(InferenceBatch { images, image_ids })
    }
}

fn resolve_images(source: &ImageSource, window: &[PathBuf]) -> DatasetResult<ImageBatch> {
    match source {
        ImageSource::Decode(pre) => {
            let (tw, th) = pre.target();
            let mut stack = Array4::zeros((window.len(), th as usize, tw as usize, 3));
            for (i, path) in window.iter().enumerate() {
                let sample = pre.load(path)?;
                stack.index_axis_mut(Axis(0), i).assign(&sample);
            }
            Ok(ImageBatch::Pixels(stack))
        }
        ImageSource::Features(index) => {
            let mut dim: Option<usize> = None;
            let mut rows: Vec<Vec<f32>> = Vec::with_capacity(window.len());
            for path in window {
                let key = sample_key(path);
                let raw = index
                    .get(key)
                    .ok_or_else(|| CaptionDatasetError::MissingFeature {
                        filename: key.to_string(),
                    })?;
                // Squeeze: every singleton axis drops; exactly one axis may remain.
                let kept: Vec<usize> = raw.shape().iter().copied().filter(|&d| d != 1).collect();
                if kept.len() > 1 {
                    return Err(CaptionDatasetError::FeatureShape {
                        filename: key.to_string(),
                        shape: raw.shape().to_vec(),
                        msg: "more than one non-singleton axis".to_string(),
                    });
                }
                let len = kept.first().copied().unwrap_or(1);
                match dim {
                    None => dim = Some(len),
                    Some(d) if d != len => {
                        return Err(CaptionDatasetError::FeatureShape {
                            filename: key.to_string(),
                            shape: raw.shape().to_vec(),
                            msg: format!("length {len} differs from batch length {d}"),
                        });
                    }
                    _ => {}
                }
                rows.push(raw.iter().copied().collect());
            }
            let dim = dim.unwrap_or(0);
            let mut stacked = Array2::zeros((window.len(), dim));
            for (i, row) in rows.iter().enumerate() {
                for (j, &v) in row.iter().enumerate() {
                    stacked[[i, j]] = v;
                }
            }
            Ok(ImageBatch::Features(stacked))
        }
    }
}

fn resolve_ids(map: &HashMap<String, u64>, keys: &[&str]) -> DatasetResult<Vec<u64>> {
    keys.iter()
        .map(|&key| {
            map.get(key)
                .copied()
                .ok_or_else(|| CaptionDatasetError::MissingIdentifier {
                    filename: key.to_string(),
                })
        })
        .collect()
}

fn log_every_from_env() -> Option<usize> {
    match std::env::var("CAPTION_DATASET_LOG_EVERY") {
        Ok(val) => {
            if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                None
            } else {
                val.parse::<usize>().ok().filter(|v| *v > 0)
            }
        }
        Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
    }
}

struct Progress {
    started: Instant,
    last_log: Instant,
    processed_samples: usize,
    processed_batches: usize,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
}

impl Progress {
    fn new(log_every_samples: Option<usize>) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_log: now,
            processed_samples: 0,
            processed_batches: 0,
            last_logged_samples: 0,
            log_every_samples,
        }
    }

    fn record(&mut self, batch_len: usize) {
        self.processed_samples += batch_len;
        self.processed_batches += 1;
        self.maybe_log();
    }

    fn maybe_log(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        if processed_since < threshold && self.last_log.elapsed() < Duration::from_secs(30) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let rate = self.processed_samples as f32 / secs;
        eprintln!(
            "[dataset] batches={} samples={} elapsed={:.1}s rate={:.1} img/s",
            self.processed_batches, self.processed_samples, secs, rate
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}

/// Iterator over training/evaluation batches for one pass.
pub struct TrainingBatches<'a> {
    gen: &'a mut BatchGenerator,
    cursor: usize,
    progress: Progress,
}

impl Iterator for TrainingBatches<'_> {
    type Item = DatasetResult<TrainingBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.gen.listing.len() {
            return None;
        }
        let end = (self.cursor + self.gen.batch_size).min(self.gen.listing.len());
        let window = self.gen.listing[self.cursor..end].to_vec();
        self.cursor = end;

        let result = self.gen.assemble_training(&window);
        if let Ok(batch) = &result {
            self.progress.record(batch.captions.lengths.len());
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.gen.listing.len() - self.cursor).div_ceil(self.gen.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TrainingBatches<'_> {}

/// Iterator over inference batches for one pass.
pub struct InferenceBatches<'a> {
    gen: &'a BatchGenerator,
    cursor: usize,
    progress: Progress,
}

impl Iterator for InferenceBatches<'_> {
    type Item = DatasetResult<InferenceBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.gen.listing.len() {
            return None;
        }
        let end = (self.cursor + self.gen.batch_size).min(self.gen.listing.len());
        let window = &self.gen.listing[self.cursor..end];
        self.cursor = end;

        let result = self.gen.assemble_inference(window);
        if let Ok(batch) = &result {
            self.progress.record(batch.image_ids.len());
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.gen.listing.len() - self.cursor).div_ceil(self.gen.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for InferenceBatches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use std::fs;
    use std::path::Path;

    /// Dummy jpgs (never decoded on the feature path), one distinct feature
    /// vector and one caption per file.
    fn synthetic_corpus(dir: &Path, count: usize) -> (FeatureIndex, CaptionIndex) {
        let mut features = FeatureIndex::default();
        let mut captions = CaptionIndex::default();
        for i in 0..count {
            let name = format!("img_{i:03}.jpg");
            fs::write(dir.join(&name), b"not a real jpeg").unwrap();
            let v = i as f32;
            features.insert(
                &name,
                ArrayD::from_shape_vec(vec![1, 3], vec![v, v + 0.1, v + 0.2]).unwrap(),
            );
            captions.insert(&name, vec![vec![1, 10 + i as i64, 2]], i as u64);
        }
        (features, captions)
    }

    fn generator(dir: &Path, count: usize, batch_size: Option<usize>) -> BatchGenerator {
        let (features, captions) = synthetic_corpus(dir, count);
        let mut config = GeneratorConfig::new(dir);
        config.batch_size = batch_size;
        config.image_source = ImageSourceConfig::Features(features);
        config.identifier_source = IdentifierSourceConfig::CaptionIndex;
        BatchGenerator::new(config, Some(captions)).unwrap()
    }

    #[test]
    fn construction_fails_on_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let config = GeneratorConfig::new(tmp.path());
        assert!(matches!(
            BatchGenerator::new(config, None),
            Err(CaptionDatasetError::NoImages { .. })
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        synthetic_corpus(tmp.path(), 2);
        let mut config = GeneratorConfig::new(tmp.path());
        config.batch_size = Some(0);
        assert!(matches!(
            BatchGenerator::new(config, None),
            Err(CaptionDatasetError::InvalidBatchSize)
        ));
    }

    #[test]
    fn windowing_covers_every_sample_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = generator(tmp.path(), 5, Some(2));
        assert_eq!(gen.num_batches(), 3);

        let sizes: Vec<usize> = gen
            .batches()
            .unwrap()
            .map(|b| b.unwrap().captions.lengths.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn exact_multiple_emits_no_trailing_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = generator(tmp.path(), 4, Some(2));
        let sizes: Vec<usize> = gen
            .batches()
            .unwrap()
            .map(|b| b.unwrap().captions.lengths.len())
            .collect();
        assert_eq!(sizes, vec![2, 2]);
    }

    #[test]
    fn omitted_batch_size_covers_whole_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = generator(tmp.path(), 3, None);
        assert_eq!(gen.batch_size(), 3);
        let batches: Vec<_> = gen.batches().unwrap().collect();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn fresh_pass_restarts_from_the_beginning() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = generator(tmp.path(), 5, Some(2));
        assert_eq!(gen.batches().unwrap().count(), 3);
        assert_eq!(gen.batches().unwrap().count(), 3);
    }

    #[test]
    fn set_batch_size_applies_to_next_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = generator(tmp.path(), 6, Some(2));
        assert_eq!(gen.batches().unwrap().count(), 3);
        gen.set_batch_size(Some(3)).unwrap();
        assert_eq!(gen.batches().unwrap().count(), 2);
        assert!(gen.set_batch_size(Some(0)).is_err());
    }

    #[test]
    fn features_substitute_for_decoding() {
        // The on-disk files are not decodable; any decode attempt would fail.
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = generator(tmp.path(), 3, Some(2));
        let first = gen.batches().unwrap().next().unwrap().unwrap();
        let ImageBatch::Features(arr) = &first.images else {
            panic!("expected feature vectors");
        };
        // Rank-2 [1, 3] entries squeeze to rows of length 3, listing order.
        assert_eq!(arr.shape(), &[2, 3]);
        assert_eq!(arr[[0, 0]], 0.0);
        assert_eq!(arr[[1, 0]], 1.0);
    }

    #[test]
    fn rows_align_with_identifiers_and_lengths() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = generator(tmp.path(), 5, Some(2));
        for batch in gen.batches().unwrap() {
            let batch = batch.unwrap();
            let ids = batch.image_ids.unwrap();
            let ImageBatch::Features(images) = &batch.images else {
                panic!("expected feature vectors");
            };
            for (row, &id) in ids.iter().enumerate() {
                // Feature row i carries the sample index as its first value,
                // and the caption's middle token is 10 + index.
                assert_eq!(images[[row, 0]], id as f32);
                assert_eq!(batch.captions.inputs[[row, 1]], 10 + id as i64);
            }
        }
    }

    #[test]
    fn same_seed_reproduces_caption_selection() {
        let tmp = tempfile::tempdir().unwrap();
        let mut captions = CaptionIndex::default();
        for i in 0..4 {
            let name = format!("img_{i:03}.jpg");
            fs::write(tmp.path().join(&name), b"x").unwrap();
            captions.insert(
                &name,
                vec![
                    vec![1, 20 + i, 2],
                    vec![1, 30 + i, 31 + i, 2],
                    vec![1, 40 + i, 41 + i, 42 + i, 2],
                ],
                i as u64,
            );
        }
        let mut features = FeatureIndex::default();
        for i in 0..4 {
            features.insert(
                format!("img_{i:03}.jpg"),
                ArrayD::from_shape_vec(vec![2], vec![i as f32, 0.0]).unwrap(),
            );
        }

        let build = || {
            let mut config = GeneratorConfig::new(tmp.path());
            config.batch_size = Some(2);
            config.image_source = ImageSourceConfig::Features(features.clone());
            BatchGenerator::new(config, Some(captions.clone())).unwrap()
        };

        let mut gen_a = build();
        let mut gen_b = build();
        let picks_a: Vec<_> = gen_a
            .batches()
            .unwrap()
            .map(|b| b.unwrap().captions)
            .collect();
        let picks_b: Vec<_> = gen_b
            .batches()
            .unwrap()
            .map(|b| b.unwrap().captions)
            .collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn missing_feature_entry_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut features, captions) = synthetic_corpus(tmp.path(), 3);
        features.vectors.remove("img_001.jpg");
        let mut config = GeneratorConfig::new(tmp.path());
        config.batch_size = Some(2);
        config.image_source = ImageSourceConfig::Features(features);
        let mut gen = BatchGenerator::new(config, Some(captions)).unwrap();
        let err = gen
            .batches()
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            CaptionDatasetError::MissingFeature { filename } if filename == "img_001.jpg"
        ));
    }

    #[test]
    fn short_caption_rejected_at_construction() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"x").unwrap();
        let mut captions = CaptionIndex::default();
        captions.insert("a.jpg", vec![vec![1]], 0);
        let config = GeneratorConfig::new(tmp.path());
        assert!(matches!(
            BatchGenerator::new(config, Some(captions)),
            Err(CaptionDatasetError::Captions { .. })
        ));
    }

    #[test]
    fn identifier_emission_requires_caption_index() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"x").unwrap();
        let mut config = GeneratorConfig::new(tmp.path());
        config.identifier_source = IdentifierSourceConfig::CaptionIndex;
        assert!(matches!(
            BatchGenerator::new(config, None),
            Err(CaptionDatasetError::MissingCaptionIndex)
        ));
    }

    #[test]
    fn inference_pass_requires_annotations_map() {
        let tmp = tempfile::tempdir().unwrap();
        let gen = generator(tmp.path(), 2, Some(2));
        assert!(matches!(
            gen.inference_batches(),
            Err(CaptionDatasetError::MissingAnnotationsIndex)
        ));
    }
}
