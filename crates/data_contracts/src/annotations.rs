use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("images[{index}] has an empty file_name")]
    EmptyFileName { index: usize },
    #[error("duplicate file_name in annotations: {file_name}")]
    DuplicateFileName { file_name: String },
    #[error("no caption candidates for {filename}")]
    NoCandidates { filename: String },
    #[error("caption {index} for {filename} has {len} tokens; boundary markers require at least 2")]
    ShortCaption {
        filename: String,
        index: usize,
        len: usize,
    },
}

/// One entry of the annotations document's `images` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub file_name: String,
    pub id: u64,
}

/// The annotations document: a JSON object with a top-level `images` array.
/// Fields other than `images` are ignored on parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationsDoc {
    pub images: Vec<ImageEntry>,
}

impl AnnotationsDoc {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for (index, entry) in self.images.iter().enumerate() {
            if entry.file_name.trim().is_empty() {
                return Err(ValidationError::EmptyFileName { index });
            }
            if !seen.insert(entry.file_name.as_str()) {
                return Err(ValidationError::DuplicateFileName {
                    file_name: entry.file_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Flatten the `images` array into a filename -> identifier map.
    pub fn filename_to_id(&self) -> HashMap<String, u64> {
        self.images
            .iter()
            .map(|entry| (entry.file_name.clone(), entry.id))
            .collect()
    }
}

/// Tokenized captions keyed by image filename, built by an external loader.
///
/// Each candidate caption is a sequence of integer token ids whose first and
/// last tokens are sentence boundary markers, so every candidate must have at
/// least 2 tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptionIndex {
    /// filename -> ordered candidate captions.
    pub captions: HashMap<String, Vec<Vec<i64>>>,
    /// filename -> stable numeric identifier.
    pub filename_to_id: HashMap<String, u64>,
}

impl CaptionIndex {
    pub fn len(&self) -> usize {
        self.captions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }

    pub fn insert(&mut self, filename: impl Into<String>, candidates: Vec<Vec<i64>>, id: u64) {
        let filename = filename.into();
        self.filename_to_id.insert(filename.clone(), id);
        self.captions.insert(filename, candidates);
    }

    pub fn candidates(&self, filename: &str) -> Option<&[Vec<i64>]> {
        self.captions.get(filename).map(Vec::as_slice)
    }

    pub fn id_for(&self, filename: &str) -> Option<u64> {
        self.filename_to_id.get(filename).copied()
    }

    /// Every filename must carry at least one candidate, and every candidate
    /// at least its two boundary markers. Violations are data defects, not
    /// recoverable per-sample conditions.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (filename, candidates) in &self.captions {
            if candidates.is_empty() {
                return Err(ValidationError::NoCandidates {
                    filename: filename.clone(),
                });
            }
            for (index, caption) in candidates.iter().enumerate() {
                if caption.len() < 2 {
                    return Err(ValidationError::ShortCaption {
                        filename: filename.clone(),
                        index,
                        len: caption.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Precomputed image feature vectors keyed by filename.
///
/// Entries are rank-1 or rank-2 arrays; singleton axes are squeezed away when
/// a batch is assembled. When supplied to a generator this index fully
/// replaces on-disk image decoding.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    pub vectors: HashMap<String, ArrayD<f32>>,
}

impl FeatureIndex {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn insert(&mut self, filename: impl Into<String>, vector: ArrayD<f32>) {
        self.vectors.insert(filename.into(), vector);
    }

    pub fn get(&self, filename: &str) -> Option<&ArrayD<f32>> {
        self.vectors.get(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotations_doc_roundtrip_and_map() {
        let raw = r#"{"images":[{"file_name":"a.jpg","id":7},{"file_name":"b.jpg","id":11}],"info":"ignored"}"#;
        let doc: AnnotationsDoc = serde_json::from_str(raw).unwrap();
        doc.validate().unwrap();
        let map = doc.filename_to_id();
        assert_eq!(map.get("a.jpg"), Some(&7));
        assert_eq!(map.get("b.jpg"), Some(&11));
    }

    #[test]
    fn annotations_doc_rejects_empty_and_duplicate_names() {
        let doc = AnnotationsDoc {
            images: vec![ImageEntry {
                file_name: "  ".into(),
                id: 1,
            }],
        };
        assert!(matches!(
            doc.validate(),
            Err(ValidationError::EmptyFileName { index: 0 })
        ));

        let doc = AnnotationsDoc {
            images: vec![
                ImageEntry {
                    file_name: "a.jpg".into(),
                    id: 1,
                },
                ImageEntry {
                    file_name: "a.jpg".into(),
                    id: 2,
                },
            ],
        };
        assert!(matches!(
            doc.validate(),
            Err(ValidationError::DuplicateFileName { .. })
        ));
    }

    #[test]
    fn caption_index_validates_boundary_markers() {
        let mut index = CaptionIndex::default();
        index.insert("a.jpg", vec![vec![1, 5, 2]], 7);
        index.validate().unwrap();

        index.insert("b.jpg", vec![vec![1]], 8);
        assert!(matches!(
            index.validate(),
            Err(ValidationError::ShortCaption { len: 1, .. })
        ));
    }

    #[test]
    fn caption_index_rejects_missing_candidates() {
        let mut index = CaptionIndex::default();
        index.insert("a.jpg", vec![], 7);
        assert!(matches!(
            index.validate(),
            Err(ValidationError::NoCandidates { .. })
        ));
    }
}
