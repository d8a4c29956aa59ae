//! Filesystem listing and annotation-document indexing.

use crate::types::{CaptionDatasetError, DatasetResult};
use data_contracts::AnnotationsDoc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Enumerate `*.jpg` files directly under `dir` (non-recursive), sorted by
/// path for a reproducible iteration order. An empty result is fatal: a
/// generator over zero samples cannot produce any batch.
pub fn list_images(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| CaptionDatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut listing = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) != Some("jpg") {
            continue;
        }
        listing.push(path);
    }
    listing.sort();
    if listing.is_empty() {
        return Err(CaptionDatasetError::NoImages {
            dir: dir.to_path_buf(),
        });
    }
    Ok(listing)
}

/// The final path component, used as the join key against caption, feature,
/// and identifier indices.
pub(crate) fn sample_key(path: &Path) -> &str {
    path.file_name().and_then(|s| s.to_str()).unwrap_or_default()
}

/// Read and parse the annotations document, flattening its `images` array
/// into a filename -> identifier map. Read and parse failures propagate
/// unchanged to the caller.
pub fn load_identifier_map(path: &Path) -> DatasetResult<HashMap<String, u64>> {
    let raw = fs::read(path).map_err(|e| CaptionDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let doc: AnnotationsDoc = serde_json::from_slice(&raw).map_err(|e| CaptionDatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    doc.validate().map_err(|source| CaptionDatasetError::Annotations {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(doc.filename_to_id())
}
