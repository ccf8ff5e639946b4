//! Model module - Core data types shared across pipeline stages
//!
//! Immutable, plain-data records produced by one stage and consumed by
//! later ones, serialized with camelCase field names throughout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caption sidecar text found for one image, by source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptionSources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booru_tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_tags: Option<String>,
}

impl CaptionSources {
    pub fn has_booru_tags(&self) -> bool {
        self.booru_tags.is_some()
    }
    pub fn has_short_caption(&self) -> bool {
        self.short_caption.is_some()
    }
    pub fn has_style_tags(&self) -> bool {
        self.style_tags.is_some()
    }
}

/// One scanned image, immutable after the scanner emits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Slash-normalized path, relative to the dataset root.
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// Lowercase hex, 32 characters.
    pub md5: String,
    /// Lowercase hex, 64 characters.
    pub sha256: String,
    pub caption_sources: CaptionSources,
    pub has_booru_tags: bool,
    pub has_short_caption: bool,
    pub has_style_tags: bool,
}

impl ImageRecord {
    pub fn new(
        path: String,
        width: u32,
        height: u32,
        md5: String,
        sha256: String,
        caption_sources: CaptionSources,
    ) -> Self {
        let has_booru_tags = caption_sources.has_booru_tags();
        let has_short_caption = caption_sources.has_short_caption();
        let has_style_tags = caption_sources.has_style_tags();
        ImageRecord {
            path,
            width,
            height,
            md5,
            sha256,
            caption_sources,
            has_booru_tags,
            has_short_caption,
            has_style_tags,
        }
    }
}

/// Summary index written alongside `dataset.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryIndex {
    pub dataset_path: String,
    pub output_paths: BTreeMap<String, String>,
    pub total_images: usize,
    pub with_booru_tags: usize,
    pub with_short_caption: usize,
    pub with_style_tags: usize,
    pub total_pixels: u64,
    /// Lowercase file extension (no leading dot) -> count.
    pub extension_counts: BTreeMap<String, usize>,
}

impl SummaryIndex {
    pub fn from_records(
        dataset_path: String,
        output_paths: BTreeMap<String, String>,
        records: &[ImageRecord],
        extension_counts: BTreeMap<String, usize>,
    ) -> Self {
        let total_images = records.len();
        let with_booru_tags = records.iter().filter(|r| r.has_booru_tags).count();
        let with_short_caption = records.iter().filter(|r| r.has_short_caption).count();
        let with_style_tags = records.iter().filter(|r| r.has_style_tags).count();
        let total_pixels = records.iter().map(|r| r.width as u64 * r.height as u64).sum();
        SummaryIndex {
            dataset_path,
            output_paths,
            total_images,
            with_booru_tags,
            with_short_caption,
            with_style_tags,
            total_pixels,
            extension_counts,
        }
    }
}

/// Slash-normalizes a path so relative paths are stable across platforms.
pub fn normalize_relative_path(path: &std::path::Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
