//! Scan module - Directory traversal, sidecar reading, content hashing
//!
//! This is stage S1 of the pipeline. It walks the dataset root, selects
//! image files by extension, computes width/height, MD5 and SHA-256, reads
//! adjacent caption sidecars, and emits one [`ImageRecord`] per image in the
//! canonical enumeration order (ordinal byte comparison of the absolute
//! path). That order is reused by every later stage, so nothing downstream
//! re-sorts.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use rayon::prelude::*;
use sha2::Sha256;
use walkdir::WalkDir;

use crate::error::{Result, TagmetryError};
use crate::model::{normalize_relative_path, CaptionSources, ImageRecord};
use crate::progress::{CancelToken, ProgressSink, ProgressUpdate};

/// Supported image file extensions (lowercase, no leading dot).
const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"];

/// Result of stage S1: the ordered records plus a lowercase-extension
/// histogram (the rest of [`crate::model::SummaryIndex`] is assembled by the
/// orchestrator, which knows the output paths).
pub struct ScanOutcome {
    pub records: Vec<ImageRecord>,
    pub extension_counts: BTreeMap<String, usize>,
}

/// Scans `root` and returns the canonically ordered image records.
///
/// Fails with [`TagmetryError::InputNotFound`] if `root` does not exist.
/// Individual unreadable sidecars or unparseable headers are tolerated (a
/// warning is reported through `progress` and the record keeps an absent
/// value, or — for dimensions — the `0x0` sentinel described in
/// `SPEC_FULL.md`); a streaming hash failure aborts the scan, since the
/// duplicate detector cannot honor its invariants with a missing hash.
pub fn scan_dataset(
    root: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ScanOutcome> {
    if !root.exists() {
        return Err(TagmetryError::InputNotFound {
            message: format!("Dataset directory not found: {}", root.display()),
        });
    }
    if !root.is_dir() {
        return Err(TagmetryError::InputNotFound {
            message: format!("Dataset path is not a directory: {}", root.display()),
        });
    }

    let mut paths = collect_image_paths(root)?;
    // Canonical enumeration order: ordinal byte comparison of absolute paths.
    paths.sort_by(|a, b| a.as_os_str().as_encoded_bytes().cmp(b.as_os_str().as_encoded_bytes()));

    cancel.check()?;

    let total = paths.len();
    let results: Vec<Result<ImageRecord>> = paths
        .par_iter()
        .map(|abs_path| {
            cancel.check()?;
            scan_one_image(root, abs_path, progress)
        })
        .collect();

    let mut records = Vec::with_capacity(total);
    for r in results {
        records.push(r?);
    }

    let mut extension_counts: BTreeMap<String, usize> = BTreeMap::new();
    for path in &paths {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        *extension_counts.entry(ext).or_insert(0) += 1;
    }

    progress.report(ProgressUpdate::new(0, "scan", format!("Scanned {} images.", total)));

    Ok(ScanOutcome { records, extension_counts })
}

fn collect_image_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_image_file(entry.path()) {
            out.push(fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf()));
        }
    }
    Ok(out)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str()))
        .unwrap_or(false)
}

fn scan_one_image(root: &Path, abs_path: &Path, progress: &dyn ProgressSink) -> Result<ImageRecord> {
    let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let rel_path = abs_path.strip_prefix(&canonical_root).unwrap_or(abs_path);
    let rel_path_str = normalize_relative_path(rel_path);

    let (width, height) = match read_dimensions(abs_path) {
        Ok(dims) => dims,
        Err(_) => {
            progress.report(ProgressUpdate::new(
                0,
                "scan",
                format!("Could not read dimensions for '{}'; recorded as 0x0.", rel_path_str),
            ));
            (0, 0)
        }
    };

    let (md5_hex, sha256_hex) = hash_file(abs_path)?;

    let dir = abs_path.parent().unwrap_or(root);
    let base = abs_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let caption_sources = read_sidecars(dir, &base);

    Ok(ImageRecord::new(rel_path_str, width, height, md5_hex, sha256_hex, caption_sources))
}

/// Reads image dimensions from metadata only, without a full pixel decode,
/// using `image`'s header-guessing reader.
fn read_dimensions(path: &Path) -> Result<(u32, u32)> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    let (w, h) = reader.into_dimensions()?;
    Ok((w, h))
}

/// Streams the file once, computing MD5 and SHA-256 over the same buffer.
/// A failure here aborts the job (see module docs).
fn hash_file(path: &Path) -> Result<(String, String)> {
    let mut file = File::open(path).map_err(|e| TagmetryError::ImageFileMissing {
        message: format!("{}: {}", path.display(), e),
    })?;
    let mut md5_hasher = Md5::new();
    let mut sha_hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        md5_hasher.update(&buffer[..n]);
        sha_hasher.update(&buffer[..n]);
    }
    let md5_hex = hex_lower(&md5_hasher.finalize());
    let sha256_hex = hex_lower(&sha_hasher.finalize());
    Ok((md5_hex, sha256_hex))
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}

/// Collapses internal whitespace runs to a single space and trims. An empty
/// result is treated as absent by the caller.
fn normalize_sidecar_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn read_sidecar_text(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    normalize_sidecar_text(&raw)
}

fn read_sidecars(dir: &Path, base: &str) -> CaptionSources {
    let booru_tags = read_sidecar_text(&dir.join(format!("{}.booru.txt", base)))
        .or_else(|| read_sidecar_text(&dir.join(format!("{}.tags.txt", base))));
    let short_caption = read_sidecar_text(&dir.join(format!("{}.caption.txt", base)))
        .or_else(|| read_sidecar_text(&dir.join(format!("{}.txt", base))));
    let style_tags = read_sidecar_text(&dir.join(format!("{}.style.txt", base)));

    CaptionSources { booru_tags, short_caption, style_tags }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn sidecar_text_collapses_and_trims_whitespace() {
        assert_eq!(normalize_sidecar_text("  short\ncaption \n"), Some("short caption".to_string()));
        assert_eq!(normalize_sidecar_text("   \n\t  "), None);
    }

    #[test]
    fn sidecar_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.tags.txt"), "legacy_tag_source");
        let sources = read_sidecars(dir.path(), "a");
        assert_eq!(sources.booru_tags.as_deref(), Some("legacy_tag_source"));

        write(&dir.path().join("a.booru.txt"), "tag_one, tag two");
        let sources = read_sidecars(dir.path(), "a");
        assert_eq!(sources.booru_tags.as_deref(), Some("tag_one, tag two"));
    }

    #[test]
    fn two_image_scan_matches_concrete_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let a_png = image::RgbImage::new(1, 1);
        let b_png = image::RgbImage::new(2, 3);
        a_png.save(dir.path().join("a.png")).unwrap();
        b_png.save(dir.path().join("b.png")).unwrap();

        write(&dir.path().join("a.booru.txt"), "tag_one, tag two");
        write(&dir.path().join("a.caption.txt"), "  short\ncaption ");
        write(&dir.path().join("a.style.txt"), " painterly ");
        write(&dir.path().join("b.tags.txt"), "legacy_tag_source");
        write(&dir.path().join("b.txt"), "fallback caption");

        let outcome = scan_dataset(dir.path(), &crate::progress::NullProgressSink, &CancelToken::new()).unwrap();
        let mut records = outcome.records;
        records.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(records.len(), 2);
        let a = &records[0];
        let b = &records[1];
        assert_eq!(a.path, "a.png");
        assert_eq!(a.width, 1);
        assert_eq!(a.height, 1);
        assert_eq!(a.caption_sources.booru_tags.as_deref(), Some("tag_one, tag two"));
        assert_eq!(a.caption_sources.short_caption.as_deref(), Some("short caption"));
        assert_eq!(a.caption_sources.style_tags.as_deref(), Some("painterly"));

        assert_eq!(b.path, "b.png");
        assert_eq!(b.caption_sources.booru_tags.as_deref(), Some("legacy_tag_source"));
        assert_eq!(b.caption_sources.short_caption.as_deref(), Some("fallback caption"));
        assert_eq!(b.caption_sources.style_tags, None);
    }

    #[test]
    fn missing_root_is_input_not_found() {
        let err = scan_dataset(
            Path::new("/nonexistent/tagmetry-dataset"),
            &crate::progress::NullProgressSink,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TagmetryError::InputNotFound { .. }));
    }
}
