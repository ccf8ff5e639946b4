//! Dedup module - Exact and near-duplicate detection
//!
//! Stage S5. Runs independently of S2-S4 over the same scanned records.
//! Exact duplicates are grouped by SHA-256 equality. Near duplicates are
//! found by computing a perceptual hash per image (in parallel, reassembled
//! in canonical order) and comparing every pair not already sharing an
//! exact group against two Hamming-distance thresholds: Likely and Maybe.
//! Only Likely edges are merged into union-find groups; Maybe edges are
//! reported as standalone findings so a human can make the call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::ImageRecord;
use crate::phash::{compute_phash, PerceptualHash};
use crate::progress::{CancelToken, ProgressSink, ProgressUpdate};

/// Similarity classification for a near-duplicate pair, by Hamming distance
/// band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityBand {
    Likely,
    Maybe,
}

#[derive(Debug, Clone)]
pub struct DedupOptions {
    /// Hamming distance at or below which a pair is classified Likely.
    pub likely_threshold: u32,
    /// Hamming distance at or below which (but above `likely_threshold`) a
    /// pair is classified Maybe; pairs beyond this are dropped.
    pub maybe_threshold: u32,
}

impl Default for DedupOptions {
    fn default() -> Self {
        DedupOptions { likely_threshold: 8, maybe_threshold: 16 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactDuplicateGroup {
    pub group_id: String,
    pub sha256: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearDuplicateFinding {
    pub left_path: String,
    pub right_path: String,
    pub hamming_distance: u32,
    pub band: SimilarityBand,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearDuplicateGroup {
    pub group_id: String,
    pub paths: Vec<String>,
    pub aggregate_score: f64,
    pub likely_pair_count: usize,
    pub maybe_pair_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub total_files: usize,
    pub exact_groups: Vec<ExactDuplicateGroup>,
    pub near_duplicate_findings: Vec<NearDuplicateFinding>,
    pub near_duplicate_groups: Vec<NearDuplicateGroup>,
}

const HASH_BITS: f64 = 64.0;

fn similarity_score(distance: u32) -> f64 {
    1.0 - (distance as f64) / HASH_BITS
}

/// Runs both exact and near-duplicate detection over `records`, reading
/// each image's bytes at `dataset_root.join(record.path)`.
pub fn find_duplicates(
    dataset_root: &Path,
    records: &[ImageRecord],
    options: &DedupOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<DuplicateReport> {
    cancel.check()?;
    let exact_groups = find_exact_duplicates(records);

    let abs_paths: Vec<PathBuf> = records.iter().map(|r| dataset_root.join(&r.path)).collect();
    let hashes: Vec<Result<PerceptualHash>> = abs_paths
        .par_iter()
        .map(|path| {
            cancel.check()?;
            compute_phash(path)
        })
        .collect();

    let mut fingerprints = Vec::with_capacity(records.len());
    for hash in hashes {
        fingerprints.push(hash?);
    }

    let (near_duplicate_findings, near_duplicate_groups) =
        find_near_duplicates(records, &fingerprints, &exact_groups, options);

    progress.report(ProgressUpdate::new(
        0,
        "dedupe",
        format!(
            "Found {} exact group(s) and {} near-duplicate finding(s).",
            exact_groups.len(),
            near_duplicate_findings.len()
        ),
    ));

    Ok(DuplicateReport {
        total_files: records.len(),
        exact_groups,
        near_duplicate_findings,
        near_duplicate_groups,
    })
}

/// Groups records sharing an identical SHA-256. Ordered by descending
/// group size, then ordinal SHA; within a group, paths are ordinal.
fn find_exact_duplicates(records: &[ImageRecord]) -> Vec<ExactDuplicateGroup> {
    let mut by_hash: HashMap<&str, Vec<&str>> = HashMap::new();
    for record in records {
        by_hash.entry(record.sha256.as_str()).or_default().push(record.path.as_str());
    }

    let mut groups: Vec<(String, Vec<String>)> = by_hash
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(sha256, mut paths)| {
            paths.sort_unstable();
            (sha256.to_string(), paths.into_iter().map(String::from).collect())
        })
        .collect();
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

    groups
        .into_iter()
        .enumerate()
        .map(|(i, (sha256, paths))| ExactDuplicateGroup { group_id: format!("exact-{}", i + 1), sha256, paths })
        .collect()
}

fn find_near_duplicates(
    records: &[ImageRecord],
    fingerprints: &[PerceptualHash],
    exact_groups: &[ExactDuplicateGroup],
    options: &DedupOptions,
) -> (Vec<NearDuplicateFinding>, Vec<NearDuplicateGroup>) {
    let n = records.len();

    // Pairs already grouped as exact duplicates are excluded from near-
    // duplicate consideration.
    let mut exact_group_of: HashMap<&str, usize> = HashMap::new();
    for (gi, group) in exact_groups.iter().enumerate() {
        for path in &group.paths {
            exact_group_of.insert(path.as_str(), gi);
        }
    }

    let mut findings = Vec::new();
    let mut union_find = UnionFind::new(n);

    for i in 0..n {
        for j in (i + 1)..n {
            let same_exact_group = match (exact_group_of.get(records[i].path.as_str()), exact_group_of.get(records[j].path.as_str())) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            if same_exact_group {
                continue;
            }

            let distance = fingerprints[i].hamming_distance(fingerprints[j]);
            if distance > options.maybe_threshold {
                continue;
            }
            let band = if distance <= options.likely_threshold { SimilarityBand::Likely } else { SimilarityBand::Maybe };

            let (left_path, right_path) = if records[i].path <= records[j].path {
                (records[i].path.clone(), records[j].path.clone())
            } else {
                (records[j].path.clone(), records[i].path.clone())
            };
            findings.push(NearDuplicateFinding {
                left_path,
                right_path,
                hamming_distance: distance,
                band,
                similarity_score: similarity_score(distance),
            });
            if band == SimilarityBand::Likely {
                union_find.union(i, j);
            }
        }
    }

    findings.sort_by(|a, b| {
        band_order(a.band)
            .cmp(&band_order(b.band))
            .then_with(|| a.hamming_distance.cmp(&b.hamming_distance))
            .then_with(|| a.left_path.cmp(&b.left_path))
            .then_with(|| a.right_path.cmp(&b.right_path))
    });

    let mut grouped: HashMap<usize, Vec<String>> = HashMap::new();
    for i in 0..n {
        let root = union_find.find(i);
        grouped.entry(root).or_default().push(records[i].path.clone());
    }

    let mut components: Vec<Vec<String>> = grouped
        .into_values()
        .filter(|paths| paths.len() > 1)
        .map(|mut paths| {
            paths.sort();
            paths
        })
        .collect();
    components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));

    let near_duplicate_groups = components
        .into_iter()
        .enumerate()
        .map(|(i, paths)| {
            let member_set: std::collections::HashSet<&str> = paths.iter().map(|p| p.as_str()).collect();
            let member_findings: Vec<&NearDuplicateFinding> = findings
                .iter()
                .filter(|f| member_set.contains(f.left_path.as_str()) && member_set.contains(f.right_path.as_str()))
                .collect();
            let likely_pair_count = member_findings.iter().filter(|f| f.band == SimilarityBand::Likely).count();
            let maybe_pair_count = member_findings.iter().filter(|f| f.band == SimilarityBand::Maybe).count();
            let aggregate_score = if member_findings.is_empty() {
                1.0 - (options.likely_threshold as f64) / HASH_BITS
            } else {
                member_findings.iter().map(|f| f.similarity_score).sum::<f64>() / member_findings.len() as f64
            };
            NearDuplicateGroup {
                group_id: format!("near-{}", i + 1),
                paths,
                aggregate_score,
                likely_pair_count,
                maybe_pair_count,
            }
        })
        .collect();

    (findings, near_duplicate_groups)
}

fn band_order(band: SimilarityBand) -> u8 {
    match band {
        SimilarityBand::Likely => 0,
        SimilarityBand::Maybe => 1,
    }
}

/// Disjoint-set union-find with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CaptionSources;

    fn record(path: &str, sha256: &str) -> ImageRecord {
        ImageRecord::new(
            path.to_string(),
            10,
            10,
            "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            sha256.to_string(),
            CaptionSources::default(),
        )
    }

    #[test]
    fn exact_duplicates_group_by_sha256_and_skip_singletons() {
        let records = vec![record("a.png", "hash1"), record("b.png", "hash1"), record("c.png", "hash2")];
        let groups = find_exact_duplicates(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id, "exact-1");
        assert_eq!(groups[0].paths, vec!["a.png".to_string(), "b.png".to_string()]);
    }

    #[test]
    fn union_find_merges_only_on_union_calls() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(2, 3);
        assert_eq!(uf.find(0), uf.find(1));
        assert_eq!(uf.find(2), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));
        uf.union(1, 2);
        assert_eq!(uf.find(0), uf.find(3));
    }

    #[test]
    fn maybe_band_findings_do_not_merge_into_a_group() {
        let records = vec![record("a.png", "h1"), record("b.png", "h2")];
        // Distance 12 falls strictly between the default likely (8) and
        // maybe (16) thresholds.
        let fingerprints = vec![PerceptualHash(0), PerceptualHash(0b1111_1111_1111)];
        let options = DedupOptions::default();
        let (findings, groups) = find_near_duplicates(&records, &fingerprints, &[], &options);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].band, SimilarityBand::Maybe);
        assert!((findings[0].similarity_score - (1.0 - 12.0 / 64.0)).abs() < 1e-9);
        assert!(groups.is_empty());
    }

    #[test]
    fn likely_band_findings_merge_into_a_group() {
        let records = vec![record("a.png", "h1"), record("b.png", "h2"), record("c.png", "h3")];
        let fingerprints = vec![PerceptualHash(0), PerceptualHash(0b11), PerceptualHash(0xFFFF_FFFF_FFFF_FFFF)];
        let options = DedupOptions::default();
        let (_findings, groups) = find_near_duplicates(&records, &fingerprints, &[], &options);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].paths, vec!["a.png".to_string(), "b.png".to_string()]);
        assert_eq!(groups[0].likely_pair_count, 1);
    }

    #[test]
    fn pairs_already_in_an_exact_group_are_excluded_from_near_findings() {
        let records = vec![record("a.png", "same"), record("b.png", "same")];
        let fingerprints = vec![PerceptualHash(0), PerceptualHash(0)];
        let exact_groups = find_exact_duplicates(&records);
        let options = DedupOptions::default();
        let (findings, _groups) = find_near_duplicates(&records, &fingerprints, &exact_groups, &options);
        assert!(findings.is_empty());
    }
}
