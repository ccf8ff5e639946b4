//! # Tagmetry Core Library
//!
//! Core analysis engine for Tagmetry, a local, privacy-first analytics
//! toolkit for image-plus-caption datasets used to train generative image
//! models. This crate implements the seven-stage pipeline: directory
//! scanning, tag normalization, tag-health metrics, rule-based
//! recommendations, exact/near-duplicate detection, and report writing.
//!
//! ## Architecture
//!
//! - **scan** — directory traversal, sidecar reading, content hashing (S1)
//! - **normalize** — deterministic tag normalization with an audit trail (S2)
//! - **metrics** — entropy, Gini, HHI, top-K mass, and related statistics (S3)
//! - **recommend** — rule-conjunction matching over metrics signals (S4)
//! - **phash** / **dedup** — perceptual hashing and duplicate grouping (S5)
//! - **report** — serializing every artifact to disk (S6)
//! - **ruleset** — loading recommendation rules from JSON/YAML (S7)
//!
//! ## Core Philosophy
//!
//! - **Local-first** — no network I/O from within the core.
//! - **Deterministic** — identical inputs produce byte-identical artifacts.
//! - **Single-logical-thread from the caller's perspective** — internal CPU
//!   parallelism via `rayon`, no async runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::join;
use serde::{Deserialize, Serialize};

pub mod dedup;
pub mod error;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod phash;
pub mod progress;
pub mod recommend;
pub mod report;
pub mod ruleset;
pub mod scan;

pub use dedup::{DedupOptions, DuplicateReport};
pub use error::{Result, TagmetryError};
pub use metrics::{MetricsOptions, MetricsReport};
pub use model::{CaptionSources, ImageRecord, SummaryIndex};
pub use normalize::{NormalizationResult, TagNormalizationRules};
pub use progress::{CancelToken, MonotonicProgress, ProgressSink, ProgressUpdate, STAGES};
pub use recommend::{RecommendationEvaluation, RuleSet};
pub use report::ReportOutputs;

/// Parameters for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub input_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
    pub enable_duplicate_detection: bool,
    pub enable_tag_metrics: bool,
    pub enable_recommendations: bool,
    pub normalization_rules: TagNormalizationRules,
    pub metrics_options: MetricsOptions,
    pub dedup_options: DedupOptions,
}

impl AnalysisRequest {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        AnalysisRequest {
            input_dir: input_dir.into(),
            output_dir: None,
            rules_path: None,
            enable_duplicate_detection: true,
            enable_tag_metrics: true,
            enable_recommendations: true,
            normalization_rules: TagNormalizationRules::empty(),
            metrics_options: MetricsOptions::default(),
            dedup_options: DedupOptions::default(),
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| self.input_dir.join(".tagmetry"))
    }
}

/// Terminal state of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of one `run_analysis` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub state: JobState,
    /// Artifact name (e.g. `"datasetJsonl"`) -> absolute path, populated
    /// only on `Completed`.
    pub outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: String,
}

/// Runs the full seven-stage pipeline against `request`, reporting progress
/// through `progress` and honoring cooperative cancellation via `cancel`.
///
/// Stages S2-S4 (normalize, metrics, recommend) and stage S5 (dedupe) are
/// independent after S1 and run concurrently via a `rayon::join`.
/// `Cancelled` always surfaces as `Cancelled`, never `Failed`; on any other
/// failure, already written artifacts are deleted best-effort.
pub fn run_analysis(
    request: &AnalysisRequest,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> AnalysisResult {
    match run_analysis_inner(request, progress, cancel) {
        Ok(outputs) => {
            progress.report(ProgressUpdate::new(100, "finalize", "Analysis complete."));
            AnalysisResult {
                state: JobState::Completed,
                outputs: outputs_to_map(&outputs),
                error: None,
                finished_at: progress::now_rfc3339(),
            }
        }
        Err(err) if err.is_cancelled() => AnalysisResult {
            state: JobState::Cancelled,
            outputs: BTreeMap::new(),
            error: None,
            finished_at: progress::now_rfc3339(),
        },
        Err(err) => {
            progress.report(ProgressUpdate::new(0, "failed", err.to_string()));
            AnalysisResult {
                state: JobState::Failed,
                outputs: BTreeMap::new(),
                error: Some(err.kind_name().to_string()),
                finished_at: progress::now_rfc3339(),
            }
        }
    }
}

fn outputs_to_map(outputs: &ReportOutputs) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("datasetJsonl".to_string(), outputs.dataset_jsonl.display().to_string());
    map.insert("summaryJson".to_string(), outputs.summary_json.display().to_string());
    map.insert("metricsJson".to_string(), outputs.metrics_json.display().to_string());
    map.insert("metricsMd".to_string(), outputs.metrics_md.display().to_string());
    map.insert("recommendationsJson".to_string(), outputs.recommendations_json.display().to_string());
    map.insert("duplicatesJson".to_string(), outputs.duplicates_json.display().to_string());
    map
}

fn run_analysis_inner(
    request: &AnalysisRequest,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ReportOutputs> {
    // The normalize/metrics/recommend branch and the dedupe branch run
    // concurrently (§2, §5) and each reports its own nominal percent
    // sequence; wrapping the caller's sink here guarantees the combined
    // stream the caller observes is still monotonically non-decreasing.
    let monotonic = MonotonicProgress::new(progress);
    let progress: &dyn ProgressSink = &monotonic;

    progress.report(ProgressUpdate::new(0, "validate", "Validating input directory."));
    cancel.check()?;
    if !request.input_dir.is_dir() {
        return Err(TagmetryError::InputNotFound {
            message: format!("Dataset directory not found: {}", request.input_dir.display()),
        });
    }

    let scan_outcome = scan::scan_dataset(&request.input_dir, progress, cancel)?;
    let records = scan_outcome.records;
    cancel.check()?;

    let ruleset = match &request.rules_path {
        Some(path) if request.enable_recommendations => Some(load_ruleset(path)?),
        _ => None,
    };

    let (normalize_branch, dedup_branch) =
        run_analysis_branches(request, &records, ruleset.as_ref(), progress, cancel)?;

    cancel.check()?;

    let output_dir = request.output_dir();
    let extension_counts = scan_outcome.extension_counts;
    let report_outputs = ReportOutputs::new(&output_dir);
    let mut output_paths = BTreeMap::new();
    output_paths.insert("outputDir".to_string(), output_dir.display().to_string());
    output_paths.insert("datasetJsonl".to_string(), report_outputs.dataset_jsonl.display().to_string());
    output_paths.insert("summaryJson".to_string(), report_outputs.summary_json.display().to_string());
    output_paths.insert("metricsJson".to_string(), report_outputs.metrics_json.display().to_string());
    output_paths.insert("metricsMd".to_string(), report_outputs.metrics_md.display().to_string());
    output_paths.insert("recommendationsJson".to_string(), report_outputs.recommendations_json.display().to_string());
    output_paths.insert("duplicatesJson".to_string(), report_outputs.duplicates_json.display().to_string());
    let summary = SummaryIndex::from_records(
        request.input_dir.display().to_string(),
        output_paths,
        &records,
        extension_counts,
    );

    progress.report(ProgressUpdate::new(90, "finalize", "Writing artifacts."));
    report::write_all(
        &report_outputs,
        &records,
        &summary,
        &normalize_branch.metrics_report,
        &normalize_branch.recommendation_evaluation,
        &dedup_branch,
    )?;
    Ok(report_outputs)
}

struct NormalizeBranchOutcome {
    metrics_report: MetricsReport,
    recommendation_evaluation: RecommendationEvaluation,
}

fn run_analysis_branches(
    request: &AnalysisRequest,
    records: &[ImageRecord],
    ruleset: Option<&RuleSet>,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<(NormalizeBranchOutcome, DuplicateReport)> {
    let normalize_branch = || -> Result<NormalizeBranchOutcome> {
        let bags: Vec<Vec<String>> = records
            .iter()
            .map(|record| {
                let tokens = caption_tokens(record);
                request.normalization_rules.normalize(&tokens).normalized_tokens
            })
            .collect();
        progress.report(ProgressUpdate::new(40, "normalize", format!("Normalized {} samples.", bags.len())));
        cancel.check()?;

        let metrics_report = if request.enable_tag_metrics {
            metrics::evaluate(&bags, &request.metrics_options)
        } else {
            metrics::evaluate(&[], &request.metrics_options)
        };
        progress.report(ProgressUpdate::new(55, "metrics", "Computed tag-health metrics."));
        cancel.check()?;

        let recommendation_evaluation = match ruleset {
            Some(rules) if request.enable_recommendations => recommend::evaluate(rules, &metrics_report),
            _ => RecommendationEvaluation { matches: Vec::new(), rules_evaluated: 0 },
        };
        progress.report(ProgressUpdate::new(70, "recommend", "Evaluated recommendation rules."));

        Ok(NormalizeBranchOutcome { metrics_report, recommendation_evaluation })
    };

    let dedup_branch = || -> Result<DuplicateReport> {
        if request.enable_duplicate_detection {
            let report = dedup::find_duplicates(&request.input_dir, records, &request.dedup_options, progress, cancel)?;
            progress.report(ProgressUpdate::new(85, "dedupe", "Duplicate detection complete."));
            Ok(report)
        } else {
            Ok(DuplicateReport {
                total_files: records.len(),
                exact_groups: Vec::new(),
                near_duplicate_findings: Vec::new(),
                near_duplicate_groups: Vec::new(),
            })
        }
    };

    let (normalize_result, dedup_result) = join(normalize_branch, dedup_branch);
    Ok((normalize_result?, dedup_result?))
}

/// Pulls the raw caption sidecar text apart into whitespace/comma-delimited
/// tokens, the input to the normalizer.
fn caption_tokens(record: &ImageRecord) -> Vec<Option<String>> {
    let mut tokens = Vec::new();
    for source in [
        record.caption_sources.booru_tags.as_deref(),
        record.caption_sources.short_caption.as_deref(),
        record.caption_sources.style_tags.as_deref(),
    ] {
        if let Some(text) = source {
            for part in text.split(|c: char| c == ',' || c.is_whitespace()) {
                if !part.is_empty() {
                    tokens.push(Some(part.to_string()));
                }
            }
        }
    }
    tokens
}

fn load_ruleset(path: &Path) -> Result<RuleSet> {
    let text = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => ruleset::load_yaml(&text),
        _ => ruleset::load_json(&text),
    }
}
