//! Report module - Serializing pipeline outputs to disk
//!
//! Stage S6, the single point of filesystem I/O for every emitted
//! artifact: `dataset.jsonl`, `summary.json`, `metrics.json`, `metrics.md`,
//! `recommendations.json`, and `duplicates.json`. All are UTF-8 without a
//! byte-order mark, LF line endings, and camelCase JSON field names.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dedup::DuplicateReport;
use crate::error::Result;
use crate::metrics::MetricsReport;
use crate::model::{ImageRecord, SummaryIndex};
use crate::recommend::RecommendationEvaluation;

/// Absolute paths of every artifact written by [`write_all`].
#[derive(Debug, Clone)]
pub struct ReportOutputs {
    pub dataset_jsonl: PathBuf,
    pub summary_json: PathBuf,
    pub metrics_json: PathBuf,
    pub metrics_md: PathBuf,
    pub recommendations_json: PathBuf,
    pub duplicates_json: PathBuf,
}

impl ReportOutputs {
    /// Derives every artifact's path from `output_dir`. Pure path-joining, so
    /// the orchestrator can compute these ahead of writing (to populate
    /// [`SummaryIndex::output_paths`] before `summary.json` itself is
    /// written) without duplicating the filename list.
    pub fn new(output_dir: &Path) -> Self {
        ReportOutputs {
            dataset_jsonl: output_dir.join("dataset.jsonl"),
            summary_json: output_dir.join("summary.json"),
            metrics_json: output_dir.join("metrics.json"),
            metrics_md: output_dir.join("metrics.md"),
            recommendations_json: output_dir.join("recommendations.json"),
            duplicates_json: output_dir.join("duplicates.json"),
        }
    }
}

/// Writes every artifact to the paths in `outputs`, creating its parent
/// directory if necessary.
pub fn write_all(
    outputs: &ReportOutputs,
    records: &[ImageRecord],
    summary: &SummaryIndex,
    metrics_report: &MetricsReport,
    recommendation_evaluation: &RecommendationEvaluation,
    duplicate_report: &DuplicateReport,
) -> Result<()> {
    if let Some(parent) = outputs.dataset_jsonl.parent() {
        fs::create_dir_all(parent)?;
    }

    let result: Result<()> = (|| {
        write_jsonl(&outputs.dataset_jsonl, records)?;
        write_json_pretty(&outputs.summary_json, summary)?;
        write_json_pretty(&outputs.metrics_json, metrics_report)?;
        write_text(&outputs.metrics_md, &render_metrics_markdown(metrics_report))?;
        write_json_pretty(&outputs.recommendations_json, recommendation_evaluation)?;
        write_json_pretty(&outputs.duplicates_json, duplicate_report)?;
        Ok(())
    })();

    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            delete_best_effort(outputs);
            Err(err)
        }
    }
}

/// Deletes every artifact named in `outputs` that exists, best-effort, used
/// on job abort per the error handling design.
pub fn delete_best_effort(outputs: &ReportOutputs) {
    for path in [
        &outputs.dataset_jsonl,
        &outputs.summary_json,
        &outputs.metrics_json,
        &outputs.metrics_md,
        &outputs.recommendations_json,
        &outputs.duplicates_json,
    ] {
        let _ = fs::remove_file(path);
    }
}

fn write_jsonl(path: &Path, records: &[ImageRecord]) -> Result<()> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    fs::write(path, body)?;
    Ok(())
}

fn write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    fs::write(path, body)?;
    Ok(())
}

fn write_text(path: &Path, body: &str) -> Result<()> {
    fs::write(path, body)?;
    Ok(())
}

/// Renders M1-M11 as a tabular-and-list Markdown summary. Contains, at
/// minimum, the literal headings `# Tag Health Metrics Summary`,
/// `M1 Entropy`, and `M11 Token-length overflow rate`.
fn render_metrics_markdown(report: &MetricsReport) -> String {
    let mut out = String::new();

    out.push_str("# Tag Health Metrics Summary\n\n");
    out.push_str(&format!("Generated at `{}`.\n\n", report.generated_at));

    out.push_str("| Metric | Value |\n|---|---|\n");
    out.push_str(&format!("| Sample count | {} |\n", report.sample_count));
    out.push_str(&format!("| Token count | {} |\n", report.token_count));
    out.push_str(&format!("| Unique tag count | {} |\n\n", report.unique_tag_count));

    out.push_str("## M1 Entropy\n\n");
    out.push_str(&format!("{:.6}\n\n", report.entropy));

    out.push_str("## M2 Effective tag count\n\n");
    out.push_str(&format!("{:.6}\n\n", report.effective_tag_count));

    out.push_str("## M3 Gini\n\n");
    out.push_str(&format!("{:.6}\n\n", report.gini));

    out.push_str("## M4 HHI\n\n");
    out.push_str(&format!("{:.6}\n\n", report.hhi));

    out.push_str("## M5 Top-K mass\n\n");
    out.push_str("| K | Mass |\n|---|---|\n");
    for (k, mass) in &report.top_k_mass {
        out.push_str(&format!("| {} | {:.6} |\n", k, mass));
    }
    out.push('\n');

    out.push_str("## M6 JSD to target\n\n");
    match report.jsd_to_target {
        Some(jsd) => out.push_str(&format!("{:.6}\n\n", jsd)),
        None => out.push_str("Not computed.\n\n"),
    }

    out.push_str("## M7 Stop-tag candidates\n\n");
    if report.stop_tag_candidates.is_empty() {
        out.push_str("None.\n\n");
    } else {
        for candidate in &report.stop_tag_candidates {
            out.push_str(&format!(
                "- `{}` (documentFrequency={}, idf={:.6})\n",
                candidate.tag, candidate.document_frequency, candidate.idf
            ));
        }
        out.push('\n');
    }

    out.push_str("## M8 PMI anomalies\n\n");
    if report.pmi_anomalies.is_empty() {
        out.push_str("None.\n\n");
    } else {
        for anomaly in &report.pmi_anomalies {
            out.push_str(&format!(
                "- `{}` / `{}` (count={}, pmi={:.6})\n",
                anomaly.tag_a, anomaly.tag_b, anomaly.count, anomaly.pmi
            ));
        }
        out.push('\n');
    }

    out.push_str("## M9 Community hint\n\n");
    out.push_str(&format!("- Community count: {}\n", report.community_hint.community_count));
    out.push_str(&format!("- Modularity hint: {:.6}\n", report.community_hint.modularity_hint));
    for preview in &report.community_hint.community_previews {
        out.push_str(&format!("  - size={} preview={:?}\n", preview.size, preview.preview));
    }
    out.push('\n');

    out.push_str("## M10 Near-duplicate rate hook\n\n");
    match report.near_duplicate_rate_hook.rate {
        Some(rate) => out.push_str(&format!("Rate: {:.6}. {}\n\n", rate, report.near_duplicate_rate_hook.note)),
        None => out.push_str(&format!("Rate: absent. {}\n\n", report.near_duplicate_rate_hook.note)),
    }

    out.push_str("## M11 Token-length overflow rate\n\n");
    out.push_str(&format!("{:.6}\n", report.token_length_overflow_rate));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DuplicateReport;
    use crate::metrics::{evaluate as evaluate_metrics, MetricsOptions};
    use crate::recommend::RecommendationEvaluation;
    use std::collections::BTreeMap;

    #[test]
    fn writes_every_artifact_with_required_headings() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<ImageRecord> = Vec::new();
        let summary = SummaryIndex::from_records(
            "dataset".to_string(),
            BTreeMap::new(),
            &records,
            BTreeMap::new(),
        );
        let metrics_report = evaluate_metrics(&[], &MetricsOptions::default());
        let recommendation_evaluation = RecommendationEvaluation { matches: Vec::new(), rules_evaluated: 0 };
        let duplicate_report =
            DuplicateReport { total_files: 0, exact_groups: Vec::new(), near_duplicate_findings: Vec::new(), near_duplicate_groups: Vec::new() };

        let outputs = ReportOutputs::new(dir.path());
        write_all(
            &outputs,
            &records,
            &summary,
            &metrics_report,
            &recommendation_evaluation,
            &duplicate_report,
        )
        .unwrap();

        assert!(outputs.dataset_jsonl.exists());
        assert!(outputs.summary_json.exists());
        assert!(outputs.metrics_json.exists());
        assert!(outputs.metrics_md.exists());
        assert!(outputs.recommendations_json.exists());
        assert!(outputs.duplicates_json.exists());

        let markdown = fs::read_to_string(&outputs.metrics_md).unwrap();
        assert!(markdown.contains("# Tag Health Metrics Summary"));
        assert!(markdown.contains("M1 Entropy"));
        assert!(markdown.contains("M11 Token-length overflow rate"));
        assert!(!markdown.contains('\r'));
    }

    #[test]
    fn jsonl_has_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            ImageRecord::new(
                "a.png".to_string(),
                1,
                1,
                "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                "sha-a".to_string(),
                crate::model::CaptionSources::default(),
            ),
            ImageRecord::new(
                "b.png".to_string(),
                2,
                3,
                "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                "sha-b".to_string(),
                crate::model::CaptionSources::default(),
            ),
        ];
        let path = dir.path().join("dataset.jsonl");
        write_jsonl(&path, &records).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(!body.contains('\r'));
    }
}
