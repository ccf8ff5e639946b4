//! # Tagmetry CLI
//!
//! Command-line wrapper around `tagmetry-core`. Exposes a single
//! `analyze` subcommand whose flags mirror `AnalysisRequest`. Output mode
//! auto-detects TTY unless `--json` is given: human mode prints progress
//! lines as stages complete, JSON mode stays silent until the final
//! `AnalysisResult` is printed. Errors are reported to stderr as structured
//! JSON with exit codes `0` success, `1` analysis error, `2` bad arguments.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Mutex;
use tagmetry_core::{
    AnalysisRequest, AnalysisResult, CancelToken, DedupOptions, JobState, MetricsOptions,
    ProgressSink, ProgressUpdate, TagNormalizationRules,
};

// ============================================================================
// Output Format
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum OutputFormat {
    Human,
    Json,
}

fn determine_output_format(json_flag: bool) -> OutputFormat {
    if json_flag {
        OutputFormat::Json
    } else if atty::is(atty::Stream::Stdout) {
        OutputFormat::Human
    } else {
        OutputFormat::Json
    }
}

// ============================================================================
// Top-Level CLI Structure
// ============================================================================

/// Tagmetry - local, privacy-first analytics for image+caption datasets
#[derive(Parser)]
#[command(
    name = "tagmetry",
    version,
    about = "Local tag-health analytics for image+caption datasets",
    long_about = "Tagmetry scans a local image+caption dataset, normalizes tags,\n\
                  computes tag-health statistics, evaluates recommendation rules,\n\
                  and finds exact and near duplicates. Everything runs locally and\n\
                  writes plain files next to the dataset; nothing leaves the machine.",
    after_help = "EXAMPLES:\n  \
                  tagmetry analyze ~/datasets/portraits\n  \
                  tagmetry analyze ~/datasets/portraits --rules rules.yaml --json\n  \
                  tagmetry analyze ~/datasets/portraits --no-duplicate-detection"
)]
struct CliArgs {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the full analysis pipeline over a dataset directory
    Analyze(AnalyzeArgs),
}

// ============================================================================
// Analyze Subcommand
// ============================================================================

/// Run the full analysis pipeline over a dataset directory
#[derive(Args)]
#[command(
    about = "Run the full analysis pipeline over a dataset directory",
    long_about = "Scans `path` for images and caption sidecars, normalizes tags,\n\
                  computes tag-health metrics, evaluates recommendation rules (if a\n\
                  ruleset is given), and detects exact/near duplicates. Writes\n\
                  dataset.jsonl, summary.json, metrics.json, metrics.md,\n\
                  recommendations.json, and duplicates.json under the output\n\
                  directory (default: <path>/.tagmetry).",
    after_help = "EXAMPLES:\n  \
                  # Analyze with default settings\n  \
                  tagmetry analyze ~/datasets/portraits\n\n  \
                  # Write artifacts elsewhere and apply a ruleset\n  \
                  tagmetry analyze ~/datasets/portraits --output ~/reports --rules rules.yaml\n\n  \
                  # Skip duplicate detection\n  \
                  tagmetry analyze ~/datasets/portraits --no-duplicate-detection"
)]
struct AnalyzeArgs {
    /// Dataset directory to scan
    path: PathBuf,

    /// Directory to write artifacts into (default: <path>/.tagmetry)
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// JSON or YAML recommendation ruleset file
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// JSON tag normalization rules file (aliases, stop-tags, delimiters)
    #[arg(long, value_name = "FILE")]
    normalization_rules: Option<PathBuf>,

    /// Skip exact/near-duplicate detection
    #[arg(long)]
    no_duplicate_detection: bool,

    /// Skip tag-health metrics computation
    #[arg(long)]
    no_tag_metrics: bool,

    /// Skip recommendation rule evaluation, even if --rules is given
    #[arg(long)]
    no_recommendations: bool,

    /// Hamming distance at or below which a near-duplicate pair is "Likely"
    #[arg(long, value_name = "N")]
    likely_threshold: Option<u32>,

    /// Hamming distance at or below which a near-duplicate pair is "Maybe"
    #[arg(long, value_name = "N")]
    maybe_threshold: Option<u32>,

    /// Force JSON output (default: auto-detect based on TTY)
    #[arg(long)]
    json: bool,
}

// ============================================================================
// Progress Printing
// ============================================================================

/// Prints each stage transition once, human mode only. Stages may report
/// several sub-step messages at the same percent, so this sink only
/// re-prints the stage header on a change of stage name.
struct HumanProgressPrinter {
    last_stage: Mutex<Option<String>>,
}

impl HumanProgressPrinter {
    fn new() -> Self {
        HumanProgressPrinter { last_stage: Mutex::new(None) }
    }
}

impl ProgressSink for HumanProgressPrinter {
    fn report(&self, update: ProgressUpdate) {
        let mut last_stage = self.last_stage.lock().unwrap();
        if last_stage.as_deref() != Some(update.stage.as_str()) {
            println!("[{:>3}%] {}", update.percent, update.stage);
            *last_stage = Some(update.stage.clone());
        }
        if !update.message.is_empty() {
            println!("       {}", update.message);
        }
    }
}

// ============================================================================
// Request Building
// ============================================================================

fn build_request(args: &AnalyzeArgs) -> Result<AnalysisRequest, String> {
    let mut request = AnalysisRequest::new(args.path.clone());
    request.output_dir = args.output.clone();
    request.rules_path = args.rules.clone();
    request.enable_duplicate_detection = !args.no_duplicate_detection;
    request.enable_tag_metrics = !args.no_tag_metrics;
    request.enable_recommendations = !args.no_recommendations;

    if let Some(path) = &args.normalization_rules {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read normalization rules file: {}", e))?;
        request.normalization_rules =
            TagNormalizationRules::from_json(&text).map_err(|e| e.to_string())?;
    }

    let mut dedup_options = DedupOptions::default();
    if let Some(likely) = args.likely_threshold {
        dedup_options.likely_threshold = likely;
    }
    if let Some(maybe) = args.maybe_threshold {
        dedup_options.maybe_threshold = maybe;
    }
    if dedup_options.maybe_threshold < dedup_options.likely_threshold {
        return Err("--maybe-threshold must be greater than or equal to --likely-threshold".to_string());
    }
    request.dedup_options = dedup_options;
    request.metrics_options = MetricsOptions::default();

    Ok(request)
}

// ============================================================================
// Command Handler
// ============================================================================

/// A user-facing argument error, distinct from an analysis failure. Maps to
/// exit code 2 rather than 1.
struct BadArgs(String);

fn handle_analyze(args: AnalyzeArgs) -> Result<AnalysisResult, BadArgs> {
    let request = build_request(&args).map_err(BadArgs)?;
    let output_format = determine_output_format(args.json);
    let cancel = CancelToken::new();

    let result = match output_format {
        OutputFormat::Human => {
            let sink = HumanProgressPrinter::new();
            tagmetry_core::run_analysis(&request, &sink, &cancel)
        }
        OutputFormat::Json => {
            tagmetry_core::run_analysis(&request, &tagmetry_core::progress::NullProgressSink, &cancel)
        }
    };

    match output_format {
        OutputFormat::Human => {
            match result.state {
                JobState::Completed => println!("\nAnalysis complete. Artifacts written to:"),
                JobState::Cancelled => println!("\nAnalysis cancelled."),
                JobState::Failed => println!("\nAnalysis failed."),
            }
            for (name, path) in &result.outputs {
                println!("  {}: {}", name, path);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string()));
        }
    }

    Ok(result)
}

#[derive(Serialize)]
struct BadArgsPayload<'a> {
    kind: &'static str,
    message: &'a str,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn exit_code_for(result: &AnalysisResult) -> i32 {
    match result.state {
        JobState::Completed => 0,
        JobState::Cancelled => 0,
        JobState::Failed => 1,
    }
}

fn main() {
    let args = CliArgs::parse();

    match args.cmd {
        Cmd::Analyze(analyze_args) => match handle_analyze(analyze_args) {
            Ok(result) => {
                if result.state == JobState::Failed {
                    let payload = serde_json::json!({
                        "kind": "AnalysisFailed",
                        "message": result.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                    });
                    eprintln!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .unwrap_or_else(|_| "{\"error\":\"unknown error\"}".to_string())
                    );
                }
                exit(exit_code_for(&result));
            }
            Err(BadArgs(message)) => {
                let payload = BadArgsPayload { kind: "BadArguments", message: &message };
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", message))
                );
                exit(2);
            }
        },
    }
}
