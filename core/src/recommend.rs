//! Recommend module - Rule-based recommendation matching
//!
//! Stage S4. Each rule is a conjunction of conditions over named signals
//! resolved from the metrics report; a rule matches iff every one of its
//! conditions matches. Only matching rules appear in the evaluation's
//! match list — see the grounding notes for why an unmatched-rule list was
//! not added. Rules are evaluated in ascending rule-id order, regardless of
//! ruleset file order, so output ordering is deterministic.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsReport;

/// A comparison between a named signal and a literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
}

/// Numeric tolerance applied to `Equal`/`NotEqual` comparisons, since signals
/// are floating point.
const EQUALITY_TOLERANCE: f64 = 1e-12;

impl ComparisonOperator {
    fn evaluate(self, actual: f64, expected: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => actual > expected,
            ComparisonOperator::GreaterThanOrEqual => actual >= expected,
            ComparisonOperator::LessThan => actual < expected,
            ComparisonOperator::LessThanOrEqual => actual <= expected,
            ComparisonOperator::Equal => (actual - expected).abs() <= EQUALITY_TOLERANCE,
            ComparisonOperator::NotEqual => (actual - expected).abs() > EQUALITY_TOLERANCE,
        }
    }
}

/// Severity of a recommendation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One condition within a rule: `signal <operator> value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub signal: String,
    pub operator: ComparisonOperator,
    pub value: f64,
}

/// One recommendation rule: fires as a unit when all of its conditions
/// hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRule {
    #[serde(default)]
    pub id: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub likely_failure_modes: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Loaded, ready-to-evaluate rule set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    pub rules: Vec<RecommendationRule>,
}

/// One condition as evaluated against a concrete metrics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedCondition {
    pub signal: String,
    pub operator: ComparisonOperator,
    pub expected: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
    pub matched: bool,
    pub explanation: String,
}

/// One rule whose conditions all matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationMatch {
    pub rule_id: String,
    pub severity: Severity,
    pub evaluated_conditions: Vec<EvaluatedCondition>,
    pub likely_failure_modes: Vec<String>,
    pub actions: Vec<String>,
    pub description: String,
}

/// Outcome of evaluating an entire ruleset against one metrics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationEvaluation {
    pub matches: Vec<RecommendationMatch>,
    pub rules_evaluated: usize,
}

/// Evaluates `ruleset` against `report`, in ascending rule-id order. A rule
/// with no conditions never matches.
pub fn evaluate(ruleset: &RuleSet, report: &MetricsReport) -> RecommendationEvaluation {
    let mut rules: Vec<&RecommendationRule> = ruleset.rules.iter().collect();
    rules.sort_by(|a, b| a.id.cmp(&b.id));

    let mut matches = Vec::new();

    for rule in rules {
        if rule.conditions.is_empty() {
            continue;
        }

        let evaluated_conditions: Vec<EvaluatedCondition> =
            rule.conditions.iter().map(|condition| evaluate_condition(condition, report)).collect();
        let all_matched = evaluated_conditions.iter().all(|c| c.matched);

        if all_matched {
            matches.push(RecommendationMatch {
                rule_id: rule.id.clone(),
                severity: rule.severity,
                evaluated_conditions,
                likely_failure_modes: rule.likely_failure_modes.clone(),
                actions: rule.actions.clone(),
                description: rule.description.clone(),
            });
        }
    }

    RecommendationEvaluation { matches, rules_evaluated: ruleset.rules.len() }
}

fn evaluate_condition(condition: &RuleCondition, report: &MetricsReport) -> EvaluatedCondition {
    match resolve_signal(&condition.signal, report) {
        Some(actual) => {
            let matched = condition.operator.evaluate(actual, condition.value);
            let explanation =
                if matched { "Condition satisfied.".to_string() } else { "Condition not satisfied.".to_string() };
            EvaluatedCondition {
                signal: condition.signal.clone(),
                operator: condition.operator,
                expected: condition.value,
                actual: Some(actual),
                matched,
                explanation,
            }
        }
        None => EvaluatedCondition {
            signal: condition.signal.clone(),
            operator: condition.operator,
            expected: condition.value,
            actual: None,
            matched: false,
            explanation: "Signal not found.".to_string(),
        },
    }
}

/// Resolves a named signal from a metrics report. `"topKMass:<k>"` looks up
/// an entry in [`MetricsReport::top_k_mass`]; every other name maps to a
/// fixed scalar field on the report.
fn resolve_signal(name: &str, report: &MetricsReport) -> Option<f64> {
    if let Some(k_str) = name.strip_prefix("topKMass:") {
        let k: usize = k_str.parse().ok()?;
        return report.top_k_mass.get(&k).copied();
    }

    match name {
        "sampleCount" => Some(report.sample_count as f64),
        "tokenCount" => Some(report.token_count as f64),
        "uniqueTagCount" => Some(report.unique_tag_count as f64),
        "entropy" => Some(report.entropy),
        "effectiveTagCount" => Some(report.effective_tag_count),
        "gini" => Some(report.gini),
        "hhi" => Some(report.hhi),
        "jsdToTarget" => report.jsd_to_target,
        "stopTagCandidatesCount" => Some(report.stop_tag_candidates.len() as f64),
        "pmiAnomaliesCount" => Some(report.pmi_anomalies.len() as f64),
        "communityCount" => Some(report.community_hint.community_count as f64),
        "modularityHint" => Some(report.community_hint.modularity_hint),
        "nearDuplicateRate" => report.near_duplicate_rate_hook.rate,
        "tokenLengthOverflowRate" => Some(report.token_length_overflow_rate),
        _ => None,
    }
}
