//! Normalize module - Deterministic tag normalization with an audit trail
//!
//! Stage S2. Each token passes through four steps, strictly in order:
//! case-fold, delimiter normalization, alias mapping, stop-tag filtering.
//! Every step appends one [`AuditEvent`] to the token's trail, so a result
//! always carries exactly four events in a fixed order — this is what makes
//! two runs over the same input byte-identical.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagmetryError};

/// One step of the four-step normalization pipeline. Serializes under its
/// exact variant spelling (`"CaseFold"`, not `"caseFold"`) — §3 names these
/// four events literally, the same way severity/band/job-state strings are
/// exact spellings rather than camelCased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStep {
    CaseFold,
    DelimiterNormalization,
    AliasMapping,
    StopTagFiltering,
}

/// One recorded transformation (or no-op) within a token's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub step: AuditStep,
    pub before: String,
    pub after: String,
    pub message: String,
}

impl AuditEvent {
    fn transform(step: AuditStep, before: &str, after: &str) -> Self {
        let message = if before == after {
            "No change.".to_string()
        } else {
            format!("Transformed '{}' to '{}'.", before, after)
        };
        AuditEvent { step, before: before.to_string(), after: after.to_string(), message }
    }

    fn filtered(before: &str) -> Self {
        AuditEvent {
            step: AuditStep::StopTagFiltering,
            before: before.to_string(),
            after: before.to_string(),
            message: "Filtered by stop-tag rule.".to_string(),
        }
    }
}

/// Outcome of normalizing one token: its final form (absent iff filtered)
/// and the full four-event audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationTokenResult {
    pub original: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    pub is_filtered: bool,
    pub audit_trail: Vec<AuditEvent>,
}

/// Outcome of normalizing a whole token sequence for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationResult {
    pub token_results: Vec<NormalizationTokenResult>,
    pub normalized_tokens: Vec<String>,
}

/// Loaded, ready-to-apply normalization rules. Delimiters are ordered
/// longest-first for deterministic fixed-point replacement; aliases and stop
/// tags are pre-normalized through case-fold + delimiter normalization at
/// load time, so they compare equal to already-normalized tokens.
#[derive(Debug, Clone)]
pub struct TagNormalizationRules {
    pub canonical_delimiter: String,
    delimiters: Vec<String>,
    aliases: BTreeMap<String, String>,
    stop_tags: BTreeSet<String>,
}

/// On-disk shape of the normalization ruleset (JSON). Missing fields
/// default to empty.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRules {
    canonical_delimiter: Option<String>,
    delimiters: Vec<String>,
    aliases: BTreeMap<String, String>,
    stop_tags: Vec<String>,
}

impl Default for RawRules {
    fn default() -> Self {
        RawRules {
            canonical_delimiter: None,
            delimiters: Vec::new(),
            aliases: BTreeMap::new(),
            stop_tags: Vec::new(),
        }
    }
}

impl TagNormalizationRules {
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawRules = serde_json::from_str(text).map_err(|e| TagmetryError::InvalidConfig {
            message: format!("Malformed normalization rules: {}", e),
        })?;
        Ok(Self::from_raw(raw))
    }

    pub fn empty() -> Self {
        Self::from_raw(RawRules::default())
    }

    fn from_raw(raw: RawRules) -> Self {
        let canonical_delimiter = raw.canonical_delimiter.unwrap_or_else(|| " ".to_string());

        // Longer delimiters first, then ordinal, so fixed-point replacement
        // is deterministic regardless of input order.
        let mut delimiters = raw.delimiters;
        delimiters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let fold = |s: &str| -> String {
            let lowered = s.to_lowercase();
            normalize_delimiters(&lowered, &delimiters, &canonical_delimiter)
        };

        let aliases = raw
            .aliases
            .into_iter()
            .map(|(k, v)| (fold(&k), fold(&v)))
            .collect();
        let stop_tags = raw.stop_tags.into_iter().map(|s| fold(&s)).collect();

        TagNormalizationRules { canonical_delimiter, delimiters, aliases, stop_tags }
    }

    /// Normalizes a sequence of raw tokens. `None`/empty tokens are
    /// tolerated and treated as empty strings, per the contract.
    pub fn normalize(&self, tokens: &[Option<String>]) -> NormalizationResult {
        let token_results: Vec<NormalizationTokenResult> =
            tokens.iter().map(|t| self.normalize_one(t.as_deref().unwrap_or(""))).collect();

        let normalized_tokens = token_results
            .iter()
            .filter(|r| !r.is_filtered)
            .filter_map(|r| r.normalized.clone())
            .collect();

        NormalizationResult { token_results, normalized_tokens }
    }

    fn normalize_one(&self, original: &str) -> NormalizationTokenResult {
        let mut audit_trail = Vec::with_capacity(4);

        // 1. CaseFold
        let case_folded = original.to_lowercase();
        audit_trail.push(AuditEvent::transform(AuditStep::CaseFold, original, &case_folded));

        // 2. DelimiterNormalization
        let delimited = normalize_delimiters(&case_folded, &self.delimiters, &self.canonical_delimiter);
        audit_trail.push(AuditEvent::transform(
            AuditStep::DelimiterNormalization,
            &case_folded,
            &delimited,
        ));

        // 3. AliasMapping
        let aliased = self.aliases.get(&delimited).cloned().unwrap_or_else(|| delimited.clone());
        audit_trail.push(AuditEvent::transform(AuditStep::AliasMapping, &delimited, &aliased));

        // 4. StopTagFiltering
        let is_filtered = self.stop_tags.contains(&aliased);
        let normalized = if is_filtered {
            audit_trail.push(AuditEvent::filtered(&aliased));
            None
        } else {
            audit_trail.push(AuditEvent::transform(AuditStep::StopTagFiltering, &aliased, &aliased));
            Some(aliased)
        };

        NormalizationTokenResult {
            original: original.to_string(),
            normalized,
            is_filtered,
            audit_trail,
        }
    }
}

/// Replaces every configured source delimiter with the canonical delimiter,
/// in descending-length-then-ordinal order, iterated to a fixed point, then
/// collapses runs of the canonical delimiter and trims.
fn normalize_delimiters(input: &str, delimiters: &[String], canonical: &str) -> String {
    let mut current = input.to_string();
    loop {
        let mut changed = false;
        for delim in delimiters {
            if delim.is_empty() || delim == canonical {
                continue;
            }
            if current.contains(delim.as_str()) {
                current = current.replace(delim.as_str(), canonical);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    if !canonical.is_empty() {
        let doubled = format!("{}{}", canonical, canonical);
        while current.contains(&doubled) {
            current = current.replace(&doubled, canonical);
        }
    }

    trim_delimiter(&current, canonical)
}

/// Trims a leading/trailing canonical delimiter as a whole unit (not a
/// per-character class), so multi-character canonical delimiters behave
/// correctly.
fn trim_delimiter(s: &str, delimiter: &str) -> String {
    if delimiter.is_empty() {
        return s.to_string();
    }
    let mut out = s;
    while let Some(rest) = out.strip_prefix(delimiter) {
        out = rest;
    }
    while let Some(rest) = out.strip_suffix(delimiter) {
        out = rest;
    }
    out.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<Option<String>> {
        words.iter().map(|w| Some(w.to_string())).collect()
    }

    #[test]
    fn scenario_three_basic_pipeline() {
        let json = r#"{
            "canonicalDelimiter": " ",
            "delimiters": ["_", "-", "/"],
            "aliases": {"sci fi": "science fiction", "bw": "black and white"},
            "stopTags": ["meta", "discard me"]
        }"#;
        let rules = TagNormalizationRules::from_json(json).unwrap();
        let result = rules.normalize(&tokens(&["SCI_FI", "bW", "meta", "safe-tag"]));

        assert_eq!(
            result.normalized_tokens,
            vec!["science fiction".to_string(), "black and white".to_string(), "safe tag".to_string()]
        );

        let meta_result = &result.token_results[2];
        assert!(meta_result.is_filtered);
        assert_eq!(meta_result.normalized, None);
        assert_eq!(meta_result.audit_trail.last().unwrap().step, AuditStep::StopTagFiltering);
        assert_eq!(meta_result.audit_trail.last().unwrap().message, "Filtered by stop-tag rule.");
    }

    #[test]
    fn scenario_four_overlapping_delimiters_reach_fixed_point() {
        let json = r#"{"canonicalDelimiter": "-", "delimiters": ["--", "_"]}"#;
        let rules = TagNormalizationRules::from_json(json).unwrap();
        let result = rules.normalize(&tokens(&["A----B", "A__B"]));
        assert_eq!(result.normalized_tokens, vec!["a-b".to_string(), "a-b".to_string()]);
        for token_result in &result.token_results {
            assert_eq!(token_result.audit_trail.len(), 4);
        }
    }

    #[test]
    fn every_token_has_exactly_four_audit_events_in_order() {
        let rules = TagNormalizationRules::empty();
        let result = rules.normalize(&tokens(&["Hello_World"]));
        let steps: Vec<AuditStep> = result.token_results[0].audit_trail.iter().map(|e| e.step).collect();
        assert_eq!(
            steps,
            vec![
                AuditStep::CaseFold,
                AuditStep::DelimiterNormalization,
                AuditStep::AliasMapping,
                AuditStep::StopTagFiltering,
            ]
        );
    }

    #[test]
    fn normalizing_a_normalized_token_is_idempotent() {
        let json = r#"{"canonicalDelimiter": " ", "delimiters": ["_"], "aliases": {"a b": "a b"}}"#;
        let rules = TagNormalizationRules::from_json(json).unwrap();
        let first = rules.normalize(&tokens(&["A_B"]));
        let normalized_once = first.normalized_tokens[0].clone();
        let second = rules.normalize(&tokens(&[normalized_once.as_str()]));
        assert_eq!(second.normalized_tokens[0], normalized_once);
        let trail = &second.token_results[0].audit_trail;
        assert_eq!(trail[1].message, "No change.");
    }

    #[test]
    fn audit_step_serializes_to_its_exact_spelling() {
        assert_eq!(serde_json::to_string(&AuditStep::CaseFold).unwrap(), "\"CaseFold\"");
        assert_eq!(serde_json::to_string(&AuditStep::DelimiterNormalization).unwrap(), "\"DelimiterNormalization\"");
        assert_eq!(serde_json::to_string(&AuditStep::AliasMapping).unwrap(), "\"AliasMapping\"");
        assert_eq!(serde_json::to_string(&AuditStep::StopTagFiltering).unwrap(), "\"StopTagFiltering\"");
    }

    #[test]
    fn none_and_empty_tokens_are_tolerated() {
        let rules = TagNormalizationRules::empty();
        let result = rules.normalize(&[None, Some(String::new())]);
        assert_eq!(result.token_results.len(), 2);
        assert_eq!(result.normalized_tokens, vec!["".to_string(), "".to_string()]);
    }
}
