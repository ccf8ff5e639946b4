//! Ruleset module - Loading recommendation rules from JSON or YAML
//!
//! Stage S7. A thin loader: parses either format into a [`RuleSet`] and
//! drops rules with a missing or blank id. Format is
//! chosen by the caller, not sniffed, so a `.yml` file with JSON content
//! inside it is rejected rather than silently accepted. Unknown JSON/YAML
//! properties are ignored; missing list fields default to empty.

use crate::error::{Result, TagmetryError};
use crate::recommend::RuleSet;

/// Parses a JSON-encoded ruleset document (`{"rules": [...]}`).
pub fn load_json(text: &str) -> Result<RuleSet> {
    let ruleset: RuleSet = serde_json::from_str(text).map_err(|e| TagmetryError::InvalidRuleset {
        message: format!("Malformed JSON ruleset: {}", e),
    })?;
    Ok(drop_blank_ids(ruleset))
}

/// Parses a YAML-encoded ruleset document.
pub fn load_yaml(text: &str) -> Result<RuleSet> {
    let ruleset: RuleSet = serde_yaml::from_str(text).map_err(|e| TagmetryError::InvalidRuleset {
        message: format!("Malformed YAML ruleset: {}", e),
    })?;
    Ok(drop_blank_ids(ruleset))
}

fn drop_blank_ids(mut ruleset: RuleSet) -> RuleSet {
    ruleset.rules.retain(|rule| !rule.id.trim().is_empty());
    ruleset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_json_ruleset() {
        let json = r#"{
            "rules": [
                {
                    "id": "r1",
                    "description": "Low diversity",
                    "severity": "Warning",
                    "conditions": [
                        {"signal": "uniqueTagCount", "operator": "LessThan", "value": 10.0}
                    ]
                }
            ]
        }"#;
        let ruleset = load_json(json).unwrap();
        assert_eq!(ruleset.rules.len(), 1);
        assert_eq!(ruleset.rules[0].id, "r1");
    }

    #[test]
    fn loads_an_equivalent_yaml_ruleset() {
        let yaml = "rules:\n  - id: r1\n    description: Low diversity\n    severity: Warning\n    conditions:\n      - signal: uniqueTagCount\n        operator: LessThan\n        value: 10.0\n";
        let ruleset = load_yaml(yaml).unwrap();
        assert_eq!(ruleset.rules.len(), 1);
        assert_eq!(ruleset.rules[0].id, "r1");
    }

    #[test]
    fn drops_rules_with_missing_or_blank_id() {
        let json = r#"{
            "rules": [
                {"id": "", "description": "a", "severity": "Info",
                 "conditions": [{"signal": "sampleCount", "operator": "GreaterThan", "value": 0.0}]},
                {"id": "  ", "description": "b", "severity": "Info",
                 "conditions": [{"signal": "sampleCount", "operator": "GreaterThan", "value": 0.0}]},
                {"id": "keep-me", "description": "c", "severity": "Info",
                 "conditions": [{"signal": "sampleCount", "operator": "GreaterThan", "value": 0.0}]}
            ]
        }"#;
        let ruleset = load_json(json).unwrap();
        assert_eq!(ruleset.rules.len(), 1);
        assert_eq!(ruleset.rules[0].id, "keep-me");
    }

    #[test]
    fn missing_list_fields_default_to_empty() {
        let json = r#"{"rules": [{"id": "r1", "description": "d", "severity": "Critical", "conditions": []}]}"#;
        let ruleset = load_json(json).unwrap();
        assert_eq!(ruleset.rules.len(), 1);
        assert!(ruleset.rules[0].conditions.is_empty());
        assert!(ruleset.rules[0].likely_failure_modes.is_empty());
        assert!(ruleset.rules[0].actions.is_empty());
    }

    #[test]
    fn rule_object_missing_the_id_field_entirely_is_dropped_not_a_parse_error() {
        let json = r#"{
            "rules": [
                {"description": "no id at all", "severity": "Info",
                 "conditions": [{"signal": "sampleCount", "operator": "GreaterThan", "value": 0.0}]},
                {"id": "keep-me", "description": "c", "severity": "Info", "conditions": []}
            ]
        }"#;
        let ruleset = load_json(json).unwrap();
        assert_eq!(ruleset.rules.len(), 1);
        assert_eq!(ruleset.rules[0].id, "keep-me");
    }

    #[test]
    fn missing_rules_key_defaults_to_empty_ruleset() {
        let ruleset = load_json("{}").unwrap();
        assert!(ruleset.rules.is_empty());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = load_json("{ not json").unwrap_err();
        assert!(matches!(err, TagmetryError::InvalidRuleset { .. }));
    }
}
