use crate::config::{RuleOperator, ValidationRule};
use serde_json::Value;

/// Walk a dotted path through nested JSON objects.
///
/// Returns `None` as soon as a segment is missing, an intermediate node is
/// not an object, or a lookup yields an explicit `null`. Absence is a normal
/// outcome here, never an error.
pub fn resolve_field<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = tree;
    for key in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(key)?,
            _ => return None,
        }
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// Evaluate a single rule against an API response.
///
/// The field is resolved under `root_path` (or bare when the root is empty).
/// A missing field fails the rule. Ordering operators compare as integers;
/// non-numeric data on either side fails the rule, since malformed values
/// are a normal outcome of a flaky API.
pub fn evaluate_rule(tree: &Value, rule: &ValidationRule, root_path: &str) -> bool {
    let full_path = if root_path.is_empty() {
        rule.field.clone()
    } else {
        format!("{root_path}.{}", rule.field)
    };

    let actual = match resolve_field(tree, &full_path) {
        Some(value) => value,
        None => {
            log::debug!("field '{full_path}' not found in response");
            return false;
        }
    };

    match rule.operator {
        RuleOperator::GreaterThan
        | RuleOperator::LessThan
        | RuleOperator::GreaterOrEqual
        | RuleOperator::LessOrEqual => {
            let (Some(lhs), Some(rhs)) = (coerce_int(actual), coerce_int(&rule.value)) else {
                log::debug!("non-numeric comparison for field '{}'", rule.field);
                return false;
            };
            match rule.operator {
                RuleOperator::GreaterThan => lhs > rhs,
                RuleOperator::LessThan => lhs < rhs,
                RuleOperator::GreaterOrEqual => lhs >= rhs,
                RuleOperator::LessOrEqual => lhs <= rhs,
                _ => unreachable!(),
            }
        }
        RuleOperator::Equal => actual == &rule.value,
        RuleOperator::NotEqual => actual != &rule.value,
        RuleOperator::In => match &rule.value {
            Value::Array(items) => items.iter().any(|item| item == actual),
            Value::String(haystack) => actual
                .as_str()
                .map(|needle| haystack.contains(needle))
                .unwrap_or(false),
            _ => false,
        },
    }
}

/// A target considers an email valid iff every rule passes. An empty rule
/// list is vacuously valid.
pub fn passes_all(tree: &Value, rules: &[ValidationRule], root_path: &str) -> bool {
    rules.iter().all(|rule| evaluate_rule(tree, rule, root_path))
}

/// Pull the provider's own `reason` string out of the response, if present.
pub fn extract_reason(tree: &Value, root_path: &str) -> Option<String> {
    let node = if root_path.is_empty() {
        tree
    } else {
        resolve_field(tree, root_path)?
    };
    node.get("reason")?.as_str().map(str::to_string)
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        // Floats truncate, so a score of 90.0 compares as 90.
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(field: &str, operator: RuleOperator, value: Value) -> ValidationRule {
        ValidationRule {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn resolve_field_walks_nested_objects() {
        let tree = json!({"data": {"nested": {"field": 42}}});
        assert_eq!(resolve_field(&tree, "data.nested.field"), Some(&json!(42)));
    }

    #[test]
    fn resolve_field_is_absent_for_missing_keys_and_non_objects() {
        let tree = json!({"data": {"score": 90, "tags": [1, 2]}});
        assert_eq!(resolve_field(&tree, "data.missing"), None);
        assert_eq!(resolve_field(&tree, "data.score.deeper"), None);
        assert_eq!(resolve_field(&tree, "data.tags.0"), None);
        assert_eq!(resolve_field(&tree, "nope.score"), None);
    }

    #[test]
    fn resolve_field_treats_explicit_null_as_absent() {
        let tree = json!({"data": {"score": null}});
        assert_eq!(resolve_field(&tree, "data.score"), None);
    }

    #[test]
    fn score_threshold_scenarios() {
        let r = rule("score", RuleOperator::GreaterOrEqual, json!(80));
        assert!(evaluate_rule(&json!({"data": {"score": 90}}), &r, "data"));
        assert!(!evaluate_rule(&json!({"data": {"score": 70}}), &r, "data"));
        assert!(!evaluate_rule(&json!({"data": {}}), &r, "data"));
    }

    #[test]
    fn numeric_operators_accept_integer_strings() {
        let r = rule("score", RuleOperator::GreaterThan, json!("50"));
        assert!(evaluate_rule(&json!({"data": {"score": "90"}}), &r, "data"));
    }

    #[test]
    fn whole_valued_floats_coerce_for_ordering() {
        let r = rule("score", RuleOperator::GreaterOrEqual, json!(80));
        assert!(evaluate_rule(&json!({"data": {"score": 90.0}}), &r, "data"));
        assert!(!evaluate_rule(&json!({"data": {"score": 79.5}}), &r, "data"));
    }

    #[test]
    fn numeric_operators_fail_closed_on_garbage() {
        let r = rule("score", RuleOperator::LessOrEqual, json!(80));
        assert!(!evaluate_rule(
            &json!({"data": {"score": "ninety"}}),
            &r,
            "data"
        ));
        assert!(!evaluate_rule(&json!({"data": {"score": true}}), &r, "data"));

        let r = rule("score", RuleOperator::GreaterThan, json!("high"));
        assert!(!evaluate_rule(&json!({"data": {"score": 90}}), &r, "data"));
    }

    #[test]
    fn equality_is_structural() {
        let r = rule("reason", RuleOperator::Equal, json!("valid_email"));
        assert!(evaluate_rule(
            &json!({"data": {"reason": "valid_email"}}),
            &r,
            "data"
        ));
        assert!(!evaluate_rule(
            &json!({"data": {"reason": "no_mx"}}),
            &r,
            "data"
        ));

        // A number and its string rendering are different values.
        let r = rule("score", RuleOperator::Equal, json!(90));
        assert!(!evaluate_rule(&json!({"data": {"score": "90"}}), &r, "data"));
    }

    #[test]
    fn not_equal_passes_on_mismatch() {
        let r = rule("status", RuleOperator::NotEqual, json!("undeliverable"));
        assert!(evaluate_rule(
            &json!({"data": {"status": "deliverable"}}),
            &r,
            "data"
        ));
    }

    #[test]
    fn in_operator_covers_arrays_and_substrings() {
        let r = rule(
            "status",
            RuleOperator::In,
            json!(["deliverable", "risky"]),
        );
        assert!(evaluate_rule(
            &json!({"data": {"status": "risky"}}),
            &r,
            "data"
        ));
        assert!(!evaluate_rule(
            &json!({"data": {"status": "unknown"}}),
            &r,
            "data"
        ));

        let r = rule("status", RuleOperator::In, json!("ok-deliverable-fine"));
        assert!(evaluate_rule(
            &json!({"data": {"status": "deliverable"}}),
            &r,
            "data"
        ));

        let r = rule("status", RuleOperator::In, json!(42));
        assert!(!evaluate_rule(&json!({"data": {"status": 42}}), &r, "data"));
    }

    #[test]
    fn empty_root_path_resolves_from_the_top() {
        let r = rule("reason", RuleOperator::Equal, json!("valid_email"));
        assert!(evaluate_rule(&json!({"reason": "valid_email"}), &r, ""));
    }

    #[test]
    fn passes_all_is_a_logical_and() {
        let tree = json!({"data": {"score": 90, "reason": "valid_email"}});
        let rules = vec![
            rule("score", RuleOperator::GreaterOrEqual, json!(80)),
            rule("reason", RuleOperator::Equal, json!("valid_email")),
        ];
        assert!(passes_all(&tree, &rules, "data"));

        let rules = vec![
            rule("score", RuleOperator::GreaterOrEqual, json!(80)),
            rule("reason", RuleOperator::Equal, json!("no_mx")),
        ];
        assert!(!passes_all(&tree, &rules, "data"));
    }

    #[test]
    fn empty_rule_list_is_vacuously_valid() {
        assert!(passes_all(&json!({}), &[], "data"));
    }

    #[test]
    fn extract_reason_reads_under_the_root_path() {
        let tree = json!({"data": {"reason": "no_mx"}});
        assert_eq!(extract_reason(&tree, "data"), Some("no_mx".to_string()));
        assert_eq!(extract_reason(&tree, ""), None);
        assert_eq!(extract_reason(&json!({"data": {}}), "data"), None);
        assert_eq!(extract_reason(&json!({"data": {"reason": 7}}), "data"), None);
    }
}
