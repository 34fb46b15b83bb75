//! Alert condition AST and evaluation
//!
//! Conditions are data, not code: four closed variants cover threshold,
//! windowed trend, wildcard pattern, and boolean composition. Evaluation
//! never panics and never errors outward; a missing metric path or an
//! unevaluable comparison makes the condition false.

use crate::history::{Aggregation, MetricHistory};
use crate::models::{lookup_path, MetricSnapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Comparison applied between an extracted value and the rule's target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "matches")]
    Matches,
}

/// How composite sub-conditions combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
}

/// A rule condition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Compare the value at `metric` in the current snapshot
    Threshold {
        metric: String,
        operator: ComparisonOperator,
        value: Value,
    },
    /// Aggregate `metric` across history within `time_window_secs`, then compare
    Trend {
        metric: String,
        operator: ComparisonOperator,
        value: f64,
        time_window_secs: u64,
        aggregation: Aggregation,
    },
    /// Evaluate against every branch matching one `*` segment; true if any matches
    Pattern {
        metric: String,
        operator: ComparisonOperator,
        value: Value,
    },
    /// Combine sub-conditions with AND/OR
    Composite {
        operator: LogicalOperator,
        conditions: Vec<AlertCondition>,
    },
}

impl AlertCondition {
    /// Evaluate against the current snapshot plus history
    ///
    /// Missing values, empty trend windows, and unevaluable comparisons are
    /// all false. Evaluation problems (e.g. an invalid regex) are logged and
    /// treated as false.
    pub fn evaluate(&self, snapshot: &MetricSnapshot, history: &MetricHistory) -> bool {
        match self {
            AlertCondition::Threshold {
                metric,
                operator,
                value,
            } => match snapshot.get(metric) {
                Some(actual) => compare_logged(metric, actual, *operator, value),
                None => false,
            },
            AlertCondition::Trend {
                metric,
                operator,
                value,
                time_window_secs,
                aggregation,
            } => {
                let window = Duration::from_secs(*time_window_secs);
                match history.aggregate(metric, window, *aggregation) {
                    Some(aggregate) => {
                        compare_logged(metric, &Value::from(aggregate), *operator, &Value::from(*value))
                    }
                    None => false,
                }
            }
            AlertCondition::Pattern {
                metric,
                operator,
                value,
            } => expand_wildcard(&snapshot.values, metric)
                .iter()
                .any(|actual| compare_logged(metric, actual, *operator, value)),
            AlertCondition::Composite {
                operator,
                conditions,
            } => match operator {
                LogicalOperator::And => conditions
                    .iter()
                    .all(|c| c.evaluate(snapshot, history)),
                LogicalOperator::Or => conditions
                    .iter()
                    .any(|c| c.evaluate(snapshot, history)),
            },
        }
    }

    /// Validate the condition's static shape
    ///
    /// Run when a rule is registered so bad regexes and malformed wildcards
    /// are rejected up front instead of silently evaluating false forever.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AlertCondition::Threshold {
                operator, value, ..
            } => validate_comparison(*operator, value),
            AlertCondition::Trend { .. } => Ok(()),
            AlertCondition::Pattern {
                metric,
                operator,
                value,
            } => {
                let wildcards = metric.split('.').filter(|s| *s == "*").count();
                if wildcards != 1 {
                    return Err(format!(
                        "pattern path '{}' must contain exactly one '*' segment",
                        metric
                    ));
                }
                validate_comparison(*operator, value)
            }
            AlertCondition::Composite { conditions, .. } => {
                if conditions.is_empty() {
                    return Err("composite condition has no sub-conditions".to_string());
                }
                for condition in conditions {
                    condition.validate()?;
                }
                Ok(())
            }
        }
    }
}

fn validate_comparison(operator: ComparisonOperator, value: &Value) -> Result<(), String> {
    if operator == ComparisonOperator::Matches {
        let pattern = value
            .as_str()
            .ok_or_else(|| "matches operator requires a string pattern".to_string())?;
        Regex::new(pattern).map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
    }
    Ok(())
}

/// Compare two values, logging (and returning false) when unevaluable
fn compare_logged(metric: &str, actual: &Value, operator: ComparisonOperator, expected: &Value) -> bool {
    match compare(actual, operator, expected) {
        Ok(result) => result,
        Err(message) => {
            warn!(metric = %metric, error = %message, "Condition comparison failed");
            false
        }
    }
}

/// Core comparison semantics shared by all condition variants
pub(crate) fn compare(
    actual: &Value,
    operator: ComparisonOperator,
    expected: &Value,
) -> Result<bool, String> {
    match operator {
        ComparisonOperator::GreaterThan
        | ComparisonOperator::LessThan
        | ComparisonOperator::GreaterOrEqual
        | ComparisonOperator::LessOrEqual => {
            let (a, e) = match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(e)) => (a, e),
                _ => return Ok(false),
            };
            Ok(match operator {
                ComparisonOperator::GreaterThan => a > e,
                ComparisonOperator::LessThan => a < e,
                ComparisonOperator::GreaterOrEqual => a >= e,
                ComparisonOperator::LessOrEqual => a <= e,
                _ => unreachable!(),
            })
        }
        ComparisonOperator::Equal | ComparisonOperator::NotEqual => {
            // Numeric equality tolerates integer/float representation differences
            let equal = match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(e)) => a == e,
                _ => actual == expected,
            };
            Ok(if operator == ComparisonOperator::Equal {
                equal
            } else {
                !equal
            })
        }
        ComparisonOperator::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle)),
            (Value::Array(items), needle) => Ok(items.contains(needle)),
            _ => Ok(false),
        },
        ComparisonOperator::Matches => {
            let haystack = match actual.as_str() {
                Some(s) => s,
                None => return Ok(false),
            };
            let pattern = expected
                .as_str()
                .ok_or_else(|| "matches operator requires a string pattern".to_string())?;
            let regex = Regex::new(pattern).map_err(|e| format!("invalid regex: {}", e))?;
            Ok(regex.is_match(haystack))
        }
    }
}

/// Resolve a path with one `*` segment against every matching branch
fn expand_wildcard<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let star = match segments.iter().position(|s| *s == "*") {
        Some(i) => i,
        None => return lookup_path(root, path).into_iter().collect(),
    };

    let prefix = segments[..star].join(".");
    let suffix = segments[star + 1..].join(".");

    let branch_root = if prefix.is_empty() {
        root
    } else {
        match lookup_path(root, &prefix) {
            Some(v) => v,
            None => return Vec::new(),
        }
    };

    let branches = match branch_root.as_object() {
        Some(map) => map,
        None => return Vec::new(),
    };

    branches
        .values()
        .filter_map(|branch| {
            if suffix.is_empty() {
                Some(branch)
            } else {
                lookup_path(branch, &suffix)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_history() -> MetricHistory {
        MetricHistory::new(10)
    }

    fn snapshot(values: Value) -> MetricSnapshot {
        MetricSnapshot::new(values)
    }

    fn threshold(metric: &str, operator: ComparisonOperator, value: Value) -> AlertCondition {
        AlertCondition::Threshold {
            metric: metric.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_threshold_fires_above_value() {
        let condition = threshold(
            "performance.memoryUsage",
            ComparisonOperator::GreaterThan,
            json!(150),
        );
        let history = empty_history();

        let high = snapshot(json!({ "performance": { "memoryUsage": 200 } }));
        let low = snapshot(json!({ "performance": { "memoryUsage": 100 } }));

        assert!(condition.evaluate(&high, &history));
        assert!(!condition.evaluate(&low, &history));
    }

    #[test]
    fn test_threshold_missing_path_is_false() {
        let condition = threshold(
            "performance.memoryUsage",
            ComparisonOperator::GreaterThan,
            json!(150),
        );
        let history = empty_history();

        let empty = snapshot(json!({}));
        let null = snapshot(json!({ "performance": null }));

        assert!(!condition.evaluate(&empty, &history));
        assert!(!condition.evaluate(&null, &history));
    }

    #[test]
    fn test_threshold_operators() {
        let history = empty_history();
        let snap = snapshot(json!({ "v": 5 }));

        let cases = [
            (ComparisonOperator::GreaterOrEqual, json!(5), true),
            (ComparisonOperator::LessOrEqual, json!(5), true),
            (ComparisonOperator::LessThan, json!(5), false),
            (ComparisonOperator::Equal, json!(5.0), true),
            (ComparisonOperator::NotEqual, json!(6), true),
        ];

        for (operator, value, expected) in cases {
            let condition = threshold("v", operator, value);
            assert_eq!(condition.evaluate(&snap, &history), expected, "{:?}", operator);
        }
    }

    #[test]
    fn test_contains_and_matches() {
        let history = empty_history();
        let snap = snapshot(json!({ "status": { "message": "connection timeout at gateway" } }));

        let contains = threshold(
            "status.message",
            ComparisonOperator::Contains,
            json!("timeout"),
        );
        assert!(contains.evaluate(&snap, &history));

        let matches = threshold(
            "status.message",
            ComparisonOperator::Matches,
            json!("^connection (timeout|refused)"),
        );
        assert!(matches.evaluate(&snap, &history));
    }

    #[test]
    fn test_bad_regex_is_false_not_panic() {
        let history = empty_history();
        let snap = snapshot(json!({ "status": "ok" }));

        let condition = threshold("status", ComparisonOperator::Matches, json!("[unclosed"));
        assert!(!condition.evaluate(&snap, &history));
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let condition = threshold("status", ComparisonOperator::Matches, json!("[unclosed"));
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_trend_over_history() {
        let mut history = MetricHistory::new(10);
        for mb in [100.0, 200.0, 300.0] {
            history.push(snapshot(json!({ "performance": { "memoryUsage": mb } })));
        }

        let condition = AlertCondition::Trend {
            metric: "performance.memoryUsage".to_string(),
            operator: ComparisonOperator::GreaterThan,
            value: 150.0,
            time_window_secs: 60,
            aggregation: Aggregation::Avg,
        };

        // avg = 200 > 150
        assert!(condition.evaluate(&snapshot(json!({})), &history));
    }

    #[test]
    fn test_trend_empty_window_is_false() {
        let history = empty_history();
        let condition = AlertCondition::Trend {
            metric: "performance.memoryUsage".to_string(),
            operator: ComparisonOperator::GreaterThan,
            value: 0.0,
            time_window_secs: 60,
            aggregation: Aggregation::Avg,
        };

        assert!(!condition.evaluate(&snapshot(json!({})), &history));
    }

    #[test]
    fn test_pattern_any_branch_matches() {
        let history = empty_history();
        let snap = snapshot(json!({
            "contexts": {
                "ui": { "healthy": true },
                "worker": { "healthy": false }
            }
        }));

        let condition = AlertCondition::Pattern {
            metric: "contexts.*.healthy".to_string(),
            operator: ComparisonOperator::Equal,
            value: json!(false),
        };

        // The worker branch matches, so the condition is true
        assert!(condition.evaluate(&snap, &history));
    }

    #[test]
    fn test_pattern_no_branch_matches() {
        let history = empty_history();
        let snap = snapshot(json!({
            "contexts": {
                "ui": { "healthy": true },
                "worker": { "healthy": true }
            }
        }));

        let condition = AlertCondition::Pattern {
            metric: "contexts.*.healthy".to_string(),
            operator: ComparisonOperator::Equal,
            value: json!(false),
        };

        assert!(!condition.evaluate(&snap, &history));
    }

    #[test]
    fn test_pattern_missing_prefix_is_false() {
        let history = empty_history();
        let snap = snapshot(json!({}));

        let condition = AlertCondition::Pattern {
            metric: "contexts.*.healthy".to_string(),
            operator: ComparisonOperator::Equal,
            value: json!(false),
        };

        assert!(!condition.evaluate(&snap, &history));
    }

    #[test]
    fn test_pattern_validation_requires_single_wildcard() {
        let none = AlertCondition::Pattern {
            metric: "contexts.ui.healthy".to_string(),
            operator: ComparisonOperator::Equal,
            value: json!(false),
        };
        let two = AlertCondition::Pattern {
            metric: "*.ui.*".to_string(),
            operator: ComparisonOperator::Equal,
            value: json!(false),
        };

        assert!(none.validate().is_err());
        assert!(two.validate().is_err());
    }

    #[test]
    fn test_composite_or() {
        let history = empty_history();
        let condition = AlertCondition::Composite {
            operator: LogicalOperator::Or,
            conditions: vec![
                threshold("x", ComparisonOperator::GreaterThan, json!(5)),
                threshold("y", ComparisonOperator::GreaterThan, json!(5)),
            ],
        };

        let one_high = snapshot(json!({ "x": 10, "y": 0 }));
        let both_low = snapshot(json!({ "x": 0, "y": 0 }));

        assert!(condition.evaluate(&one_high, &history));
        assert!(!condition.evaluate(&both_low, &history));
    }

    #[test]
    fn test_composite_and() {
        let history = empty_history();
        let condition = AlertCondition::Composite {
            operator: LogicalOperator::And,
            conditions: vec![
                threshold("x", ComparisonOperator::GreaterThan, json!(5)),
                threshold("y", ComparisonOperator::GreaterThan, json!(5)),
            ],
        };

        assert!(condition.evaluate(&snapshot(json!({ "x": 10, "y": 10 })), &history));
        assert!(!condition.evaluate(&snapshot(json!({ "x": 10, "y": 0 })), &history));
    }

    #[test]
    fn test_composite_validation_rejects_empty() {
        let condition = AlertCondition::Composite {
            operator: LogicalOperator::And,
            conditions: vec![],
        };
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_condition_serde_roundtrip() {
        let condition = AlertCondition::Composite {
            operator: LogicalOperator::Or,
            conditions: vec![
                threshold(
                    "performance.memoryUsage",
                    ComparisonOperator::GreaterThan,
                    json!(150),
                ),
                AlertCondition::Trend {
                    metric: "checks.failureRate".to_string(),
                    operator: ComparisonOperator::GreaterOrEqual,
                    value: 0.5,
                    time_window_secs: 300,
                    aggregation: Aggregation::Avg,
                },
            ],
        };

        let json = serde_json::to_string(&condition).unwrap();
        let restored: AlertCondition = serde_json::from_str(&json).unwrap();

        let history = empty_history();
        let snap = snapshot(json!({ "performance": { "memoryUsage": 200 } }));
        assert_eq!(
            condition.evaluate(&snap, &history),
            restored.evaluate(&snap, &history)
        );
    }
}
