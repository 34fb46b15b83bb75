//! Default alert rules derived from the configured thresholds

use crate::config::AlertThresholds;
use serde_json::json;
use vigil_lib::alerts::{
    ActionKind, AlertAction, AlertCondition, AlertRule, ComparisonOperator,
};
use vigil_lib::history::Aggregation;
use vigil_lib::models::Severity;

/// Build the rule set seeded into a fresh engine
pub fn default_rules(thresholds: &AlertThresholds) -> Vec<AlertRule> {
    let notify = || AlertAction {
        kind: ActionKind::Notification,
        enabled: true,
        delay_ms: None,
        params: json!({}),
    };

    vec![
        AlertRule {
            id: "default-failure-rate".to_string(),
            name: "Check failure rate above threshold".to_string(),
            severity: Severity::Error,
            condition: AlertCondition::Threshold {
                metric: "checks.failureRate".to_string(),
                operator: ComparisonOperator::GreaterThan,
                value: json!(thresholds.failure_rate),
            },
            cooldown_secs: 300,
            enabled: true,
            actions: vec![notify()],
            recovery_actions: vec!["inspect the failing scenarios".to_string()],
        },
        AlertRule {
            id: "default-slow-checks".to_string(),
            name: "Check execution time above threshold".to_string(),
            severity: Severity::Warning,
            condition: AlertCondition::Threshold {
                metric: "checks.maxExecutionTimeMs".to_string(),
                operator: ComparisonOperator::GreaterThan,
                value: json!(thresholds.execution_time_ms),
            },
            cooldown_secs: 300,
            enabled: true,
            actions: vec![notify()],
            recovery_actions: Vec::new(),
        },
        AlertRule {
            id: "default-high-memory".to_string(),
            name: "Average memory usage above threshold".to_string(),
            severity: Severity::Critical,
            condition: AlertCondition::Trend {
                metric: "performance.memoryUsage".to_string(),
                operator: ComparisonOperator::GreaterThan,
                value: thresholds.memory_usage_mb,
                time_window_secs: 300,
                aggregation: Aggregation::Avg,
            },
            cooldown_secs: 600,
            enabled: true,
            actions: vec![
                notify(),
                AlertAction {
                    kind: ActionKind::Escalation,
                    enabled: true,
                    delay_ms: None,
                    params: json!({}),
                },
            ],
            recovery_actions: vec!["restart the monitored target".to_string()],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_rules_are_valid() {
        let rules = default_rules(&AlertThresholds::default());

        assert_eq!(rules.len(), 3);
        for rule in &rules {
            assert!(rule.condition.validate().is_ok(), "rule {} invalid", rule.id);
            assert!(rule.enabled);
            assert!(rule.cooldown_secs > 0);
        }
    }

    #[test]
    fn test_default_rule_ids_are_unique() {
        let rules = default_rules(&AlertThresholds::default());
        let ids: HashSet<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), rules.len());
    }

    #[test]
    fn test_thresholds_flow_into_conditions() {
        let thresholds = AlertThresholds {
            failure_rate: 0.25,
            execution_time_ms: 1000,
            memory_usage_mb: 256.0,
        };
        let rules = default_rules(&thresholds);

        match &rules[0].condition {
            AlertCondition::Threshold { value, .. } => assert_eq!(value, &json!(0.25)),
            other => panic!("unexpected condition: {:?}", other),
        }
        match &rules[2].condition {
            AlertCondition::Trend { value, .. } => assert_eq!(*value, 256.0),
            other => panic!("unexpected condition: {:?}", other),
        }
    }
}
