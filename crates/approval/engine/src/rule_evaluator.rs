//! Rule evaluator: checks routing conditions against a validation snapshot
//!
//! Evaluation is a pure function. It never fails: an unknown condition type,
//! an unknown operator, or a numeric comparison whose operands do not parse
//! all evaluate to "no match", so that one bad rule cannot stop routing for
//! the rest of a tenant.

use approval_types::{ConditionOperator, ConditionTree, RoutingRule, ValidationSnapshot};

/// Evaluates routing rules and compiled condition trees
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a single rule against a snapshot
    pub fn evaluate(&self, rule: &RoutingRule, snapshot: &ValidationSnapshot) -> bool {
        let Some(actual) = snapshot.field(&rule.condition_type) else {
            tracing::debug!(condition = ?rule.condition_type, "Unknown condition type, no match");
            return false;
        };
        let expected = rule.value.trim();
        let actual = actual.trim();

        match rule.operator {
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::NotEquals => actual != expected,
            ConditionOperator::Contains => actual.contains(expected),
            ConditionOperator::In => Self::in_set(actual, expected),
            ConditionOperator::NotIn => !Self::in_set(actual, expected),
            ConditionOperator::GreaterThan
            | ConditionOperator::GreaterThanOrEqual
            | ConditionOperator::LessThan
            | ConditionOperator::LessThanOrEqual => {
                self.compare_numeric(&rule.operator, actual, expected)
            }
            ConditionOperator::Unknown => {
                tracing::debug!(value = %rule.value, "Unknown operator, no match");
                false
            }
        }
    }

    /// Evaluate a compiled condition tree
    pub fn evaluate_tree(&self, tree: &ConditionTree, snapshot: &ValidationSnapshot) -> bool {
        match tree {
            ConditionTree::Leaf(rule) => self.evaluate(rule, snapshot),
            ConditionTree::All(children) => {
                children.iter().all(|c| self.evaluate_tree(c, snapshot))
            }
            ConditionTree::Any(children) => {
                children.iter().any(|c| self.evaluate_tree(c, snapshot))
            }
        }
    }

    /// Evaluate a compiled tree and report how strongly it matched.
    ///
    /// Returns the lowest priority number among the conditions that made
    /// the tree hold, or `None` when it does not hold. A group that holds
    /// counts with its best member; alternatives that failed do not count.
    pub fn matched_priority(&self, tree: &ConditionTree, snapshot: &ValidationSnapshot) -> Option<u32> {
        match tree {
            ConditionTree::Leaf(rule) => self.evaluate(rule, snapshot).then_some(rule.priority),
            ConditionTree::All(children) => {
                let priorities = children
                    .iter()
                    .map(|c| self.matched_priority(c, snapshot))
                    .collect::<Option<Vec<u32>>>()?;
                Some(priorities.into_iter().min().unwrap_or(u32::MAX))
            }
            ConditionTree::Any(children) => children
                .iter()
                .filter_map(|c| self.matched_priority(c, snapshot))
                .min(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn compare_numeric(&self, operator: &ConditionOperator, actual: &str, expected: &str) -> bool {
        let (Ok(lhs), Ok(rhs)) = (actual.parse::<f64>(), expected.parse::<f64>()) else {
            tracing::debug!(actual, expected, "Non-numeric operand, no match");
            return false;
        };
        match operator {
            ConditionOperator::GreaterThan => lhs > rhs,
            ConditionOperator::GreaterThanOrEqual => lhs >= rhs,
            ConditionOperator::LessThan => lhs < rhs,
            ConditionOperator::LessThanOrEqual => lhs <= rhs,
            _ => false,
        }
    }

    fn in_set(actual: &str, set: &str) -> bool {
        set.split(',').map(str::trim).any(|member| member == actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{ConditionType, GroupCombinator, TenantId};

    fn snapshot(errors: u64) -> ValidationSnapshot {
        ValidationSnapshot::new("v-1", TenantId::new("acme"))
            .with_errors(errors)
            .with_warnings(3)
            .with_file("csv", 4096)
            .with_records(1200)
            .with_status("Failed")
    }

    fn rule(condition: ConditionType, op: ConditionOperator, value: &str) -> RoutingRule {
        RoutingRule::new(condition, op, value)
    }

    #[test]
    fn test_error_count_greater_than() {
        let eval = RuleEvaluator::new();
        let r = rule(ConditionType::ErrorCount, ConditionOperator::GreaterThan, "5");
        assert!(eval.evaluate(&r, &snapshot(10)));
        assert!(!eval.evaluate(&r, &snapshot(3)));
        assert!(!eval.evaluate(&r, &snapshot(5)));
    }

    #[test]
    fn test_numeric_boundaries() {
        let eval = RuleEvaluator::new();
        let s = snapshot(5);
        let ge = rule(ConditionType::ErrorCount, ConditionOperator::GreaterThanOrEqual, "5");
        let lt = rule(ConditionType::ErrorCount, ConditionOperator::LessThan, "5");
        let le = rule(ConditionType::ErrorCount, ConditionOperator::LessThanOrEqual, "5");
        assert!(eval.evaluate(&ge, &s));
        assert!(!eval.evaluate(&lt, &s));
        assert!(eval.evaluate(&le, &s));

        let size = rule(ConditionType::FileSize, ConditionOperator::GreaterThan, "1024.5");
        assert!(eval.evaluate(&size, &s));
    }

    #[test]
    fn test_unparseable_numeric_is_no_match() {
        let eval = RuleEvaluator::new();
        let s = snapshot(10);
        for op in [
            ConditionOperator::GreaterThan,
            ConditionOperator::GreaterThanOrEqual,
            ConditionOperator::LessThan,
            ConditionOperator::LessThanOrEqual,
        ] {
            let r = rule(ConditionType::ErrorCount, op.clone(), "lots");
            assert!(!eval.evaluate(&r, &s), "{op:?} with bad operand matched");
        }
        // A text field compared numerically
        let r = rule(ConditionType::FileType, ConditionOperator::LessThan, "10");
        assert!(!eval.evaluate(&r, &s));
    }

    #[test]
    fn test_string_operators() {
        let eval = RuleEvaluator::new();
        let s = snapshot(1);
        assert!(eval.evaluate(
            &rule(ConditionType::FileType, ConditionOperator::Equals, "csv"),
            &s
        ));
        assert!(eval.evaluate(
            &rule(ConditionType::ValidationStatus, ConditionOperator::NotEquals, "Passed"),
            &s
        ));
        assert!(eval.evaluate(
            &rule(ConditionType::ValidationStatus, ConditionOperator::Contains, "Fail"),
            &s
        ));
        assert!(eval.evaluate(
            &rule(ConditionType::FileType, ConditionOperator::In, "xlsx, csv ,json"),
            &s
        ));
        assert!(!eval.evaluate(
            &rule(ConditionType::FileType, ConditionOperator::NotIn, "xlsx,csv"),
            &s
        ));
        assert!(eval.evaluate(
            &rule(ConditionType::RecordCount, ConditionOperator::Equals, "1200"),
            &s
        ));
    }

    #[test]
    fn test_unknown_type_and_operator_never_match() {
        let eval = RuleEvaluator::new();
        let s = snapshot(10);
        assert!(!eval.evaluate(
            &rule(ConditionType::Unknown, ConditionOperator::NotEquals, "x"),
            &s
        ));
        assert!(!eval.evaluate(
            &rule(ConditionType::ErrorCount, ConditionOperator::Unknown, "10"),
            &s
        ));

        let parsed: RoutingRule = serde_json::from_str(
            r#"{"condition_type": "Sentiment", "operator": "Matches", "value": "x"}"#,
        )
        .unwrap();
        assert!(!eval.evaluate(&parsed, &s));
    }

    #[test]
    fn test_condition_tree_composition() {
        let eval = RuleEvaluator::new();
        let rules = vec![
            rule(ConditionType::ErrorCount, ConditionOperator::GreaterThan, "5")
                .in_group("big-csv", GroupCombinator::And),
            rule(ConditionType::FileType, ConditionOperator::Equals, "csv")
                .in_group("big-csv", GroupCombinator::And),
            rule(ConditionType::WarningCount, ConditionOperator::GreaterThan, "100"),
        ];
        let tree = ConditionTree::compile(&rules).unwrap();

        assert!(eval.evaluate_tree(&tree, &snapshot(10)));
        // The And group fails on error count and the warning rule fails too
        assert!(!eval.evaluate_tree(&tree, &snapshot(2)));

        let xlsx = snapshot(10).with_file("xlsx", 10);
        assert!(!eval.evaluate_tree(&tree, &xlsx));
        assert!(eval.evaluate_tree(&tree, &xlsx.with_warnings(500)));
    }

    #[test]
    fn test_matched_priority_ignores_failed_alternatives() {
        let eval = RuleEvaluator::new();
        let rules = vec![
            rule(ConditionType::ErrorCount, ConditionOperator::GreaterThan, "50").with_priority(1),
            rule(ConditionType::FileType, ConditionOperator::Equals, "csv")
                .with_priority(4)
                .in_group("csv", GroupCombinator::And),
            rule(ConditionType::RecordCount, ConditionOperator::GreaterThan, "1000")
                .with_priority(7)
                .in_group("csv", GroupCombinator::And),
            rule(ConditionType::WarningCount, ConditionOperator::GreaterThan, "0").with_priority(9),
        ];
        let tree = ConditionTree::compile(&rules).unwrap();

        assert_eq!(eval.matched_priority(&tree, &snapshot(100)), Some(1));
        assert_eq!(eval.matched_priority(&tree, &snapshot(10)), Some(4));
        let small = snapshot(10).with_records(10);
        assert_eq!(eval.matched_priority(&tree, &small), Some(9));
        assert_eq!(eval.matched_priority(&tree, &small.with_warnings(0)), None);
    }

    #[test]
    fn test_empty_tree_does_not_match() {
        let eval = RuleEvaluator::new();
        let tree = ConditionTree::compile(&[]).unwrap();
        assert!(!eval.evaluate_tree(&tree, &snapshot(100)));
        assert!(eval.evaluate_tree(&ConditionTree::All(vec![]), &snapshot(100)));
    }
}
