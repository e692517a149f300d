//! Routing rules: conditions that decide which workflow governs a validation
//!
//! Templates carry a flat list of [`RoutingRule`]s. Rules may name a logical
//! group and an `And`/`Or` combinator; [`ConditionTree::compile`] turns the
//! flat list into an explicit tree once, at template load time, so that
//! evaluation never has to guess at the intended composition.

use crate::{ApprovalError, ApprovalResult};
use serde::{Deserialize, Serialize};

/// The validation attribute a condition inspects
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    ErrorCount,
    WarningCount,
    FileType,
    FileSize,
    RecordCount,
    ValidationStatus,
    /// Anything the loader did not recognise. Never matches.
    #[serde(other)]
    Unknown,
}

/// Comparison applied between the inspected attribute and the rule value
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    In,
    NotIn,
    /// Anything the loader did not recognise. Never matches.
    #[serde(other)]
    Unknown,
}

impl ConditionOperator {
    /// Operators that compare both operands as numbers
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::GreaterThanOrEqual | Self::LessThan | Self::LessThanOrEqual
        )
    }
}

/// How the rules of one logical group combine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GroupCombinator {
    And,
    #[default]
    Or,
}

/// Logical grouping metadata attached to a rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default)]
    pub combinator: GroupCombinator,
}

/// A single routing condition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub condition_type: ConditionType,
    pub operator: ConditionOperator,
    /// Comparison value. Comma-separated for `In`/`NotIn`.
    pub value: String,
    /// Lower is evaluated first
    #[serde(default)]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<RuleGroup>,
}

impl RoutingRule {
    pub fn new(
        condition_type: ConditionType,
        operator: ConditionOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            operator,
            value: value.into(),
            priority: 0,
            group: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_group(mut self, name: impl Into<String>, combinator: GroupCombinator) -> Self {
        self.group = Some(RuleGroup {
            name: name.into(),
            combinator,
        });
        self
    }
}

/// Explicit composition of routing conditions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConditionTree {
    Leaf(RoutingRule),
    /// Every child must hold. An empty `All` holds.
    All(Vec<ConditionTree>),
    /// At least one child must hold. An empty `Any` does not hold.
    Any(Vec<ConditionTree>),
}

impl ConditionTree {
    /// Compile a flat rule list into a tree.
    ///
    /// Rules are ordered by ascending priority. Ungrouped rules become
    /// independent alternatives. Rules sharing a group name are collected
    /// under that group's combinator, and each group is one alternative.
    /// A group whose rules disagree on the combinator is a configuration
    /// error.
    pub fn compile(rules: &[RoutingRule]) -> ApprovalResult<Self> {
        let mut ordered: Vec<&RoutingRule> = rules.iter().collect();
        ordered.sort_by_key(|r| r.priority);

        let mut alternatives: Vec<Alternative> = Vec::new();
        for rule in ordered {
            match &rule.group {
                None => alternatives.push(Alternative::Single(rule.clone())),
                Some(group) => {
                    let existing = alternatives.iter_mut().find_map(|alt| match alt {
                        Alternative::Group {
                            name, combinator, rules,
                        } if name == &group.name => Some((combinator, rules)),
                        _ => None,
                    });
                    match existing {
                        Some((combinator, members)) => {
                            if *combinator != group.combinator {
                                return Err(ApprovalError::ConfigurationError(format!(
                                    "routing group '{}' mixes And and Or rules",
                                    group.name
                                )));
                            }
                            members.push(ConditionTree::Leaf(rule.clone()));
                        }
                        None => alternatives.push(Alternative::Group {
                            name: group.name.clone(),
                            combinator: group.combinator,
                            rules: vec![ConditionTree::Leaf(rule.clone())],
                        }),
                    }
                }
            }
        }

        Ok(ConditionTree::Any(
            alternatives.into_iter().map(Alternative::into_tree).collect(),
        ))
    }

    /// Number of leaf conditions in the tree
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::All(children) | Self::Any(children) => {
                children.iter().map(ConditionTree::leaf_count).sum()
            }
        }
    }
}

enum Alternative {
    Single(RoutingRule),
    Group {
        name: String,
        combinator: GroupCombinator,
        rules: Vec<ConditionTree>,
    },
}

impl Alternative {
    fn into_tree(self) -> ConditionTree {
        match self {
            Self::Single(rule) => ConditionTree::Leaf(rule),
            Self::Group {
                combinator: GroupCombinator::And,
                rules,
                ..
            } => ConditionTree::All(rules),
            Self::Group {
                combinator: GroupCombinator::Or,
                rules,
                ..
            } => ConditionTree::Any(rules),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors_over(n: u32) -> RoutingRule {
        RoutingRule::new(
            ConditionType::ErrorCount,
            ConditionOperator::GreaterThan,
            n.to_string(),
        )
    }

    #[test]
    fn test_compile_ungrouped_rules_are_alternatives() {
        let rules = vec![
            errors_over(10).with_priority(2),
            RoutingRule::new(ConditionType::FileType, ConditionOperator::Equals, "csv")
                .with_priority(1),
        ];
        let tree = ConditionTree::compile(&rules).unwrap();
        match tree {
            ConditionTree::Any(children) => {
                assert_eq!(children.len(), 2);
                // Priority 1 first
                assert!(matches!(
                    &children[0],
                    ConditionTree::Leaf(r) if r.condition_type == ConditionType::FileType
                ));
            }
            other => panic!("expected Any, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_and_group() {
        let rules = vec![
            errors_over(5).in_group("strict", GroupCombinator::And),
            RoutingRule::new(ConditionType::FileType, ConditionOperator::Equals, "xml")
                .in_group("strict", GroupCombinator::And),
            errors_over(100),
        ];
        let tree = ConditionTree::compile(&rules).unwrap();
        assert_eq!(tree.leaf_count(), 3);
        match tree {
            ConditionTree::Any(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[0], ConditionTree::All(g) if g.len() == 2));
            }
            other => panic!("expected Any, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_rejects_mixed_group() {
        let rules = vec![
            errors_over(5).in_group("g", GroupCombinator::And),
            errors_over(6).in_group("g", GroupCombinator::Or),
        ];
        let result = ConditionTree::compile(&rules);
        assert!(matches!(result, Err(ApprovalError::ConfigurationError(_))));
    }

    #[test]
    fn test_compile_empty() {
        let tree = ConditionTree::compile(&[]).unwrap();
        assert_eq!(tree, ConditionTree::Any(vec![]));
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn test_unknown_condition_type_deserializes() {
        let json = r#"{"condition_type":"Checksum","operator":"Equals","value":"x"}"#;
        let rule: RoutingRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.condition_type, ConditionType::Unknown);
        assert_eq!(rule.priority, 0);
        assert!(rule.group.is_none());
    }

    #[test]
    fn test_numeric_operators() {
        assert!(ConditionOperator::GreaterThan.is_numeric());
        assert!(ConditionOperator::LessThanOrEqual.is_numeric());
        assert!(!ConditionOperator::Equals.is_numeric());
        assert!(!ConditionOperator::In.is_numeric());
    }
}
