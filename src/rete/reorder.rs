//! Condition reordering and structural validation.
//!
//! A rule is matchable left to right when every positive condition's
//! identifier is either a literal, a goal/impasse root, or bound by an
//! earlier condition. Negations go last and may only test identifiers bound
//! by positives. Actions may use unbound variables as values (they create new
//! identifiers), but their identifier and attribute must be bound or created
//! by another action.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use super::Action;
use crate::causal::{Condition, Test};
use crate::registry::SymbolTable;
use crate::symbol::SymbolId;

/// One reason a rule cannot be matched.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ValidationIssue {
    #[error("rule has no positive conditions")]
    NoPositiveConditions,
    #[error("condition {index} is not connected to a goal or an earlier binding")]
    UnconnectedCondition { index: usize },
    #[error("negated condition {index} tests unbound identifier {variable}")]
    UnboundNegation { index: usize, variable: String },
    #[error("condition {index} compares against unbound {variable}")]
    UnboundRelational { index: usize, variable: String },
    #[error("action {index} has unbound identifier {variable}")]
    UnboundActionId { index: usize, variable: String },
    #[error("action {index} has unbound attribute {variable}")]
    UnboundActionAttr { index: usize, variable: String },
}

/// Side-channel payload of a failed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Order positives greedily by connectivity, then negations in their original order.
pub fn reorder_and_validate(
    table: &SymbolTable,
    conditions: &[Condition],
    actions: &[Action],
) -> Result<Vec<usize>, ValidationReport> {
    let mut issues = Vec::new();
    let mut bound: HashSet<SymbolId> = HashSet::new();
    let mut order = Vec::with_capacity(conditions.len());

    let mut remaining: Vec<usize> = conditions
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_positive())
        .map(|(i, _)| i)
        .collect();
    if remaining.is_empty() {
        issues.push(ValidationIssue::NoPositiveConditions);
    }

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|&i| is_connected(table, &conditions[i], &bound));
        match next {
            Some(pos) => {
                let i = remaining.remove(pos);
                bind_equalities(table, &conditions[i], &mut bound);
                order.push(i);
            }
            None => {
                issues.extend(
                    remaining
                        .drain(..)
                        .map(|index| ValidationIssue::UnconnectedCondition { index }),
                );
            }
        }
    }

    for &i in &order {
        check_relations(table, &conditions[i], i, &bound, &mut issues);
    }

    for (i, cond) in conditions.iter().enumerate() {
        match cond {
            Condition::Positive { .. } => {}
            Condition::Negative { .. } => {
                check_negation(table, cond, i, &bound, &mut issues);
                order.push(i);
            }
            Condition::Conjunctive(inner) => {
                let mut local = bound.clone();
                for c in inner {
                    check_negation(table, c, i, &local, &mut issues);
                    if c.is_positive() {
                        bind_equalities(table, c, &mut local);
                    }
                }
                order.push(i);
            }
        }
    }

    let created: HashSet<SymbolId> = actions
        .iter()
        .flat_map(|a| std::iter::once(a.value).chain(a.referent))
        .filter(|s| table.is_variable(*s) && !bound.contains(s))
        .collect();
    for (index, action) in actions.iter().enumerate() {
        let known = |s: SymbolId| !table.is_variable(s) || bound.contains(&s) || created.contains(&s);
        if !known(action.id) {
            issues.push(ValidationIssue::UnboundActionId {
                index,
                variable: table.label(action.id),
            });
        }
        if !known(action.attr) {
            issues.push(ValidationIssue::UnboundActionAttr {
                index,
                variable: table.label(action.attr),
            });
        }
    }

    if issues.is_empty() {
        Ok(order)
    } else {
        Err(ValidationReport { issues })
    }
}

fn is_connected(table: &SymbolTable, cond: &Condition, bound: &HashSet<SymbolId>) -> bool {
    let Some(pattern) = cond.pattern() else {
        return false;
    };
    if pattern.id.goal || pattern.id.impasse {
        return true;
    }
    match pattern.id.equality_symbol() {
        Some(id) => !table.is_variable(id) || bound.contains(&id),
        None => false,
    }
}

fn bind_equalities(table: &SymbolTable, cond: &Condition, bound: &mut HashSet<SymbolId>) {
    if let Some(pattern) = cond.pattern() {
        for test in pattern.tests() {
            if let Some(s) = test.equality_symbol() {
                if table.is_variable(s) {
                    bound.insert(s);
                }
            }
        }
    }
}

fn unbound_referents<'a>(
    table: &'a SymbolTable,
    test: &'a Test,
    bound: &'a HashSet<SymbolId>,
) -> impl Iterator<Item = SymbolId> + 'a {
    test.relations
        .iter()
        .map(|r| r.term.symbol)
        .filter(move |s| table.is_variable(*s) && !bound.contains(s))
}

fn check_relations(
    table: &SymbolTable,
    cond: &Condition,
    index: usize,
    bound: &HashSet<SymbolId>,
    issues: &mut Vec<ValidationIssue>,
) {
    if let Some(pattern) = cond.pattern() {
        for test in pattern.tests() {
            for s in unbound_referents(table, test, bound) {
                issues.push(ValidationIssue::UnboundRelational {
                    index,
                    variable: table.label(s),
                });
            }
        }
    }
}

fn check_negation(
    table: &SymbolTable,
    cond: &Condition,
    index: usize,
    bound: &HashSet<SymbolId>,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(pattern) = cond.pattern() else {
        return;
    };
    if let Some(id) = pattern.id.equality_symbol() {
        if table.is_variable(id) && !bound.contains(&id) && !pattern.id.goal && !pattern.id.impasse {
            issues.push(ValidationIssue::UnboundNegation {
                index,
                variable: table.label(id),
            });
        }
    }
    check_relations(table, cond, index, bound, issues);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::{Backtrace, Pattern, PreferenceKind, Relation};

    fn pos(id: SymbolId, attr: SymbolId, value: SymbolId) -> Condition {
        Condition::positive(Pattern::eq(id, attr, value), Backtrace::default())
    }

    fn goal_pos(id: SymbolId, attr: SymbolId, value: SymbolId) -> Condition {
        let mut pattern = Pattern::eq(id, attr, value);
        pattern.id.goal = true;
        Condition::positive(pattern, Backtrace::default())
    }

    #[test]
    fn orders_by_connectivity() {
        let t = SymbolTable::new();
        let s = t.variable("s1").unwrap();
        let b = t.variable("b1").unwrap();
        let on = t.str_constant("on").unwrap();
        let color = t.str_constant("color").unwrap();
        let red = t.str_constant("red").unwrap();
        let conds = vec![pos(b, color, red), goal_pos(s, on, b)];
        let order = reorder_and_validate(&t, &conds, &[]).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn unconnected_condition_is_rejected() {
        let t = SymbolTable::new();
        let s = t.variable("s1").unwrap();
        let x = t.variable("x1").unwrap();
        let a = t.str_constant("a").unwrap();
        let conds = vec![goal_pos(s, a, a), pos(x, a, a)];
        let report = reorder_and_validate(&t, &conds, &[]).unwrap_err();
        assert_eq!(
            report.issues,
            vec![ValidationIssue::UnconnectedCondition { index: 1 }]
        );
    }

    #[test]
    fn ground_conditions_always_validate() {
        let t = SymbolTable::new();
        let s1 = t.make_identifier('S').unwrap();
        let x1 = t.make_identifier('X').unwrap();
        let a = t.str_constant("a").unwrap();
        let conds = vec![
            pos(x1, a, a),
            pos(s1, a, x1),
            Condition::negative(Pattern::eq(x1, a, s1)),
        ];
        let actions = [Action {
            kind: PreferenceKind::Acceptable,
            id: s1,
            attr: a,
            value: x1,
            referent: None,
        }];
        assert_eq!(reorder_and_validate(&t, &conds, &actions).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn negation_needs_bound_identifier() {
        let t = SymbolTable::new();
        let s = t.variable("s1").unwrap();
        let y = t.variable("y1").unwrap();
        let a = t.str_constant("a").unwrap();
        let conds = vec![goal_pos(s, a, a), Condition::negative(Pattern::eq(y, a, a))];
        let report = reorder_and_validate(&t, &conds, &[]).unwrap_err();
        assert!(matches!(
            report.issues[0],
            ValidationIssue::UnboundNegation { index: 1, .. }
        ));
    }

    #[test]
    fn relational_referent_must_be_bound() {
        let t = SymbolTable::new();
        let s = t.variable("s1").unwrap();
        let c = t.variable("c1").unwrap();
        let a = t.str_constant("a").unwrap();
        let five = t.int_constant(5).unwrap();
        let mut pattern = Pattern::eq(s, a, five);
        pattern.id.goal = true;
        pattern.value = pattern.value.with_relation(Relation::Less, c);
        let conds = vec![Condition::positive(pattern, Backtrace::default())];
        let report = reorder_and_validate(&t, &conds, &[]).unwrap_err();
        assert!(matches!(
            report.issues[0],
            ValidationIssue::UnboundRelational { index: 0, .. }
        ));
    }

    #[test]
    fn actions_may_create_but_not_dangle() {
        let t = SymbolTable::new();
        let s = t.variable("s1").unwrap();
        let n = t.variable("n1").unwrap();
        let z = t.variable("z1").unwrap();
        let a = t.str_constant("a").unwrap();
        let conds = vec![goal_pos(s, a, a)];
        let make = |id, value| Action {
            kind: PreferenceKind::Acceptable,
            id,
            attr: a,
            value,
            referent: None,
        };
        assert!(reorder_and_validate(&t, &conds, &[make(s, n), make(n, a)]).is_ok());

        let report = reorder_and_validate(&t, &conds, &[make(z, a)]).unwrap_err();
        assert!(matches!(
            report.issues[0],
            ValidationIssue::UnboundActionId { index: 0, .. }
        ));
    }

    #[test]
    fn empty_rule_is_rejected() {
        let t = SymbolTable::new();
        let report = reorder_and_validate(&t, &[], &[]).unwrap_err();
        assert_eq!(report.issues, vec![ValidationIssue::NoPositiveConditions]);
        assert!(report.to_string().contains("no positive"));
    }
}
