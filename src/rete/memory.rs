//! In-memory reference rule network.
//!
//! Stores installed rules by name, detects duplicates through a signature in
//! which variables are renamed by first occurrence, and replays a new rule
//! against the ground conditions of the firing it was learned from.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use super::{InsertOutcome, Rule, RuleNetwork};
use crate::causal::{Condition, Pattern, Relation, Test};
use crate::registry::SymbolTable;
use crate::symbol::{SymbolId, SymbolKind};

/// A rule held by the network plus its usage counters.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledRule {
    pub rule: Rule,
    /// Times a duplicate of this rule was learned while its firing still matched.
    pub duplicate_hits: u64,
    #[serde(skip)]
    signature: String,
}

/// Rule network backed by a hash map.
pub struct MemoryRuleNetwork {
    symbols: Arc<SymbolTable>,
    rules: HashMap<String, InstalledRule>,
    by_signature: HashMap<String, String>,
}

impl MemoryRuleNetwork {
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        Self {
            symbols,
            rules: HashMap::new(),
            by_signature: HashMap::new(),
        }
    }

    pub fn rule(&self, name: &str) -> Option<&InstalledRule> {
        self.rules.get(name)
    }

    pub fn rules(&self) -> impl Iterator<Item = &InstalledRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Variable-renaming-insensitive rendering of a rule body and actions.
    fn signature(&self, rule: &Rule) -> String {
        let mut names: HashMap<SymbolId, usize> = HashMap::new();
        let mut out = String::new();
        for cond in &rule.conditions {
            self.render_condition(cond, &mut names, &mut out);
        }
        out.push_str("-->");
        for action in &rule.actions {
            let _ = write!(out, "({}", action.kind);
            for s in action.symbols() {
                out.push(' ');
                self.render_symbol(s, &mut names, &mut out);
            }
            out.push(')');
        }
        out
    }

    fn render_condition(&self, cond: &Condition, names: &mut HashMap<SymbolId, usize>, out: &mut String) {
        match cond {
            Condition::Positive { pattern, .. } => {
                out.push('+');
                self.render_pattern(pattern, names, out);
            }
            Condition::Negative { pattern } => {
                out.push('-');
                self.render_pattern(pattern, names, out);
            }
            Condition::Conjunctive(inner) => {
                out.push_str("-{");
                for c in inner {
                    self.render_condition(c, names, out);
                }
                out.push('}');
            }
        }
    }

    fn render_pattern(&self, pattern: &Pattern, names: &mut HashMap<SymbolId, usize>, out: &mut String) {
        out.push('(');
        for test in pattern.tests() {
            out.push('[');
            if test.goal {
                out.push_str("goal ");
            }
            if test.impasse {
                out.push_str("impasse ");
            }
            if let Some(s) = test.equality_symbol() {
                self.render_symbol(s, names, out);
            }
            for rel in &test.relations {
                let _ = write!(out, " {} ", rel.relation);
                self.render_symbol(rel.term.symbol, names, out);
            }
            out.push(']');
        }
        out.push(')');
    }

    fn render_symbol(&self, s: SymbolId, names: &mut HashMap<SymbolId, usize>, out: &mut String) {
        if self.symbols.is_variable(s) {
            let next = names.len();
            let n = *names.entry(s).or_insert(next);
            let _ = write!(out, "<v{n}>");
        } else {
            let _ = write!(out, "{}", s.get());
        }
    }

    /// Does the rule, matched positionally against the ground conditions, reproduce them?
    fn refraction_matches(&self, rule: &Rule, ground: &[Condition]) -> bool {
        if rule.conditions.len() != ground.len() {
            return false;
        }
        let mut bindings: HashMap<SymbolId, SymbolId> = HashMap::new();
        let mut deferred: Vec<(Relation, SymbolId, SymbolId)> = Vec::new();
        let ok = rule
            .conditions
            .iter()
            .zip(ground)
            .all(|(r, g)| self.unify_condition(r, g, &mut bindings, &mut deferred));
        ok && deferred.into_iter().all(|(rel, value, referent)| {
            let referent = if self.symbols.is_variable(referent) {
                match bindings.get(&referent) {
                    Some(b) => *b,
                    None => return false,
                }
            } else {
                referent
            };
            self.relation_holds(rel, value, referent)
        })
    }

    fn unify_condition(
        &self,
        rule: &Condition,
        ground: &Condition,
        bindings: &mut HashMap<SymbolId, SymbolId>,
        deferred: &mut Vec<(Relation, SymbolId, SymbolId)>,
    ) -> bool {
        match (rule, ground) {
            (Condition::Positive { pattern: r, .. }, Condition::Positive { pattern: g, .. }) => r
                .tests()
                .into_iter()
                .zip(g.tests())
                .all(|(rt, gt)| self.unify_test(rt, gt, bindings, deferred)),
            // Relations inside negations describe what was absent; only bindings are replayed.
            (Condition::Negative { pattern: r }, Condition::Negative { pattern: g }) => {
                let mut ignored = Vec::new();
                r.tests()
                    .into_iter()
                    .zip(g.tests())
                    .all(|(rt, gt)| self.unify_test(rt, gt, bindings, &mut ignored))
            }
            (Condition::Conjunctive(r), Condition::Conjunctive(g)) => {
                let mut ignored = Vec::new();
                r.len() == g.len()
                    && r.iter()
                        .zip(g)
                        .all(|(a, b)| self.unify_condition(a, b, bindings, &mut ignored))
            }
            _ => false,
        }
    }

    fn unify_test(
        &self,
        rule: &Test,
        ground: &Test,
        bindings: &mut HashMap<SymbolId, SymbolId>,
        deferred: &mut Vec<(Relation, SymbolId, SymbolId)>,
    ) -> bool {
        let Some(value) = ground.equality_symbol() else {
            return rule.equality.is_none();
        };
        if let Some(r) = rule.equality_symbol() {
            if self.symbols.is_variable(r) {
                match bindings.get(&r) {
                    Some(bound) if *bound != value => return false,
                    Some(_) => {}
                    None => {
                        bindings.insert(r, value);
                    }
                }
            } else if r != value {
                return false;
            }
        }
        deferred.extend(rule.relations.iter().map(|rel| (rel.relation, value, rel.term.symbol)));
        true
    }

    fn relation_holds(&self, relation: Relation, a: SymbolId, b: SymbolId) -> bool {
        let (ka, kb) = match (self.symbols.kind(a), self.symbols.kind(b)) {
            (Some(ka), Some(kb)) => (ka, kb),
            _ => return false,
        };
        match relation {
            Relation::NotEqual => a != b,
            Relation::SameType => std::mem::discriminant(&ka) == std::mem::discriminant(&kb),
            _ => match (ka, kb) {
                (SymbolKind::Int(x), SymbolKind::Int(y)) => match relation {
                    Relation::Less => x < y,
                    Relation::Greater => x > y,
                    Relation::LessOrEqual => x <= y,
                    Relation::GreaterOrEqual => x >= y,
                    _ => false,
                },
                _ => false,
            },
        }
    }
}

impl RuleNetwork for MemoryRuleNetwork {
    fn insert_rule(&mut self, rule: Rule, refracted: Option<&[Condition]>) -> InsertOutcome {
        let signature = self.signature(&rule);
        let matched = refracted.map(|g| self.refraction_matches(&rule, g));

        if let Some(existing) = self.by_signature.get(&signature).cloned() {
            if matched == Some(true) {
                if let Some(installed) = self.rules.get_mut(&existing) {
                    installed.duplicate_hits += 1;
                }
            }
            tracing::debug!(candidate = %rule.label, existing = %existing, "duplicate rule");
            return InsertOutcome::Duplicate {
                existing,
                candidate: rule,
            };
        }

        let label = rule.label.clone();
        self.by_signature.insert(signature.clone(), label.clone());
        self.rules.insert(
            label.clone(),
            InstalledRule {
                rule,
                duplicate_hits: 0,
                signature,
            },
        );
        tracing::debug!(rule = %label, matched = ?matched, "installed rule");
        match matched {
            None => InsertOutcome::Added,
            Some(true) => InsertOutcome::RefractedMatched,
            Some(false) => InsertOutcome::RefractedNoMatch,
        }
    }

    fn remove_rule(&mut self, name: &str) -> Option<Rule> {
        let installed = self.rules.remove(name)?;
        self.by_signature.remove(&installed.signature);
        Some(installed.rule)
    }
}

impl Drop for MemoryRuleNetwork {
    fn drop(&mut self) {
        for (_, installed) in self.rules.drain() {
            installed.rule.release(&self.symbols);
        }
    }
}

impl std::fmt::Debug for MemoryRuleNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRuleNetwork")
            .field("rules", &self.rules.len())
            .finish()
    }
}
