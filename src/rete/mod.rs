//! Rule-network interface.
//!
//! The chunker never matches rules itself. It hands finished rules to a
//! [`RuleNetwork`], which answers with an [`InsertOutcome`]: whether the rule
//! was new, a duplicate of an installed rule, and whether replaying it against
//! the firing it was learned from reproduces that firing (refraction).
//!
//! [`MemoryRuleNetwork`] is a reference network for hosts without their own
//! matcher and for tests; [`reorder_and_validate`] is the structural check
//! every network gets by default.

pub mod memory;
pub mod reorder;

use serde::{Deserialize, Serialize};

use crate::causal::{Condition, PreferenceKind};
use crate::registry::SymbolTable;
use crate::symbol::SymbolId;

pub use memory::{InstalledRule, MemoryRuleNetwork};
pub use reorder::{ValidationIssue, ValidationReport, reorder_and_validate};

// ── Rules ───────────────────────────────────────────────────────────────

/// Whether a rule was generalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Chunk,
    Justification,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKind::Chunk => write!(f, "chunk"),
            RuleKind::Justification => write!(f, "justification"),
        }
    }
}

/// Right-hand-side action: make a preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: PreferenceKind,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
}

impl Action {
    pub fn symbols(&self) -> Vec<SymbolId> {
        let mut out = vec![self.id, self.attr, self.value];
        out.extend(self.referent);
        out
    }
}

/// A learned rule. Holds one reference on every symbol it mentions, its name included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Interned string symbol naming the rule.
    pub name: SymbolId,
    pub label: String,
    pub kind: RuleKind,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    /// Rule whose firing this was learned from.
    pub origin: Option<String>,
    /// Installed although it failed validation.
    pub ungrounded: bool,
}

impl Rule {
    pub fn symbols(&self) -> Vec<SymbolId> {
        let mut out = vec![self.name];
        for c in &self.conditions {
            out.extend(c.symbols());
        }
        for a in &self.actions {
            out.extend(a.symbols());
        }
        out
    }

    /// Drop the rule, releasing every reference it holds.
    pub fn release(self, table: &SymbolTable) {
        table.release_all(self.symbols());
    }
}

// ── Network interface ───────────────────────────────────────────────────

/// Response of the network to an insertion.
#[derive(Debug)]
pub enum InsertOutcome {
    /// Installed; no refracted firing was supplied.
    Added,
    /// An equivalent rule is already installed. The candidate is handed back.
    Duplicate { existing: String, candidate: Rule },
    /// Installed, and the rule reproduces the firing it was learned from.
    RefractedMatched,
    /// Installed, but replaying it against its own firing failed.
    RefractedNoMatch,
}

/// A rule-matching network that can absorb learned rules.
pub trait RuleNetwork {
    /// Install a rule. `refracted` holds the ground conditions of the
    /// firing the rule was learned from, in the rule's condition order.
    fn insert_rule(&mut self, rule: Rule, refracted: Option<&[Condition]>) -> InsertOutcome;

    /// Remove an installed rule, handing it back to the caller.
    fn remove_rule(&mut self, name: &str) -> Option<Rule>;

    /// Check that a rule can be matched left to right and return the
    /// condition order to use.
    fn reorder_and_validate(
        &self,
        table: &SymbolTable,
        conditions: &[Condition],
        actions: &[Action],
    ) -> Result<Vec<usize>, ValidationReport> {
        reorder_and_validate(table, conditions, actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_symbols_include_name_and_actions() {
        let table = SymbolTable::new();
        let name = table.str_constant("chunk*r*d1-1").unwrap();
        let s = table.variable("s1").unwrap();
        let a = table.str_constant("a").unwrap();
        let rule = Rule {
            name,
            label: "chunk*r*d1-1".into(),
            kind: RuleKind::Chunk,
            conditions: Vec::new(),
            actions: vec![Action {
                kind: PreferenceKind::Acceptable,
                id: s,
                attr: a,
                value: a,
                referent: None,
            }],
            origin: Some("r".into()),
            ungrounded: false,
        };
        assert_eq!(rule.symbols(), vec![name, s, a, a]);

        table.acquire(a);
        rule.release(&table);
        assert_eq!(table.ref_count(name), 0);
        assert_eq!(table.ref_count(s), 0);
        assert_eq!(table.ref_count(a), 0);
    }
}
