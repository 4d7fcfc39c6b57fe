//! Conditions and tests.
//!
//! The same types describe the ground conditions an instantiation matched and
//! the generalized conditions of a learned rule: a ground condition holds
//! identifiers and constants, a generalized one holds variables in their place.
//! Each [`Term`] carries the identity and originating rule variable of the
//! value it tests, which is what variablization keys on.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::{GoalLevel, IdentityId, InstantiationId, PreferenceId, WmeId};
use crate::symbol::SymbolId;

/// A symbol together with its generalization bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub symbol: SymbolId,
    /// Role of this value in the derivation. `None` for literal constants.
    pub identity: Option<IdentityId>,
    /// Variable name in the rule that produced this term, if any.
    pub original_var: Option<String>,
}

impl Term {
    pub fn new(symbol: SymbolId) -> Self {
        Self {
            symbol,
            identity: None,
            original_var: None,
        }
    }

    pub fn with_identity(mut self, identity: IdentityId) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn named(mut self, var: impl Into<String>) -> Self {
        self.original_var = Some(var.into());
        self
    }
}

impl From<SymbolId> for Term {
    fn from(symbol: SymbolId) -> Self {
        Term::new(symbol)
    }
}

/// Non-equality comparison inside a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    SameType,
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Relation::NotEqual => "<>",
            Relation::Less => "<",
            Relation::Greater => ">",
            Relation::LessOrEqual => "<=",
            Relation::GreaterOrEqual => ">=",
            Relation::SameType => "<=>",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalTest {
    pub relation: Relation,
    pub term: Term,
}

/// Test against one field of a working-memory element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    /// The equality test. Binding occurrences of variables live here.
    pub equality: Option<Term>,
    pub relations: Vec<RelationalTest>,
    /// Field must be a goal identifier.
    pub goal: bool,
    /// Field must be an impasse identifier.
    pub impasse: bool,
}

impl Test {
    pub fn eq(term: impl Into<Term>) -> Self {
        Self {
            equality: Some(term.into()),
            ..Default::default()
        }
    }

    pub fn with_relation(mut self, relation: Relation, term: impl Into<Term>) -> Self {
        self.relations.push(RelationalTest {
            relation,
            term: term.into(),
        });
        self
    }

    pub fn equality_symbol(&self) -> Option<SymbolId> {
        self.equality.as_ref().map(|t| t.symbol)
    }

    /// Every symbol occurrence in this test.
    pub fn symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.equality
            .iter()
            .map(|t| t.symbol)
            .chain(self.relations.iter().map(|r| r.term.symbol))
    }

    /// Visit every term; the flag is `true` for the equality term.
    pub fn for_each_term_mut(&mut self, f: &mut impl FnMut(&mut Term, bool)) {
        if let Some(term) = self.equality.as_mut() {
            f(term, true);
        }
        for rel in &mut self.relations {
            f(&mut rel.term, false);
        }
    }

    /// Structural equality: same symbols, relations and type tests. Identities are ignored.
    pub fn same_as(&self, other: &Test) -> bool {
        self.equality_symbol() == other.equality_symbol()
            && self.goal == other.goal
            && self.impasse == other.impasse
            && self.relations.len() == other.relations.len()
            && self
                .relations
                .iter()
                .zip(&other.relations)
                .all(|(a, b)| a.relation == b.relation && a.term.symbol == b.term.symbol)
    }

    fn hash_structure<H: Hasher>(&self, h: &mut H) {
        self.equality_symbol().map(SymbolId::get).hash(h);
        self.goal.hash(h);
        self.impasse.hash(h);
        for rel in &self.relations {
            rel.relation.hash(h);
            rel.term.symbol.get().hash(h);
        }
    }
}

/// Identifier / attribute / value tests of one condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Test,
    pub attr: Test,
    pub value: Test,
}

impl Pattern {
    pub fn new(id: Test, attr: Test, value: Test) -> Self {
        Self { id, attr, value }
    }

    /// Pattern of three plain equality tests.
    pub fn eq(id: impl Into<Term>, attr: impl Into<Term>, value: impl Into<Term>) -> Self {
        Self::new(Test::eq(id), Test::eq(attr), Test::eq(value))
    }

    pub fn tests(&self) -> [&Test; 3] {
        [&self.id, &self.attr, &self.value]
    }

    pub fn tests_mut(&mut self) -> [&mut Test; 3] {
        [&mut self.id, &mut self.attr, &mut self.value]
    }

    fn same_as(&self, other: &Pattern) -> bool {
        self.id.same_as(&other.id) && self.attr.same_as(&other.attr) && self.value.same_as(&other.value)
    }
}

/// Where a positive ground condition came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backtrace {
    /// Matched working-memory element.
    pub wme: Option<WmeId>,
    /// Goal level of the matched element's identifier.
    pub level: GoalLevel,
    /// Preference that supports the matched element, if it has one.
    pub trace: Option<PreferenceId>,
}

/// One test against working memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Positive { pattern: Pattern, bt: Backtrace },
    Negative { pattern: Pattern },
    /// Negated conjunction: matches when the inner conditions do not all match.
    Conjunctive(Vec<Condition>),
}

impl Condition {
    pub fn positive(pattern: Pattern, bt: Backtrace) -> Self {
        Condition::Positive { pattern, bt }
    }

    pub fn negative(pattern: Pattern) -> Self {
        Condition::Negative { pattern }
    }

    pub fn conjunctive(inner: Vec<Condition>) -> Self {
        Condition::Conjunctive(inner)
    }

    /// Set identities on the id/attr/value equality terms.
    pub fn with_identities(mut self, identities: [Option<IdentityId>; 3]) -> Self {
        if let Some(pattern) = self.pattern_mut() {
            for (test, identity) in pattern.tests_mut().into_iter().zip(identities) {
                if let Some(term) = test.equality.as_mut() {
                    term.identity = identity;
                }
            }
        }
        self
    }

    /// Record the rule variable names of the id/attr/value equality terms.
    pub fn with_original_vars(mut self, names: [Option<&str>; 3]) -> Self {
        if let Some(pattern) = self.pattern_mut() {
            for (test, name) in pattern.tests_mut().into_iter().zip(names) {
                if let Some(term) = test.equality.as_mut() {
                    term.original_var = name.map(str::to_string);
                }
            }
        }
        self
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Condition::Positive { .. })
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        match self {
            Condition::Positive { pattern, .. } | Condition::Negative { pattern } => Some(pattern),
            Condition::Conjunctive(_) => None,
        }
    }

    pub fn pattern_mut(&mut self) -> Option<&mut Pattern> {
        match self {
            Condition::Positive { pattern, .. } | Condition::Negative { pattern } => Some(pattern),
            Condition::Conjunctive(_) => None,
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Condition::Positive { bt, .. } => Some(bt),
            _ => None,
        }
    }

    /// Equality symbol of the identifier test.
    pub fn id_symbol(&self) -> Option<SymbolId> {
        self.pattern().and_then(|p| p.id.equality_symbol())
    }

    /// Every symbol occurrence, nested conjunctions included.
    ///
    /// A condition holds one reference per occurrence, so this is the list to
    /// acquire when the condition is copied and release when it is dropped.
    pub fn symbols(&self) -> Vec<SymbolId> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut Vec<SymbolId>) {
        match self {
            Condition::Positive { pattern, .. } | Condition::Negative { pattern } => {
                for test in pattern.tests() {
                    out.extend(test.symbols());
                }
            }
            Condition::Conjunctive(inner) => {
                for c in inner {
                    c.collect_symbols(out);
                }
            }
        }
    }

    /// Visit every test, nested conjunctions included.
    pub fn for_each_test_mut(&mut self, f: &mut impl FnMut(&mut Test)) {
        match self {
            Condition::Positive { pattern, .. } | Condition::Negative { pattern } => {
                for test in pattern.tests_mut() {
                    f(test);
                }
            }
            Condition::Conjunctive(inner) => {
                for c in inner {
                    c.for_each_test_mut(f);
                }
            }
        }
    }

    /// Structural equality, ignoring identities and backtrace bookkeeping.
    pub fn same_as(&self, other: &Condition) -> bool {
        match (self, other) {
            (Condition::Positive { pattern: a, .. }, Condition::Positive { pattern: b, .. })
            | (Condition::Negative { pattern: a }, Condition::Negative { pattern: b }) => {
                a.same_as(b)
            }
            (Condition::Conjunctive(a), Condition::Conjunctive(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            _ => false,
        }
    }

    /// Hash consistent with [`Condition::same_as`].
    pub fn structural_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.hash_structure(&mut h);
        h.finish()
    }

    fn hash_structure<H: Hasher>(&self, h: &mut H) {
        match self {
            Condition::Positive { pattern, .. } => {
                0u8.hash(h);
                pattern.tests().iter().for_each(|t| t.hash_structure(h));
            }
            Condition::Negative { pattern } => {
                1u8.hash(h);
                pattern.tests().iter().for_each(|t| t.hash_structure(h));
            }
            Condition::Conjunctive(inner) => {
                2u8.hash(h);
                inner.len().hash(h);
                inner.iter().for_each(|c| c.hash_structure(h));
            }
        }
    }
}

/// Position of a condition inside an instantiation of the causal graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CondRef {
    pub inst: InstantiationId,
    pub index: usize,
}
