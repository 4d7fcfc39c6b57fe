//! Identity and variablization manager.
//!
//! Maps ground symbols to the variables standing in for them in the rule
//! being built. Identifiers are keyed by symbol: once an identifier is
//! variablized its variable is indexed too, so a condition already rewritten
//! still finds its entry. Constants are keyed by identity, and only constants
//! carrying an identity are generalized at all; literals stay as they are.
//!
//! Identities found to denote the same value are merged in a union-find
//! forest. Every entry holds one reference on its ground symbol and one on
//! its variable; [`VariablizationManager::clear`] releases them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::causal::{Condition, IdentityId, Term, Test};
use crate::error::EbcResult;
use crate::registry::SymbolTable;
use crate::symbol::SymbolId;

/// Index under which a variablization is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariablizationKey {
    Symbol(SymbolId),
    Identity(IdentityId),
}

#[derive(Debug, Clone, Copy)]
struct Variablization {
    ground: SymbolId,
    variable: SymbolId,
    /// Bound by an equality test somewhere in the conditions.
    grounded: bool,
}

pub struct VariablizationManager {
    table: Arc<SymbolTable>,
    by_symbol: HashMap<SymbolId, Variablization>,
    by_identity: HashMap<IdentityId, Variablization>,
    original_vars: HashMap<String, IdentityId>,
    parent: HashMap<IdentityId, IdentityId>,
}

impl VariablizationManager {
    pub fn new(table: Arc<SymbolTable>) -> Self {
        Self {
            table,
            by_symbol: HashMap::new(),
            by_identity: HashMap::new(),
            original_vars: HashMap::new(),
            parent: HashMap::new(),
        }
    }

    // ---------------------------------------------------------------------------
    // Identity unification
    // ---------------------------------------------------------------------------

    /// Representative of an identity's unification class.
    pub fn find(&self, identity: IdentityId) -> IdentityId {
        let mut current = identity;
        while let Some(next) = self.parent.get(&current) {
            current = *next;
        }
        current
    }

    /// Record that two identities denote the same value.
    pub fn unify(&mut self, a: IdentityId, b: IdentityId) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent.insert(child, root);
        tracing::trace!(%child, %root, "unified identities");

        if let Some(moved) = self.by_identity.remove(&child) {
            match self.by_identity.get_mut(&root) {
                Some(kept) => {
                    kept.grounded |= moved.grounded;
                    self.table.release_all([moved.ground, moved.variable]);
                }
                None => {
                    self.by_identity.insert(root, moved);
                }
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Table operations
    // ---------------------------------------------------------------------------

    fn normalize(&self, key: VariablizationKey) -> VariablizationKey {
        match key {
            VariablizationKey::Identity(i) => VariablizationKey::Identity(self.find(i)),
            k => k,
        }
    }

    fn entry(&self, key: VariablizationKey) -> Option<&Variablization> {
        match self.normalize(key) {
            VariablizationKey::Symbol(s) => self.by_symbol.get(&s),
            VariablizationKey::Identity(i) => self.by_identity.get(&i),
        }
    }

    /// Variable already assigned under this key.
    pub fn lookup(&self, key: VariablizationKey) -> Option<SymbolId> {
        self.entry(key).map(|v| v.variable)
    }

    pub fn is_grounded(&self, key: VariablizationKey) -> bool {
        self.entry(key).is_some_and(|v| v.grounded)
    }

    /// Register a new mapping. The key must not be mapped yet.
    pub fn store(
        &mut self,
        key: VariablizationKey,
        ground: SymbolId,
        variable: SymbolId,
        grounded: bool,
    ) {
        assert!(
            self.lookup(key).is_none(),
            "variablization for {} stored twice",
            self.table.label(ground)
        );
        let entry = Variablization {
            ground,
            variable,
            grounded,
        };
        match self.normalize(key) {
            VariablizationKey::Symbol(s) => {
                self.table.acquire_all([ground, variable, ground, variable]);
                self.by_symbol.insert(s, entry);
                self.by_symbol.insert(variable, entry);
            }
            VariablizationKey::Identity(i) => {
                self.table.acquire_all([ground, variable]);
                self.by_identity.insert(i, entry);
            }
        }
    }

    /// Mark a key grounded, keeping the mirrored identifier entry in step.
    pub fn mark_grounded(&mut self, key: VariablizationKey) {
        match self.normalize(key) {
            VariablizationKey::Symbol(s) => {
                let Some(found) = self.by_symbol.get(&s).copied() else {
                    return;
                };
                for key in [found.ground, found.variable] {
                    if let Some(v) = self.by_symbol.get_mut(&key) {
                        v.grounded = true;
                    }
                }
            }
            VariablizationKey::Identity(i) => {
                if let Some(v) = self.by_identity.get_mut(&i) {
                    v.grounded = true;
                }
            }
        }
    }

    /// Remember which identity a rule variable name stood for.
    pub fn record_original_var(&mut self, name: &str, identity: IdentityId) {
        let identity = self.find(identity);
        self.original_vars.entry(name.to_string()).or_insert(identity);
    }

    pub fn identity_for_original_var(&self, name: &str) -> Option<IdentityId> {
        self.original_vars.get(name).map(|i| self.find(*i))
    }

    /// Record original variable names of every term in a condition.
    pub fn record_original_vars(&mut self, cond: &Condition) {
        match cond {
            Condition::Positive { pattern, .. } | Condition::Negative { pattern } => {
                for test in pattern.tests() {
                    let terms = test.equality.iter().chain(test.relations.iter().map(|r| &r.term));
                    for term in terms {
                        if let (Some(name), Some(identity)) = (&term.original_var, term.identity) {
                            self.record_original_var(name, identity);
                        }
                    }
                }
            }
            Condition::Conjunctive(inner) => {
                for c in inner {
                    self.record_original_vars(c);
                }
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Left-hand side
    // ---------------------------------------------------------------------------

    fn key_for(&self, term: &Term) -> Option<VariablizationKey> {
        if self.table.is_variable(term.symbol) {
            return None;
        }
        if self.table.is_identifier(term.symbol) {
            Some(VariablizationKey::Symbol(term.symbol))
        } else {
            term.identity.map(VariablizationKey::Identity)
        }
    }

    /// Replace a term's ground symbol with its variable, creating one if needed.
    ///
    /// The term's reference moves from the ground symbol to the variable.
    pub fn variablize_term(&mut self, term: &mut Term, is_equality: bool) -> EbcResult<()> {
        let Some(key) = self.key_for(term) else {
            return Ok(());
        };
        let ground = term.symbol;
        let variable = match self.lookup(key) {
            Some(variable) => {
                if is_equality {
                    self.mark_grounded(key);
                }
                self.table.acquire(variable);
                variable
            }
            None => {
                let variable = self
                    .table
                    .generate_new_variable(self.table.variable_prefix(ground))?;
                self.store(key, ground, variable, is_equality);
                variable
            }
        };
        self.table.release(ground);
        term.symbol = variable;
        Ok(())
    }

    fn variablize_test(&mut self, test: &mut Test, binds: bool) -> EbcResult<()> {
        if let Some(term) = test.equality.as_mut() {
            self.variablize_term(term, binds)?;
        }
        for rel in &mut test.relations {
            self.variablize_term(&mut rel.term, false)?;
        }
        Ok(())
    }

    /// Variablize every test of a condition, nested conjunctions included.
    ///
    /// Only equality tests of positive conditions ground what they test;
    /// a negation binds nothing.
    pub fn variablize_condition(&mut self, cond: &mut Condition) -> EbcResult<()> {
        self.variablize_condition_inner(cond, false)
    }

    fn variablize_condition_inner(&mut self, cond: &mut Condition, negated: bool) -> EbcResult<()> {
        match cond {
            Condition::Positive { pattern, .. } => {
                for test in pattern.tests_mut() {
                    self.variablize_test(test, !negated)?;
                }
            }
            Condition::Negative { pattern } => {
                for test in pattern.tests_mut() {
                    self.variablize_test(test, false)?;
                }
            }
            Condition::Conjunctive(inner) => {
                for c in inner {
                    self.variablize_condition_inner(c, true)?;
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------
    // Right-hand side
    // ---------------------------------------------------------------------------

    /// Resolve an action symbol.
    ///
    /// Returns the variable to use, with one reference owned by the caller, or
    /// `None` when the ground symbol stays as it is. An identifier whose only
    /// occurrences were ungrounded gets a fresh unbound variable; an
    /// ungrounded or literal constant is not generalized.
    pub fn resolve_rhs(
        &mut self,
        symbol: SymbolId,
        identity: Option<IdentityId>,
        original_var: Option<&str>,
    ) -> EbcResult<Option<SymbolId>> {
        if self.table.is_variable(symbol) {
            return Ok(None);
        }
        if self.table.is_identifier(symbol) {
            let key = VariablizationKey::Symbol(symbol);
            match self.by_symbol.get(&symbol).copied() {
                Some(found) if found.grounded => {
                    self.table.acquire(found.variable);
                    return Ok(Some(found.variable));
                }
                Some(stale) => {
                    tracing::debug!(
                        symbol = %self.table.label(symbol),
                        "ungrounded identifier on action side, generating unbound variable"
                    );
                    self.by_symbol.remove(&stale.ground);
                    self.by_symbol.remove(&stale.variable);
                    self.table
                        .release_all([stale.ground, stale.variable, stale.ground, stale.variable]);
                }
                None => {}
            }
            let variable = self
                .table
                .generate_new_variable(self.table.variable_prefix(symbol))?;
            self.store(key, symbol, variable, true);
            return Ok(Some(variable));
        }

        let identity = original_var
            .and_then(|name| self.identity_for_original_var(name))
            .or(identity.map(|i| self.find(i)));
        let Some(identity) = identity else {
            return Ok(None);
        };
        match self.by_identity.get(&identity) {
            Some(found) if found.grounded => {
                self.table.acquire(found.variable);
                Ok(Some(found.variable))
            }
            Some(_) => {
                tracing::debug!(
                    symbol = %self.table.label(symbol),
                    %identity,
                    "ungrounded constant on action side left as literal"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    // ---------------------------------------------------------------------------
    // Cleanup
    // ---------------------------------------------------------------------------

    /// Number of stored entries (identifiers count twice).
    pub fn len(&self) -> usize {
        self.by_symbol.len() + self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every reference and empty every index.
    pub fn clear(&mut self) {
        for (_, v) in self.by_symbol.drain() {
            self.table.release_all([v.ground, v.variable]);
        }
        for (_, v) in self.by_identity.drain() {
            self.table.release_all([v.ground, v.variable]);
        }
        self.original_vars.clear();
        self.parent.clear();
    }
}

impl Drop for VariablizationManager {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for VariablizationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariablizationManager")
            .field("symbols", &self.by_symbol.len())
            .field("identities", &self.by_identity.len())
            .field("original_vars", &self.original_vars.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::{Backtrace, Pattern, Relation};

    fn ident(n: u64) -> IdentityId {
        IdentityId::new(n).unwrap()
    }

    fn setup() -> (Arc<SymbolTable>, VariablizationManager) {
        let table = Arc::new(SymbolTable::new());
        let vm = VariablizationManager::new(Arc::clone(&table));
        (table, vm)
    }

    #[test]
    fn identifiers_map_to_one_variable() {
        let (t, mut vm) = setup();
        let s1 = t.make_identifier('S').unwrap();
        let mut a = Term::new(s1);
        let mut b = Term::new(s1);
        t.acquire(s1);
        vm.variablize_term(&mut a, true).unwrap();
        vm.variablize_term(&mut b, true).unwrap();
        assert_eq!(a.symbol, b.symbol);
        assert_eq!(t.label(a.symbol), "<s1>");
        assert_eq!(vm.lookup(VariablizationKey::Symbol(s1)), Some(a.symbol));
        // The variable itself indexes the same entry.
        assert_eq!(vm.lookup(VariablizationKey::Symbol(a.symbol)), Some(a.symbol));
    }

    #[test]
    fn literal_constants_stay() {
        let (t, mut vm) = setup();
        let red = t.str_constant("red").unwrap();
        let mut term = Term::new(red);
        vm.variablize_term(&mut term, true).unwrap();
        assert_eq!(term.symbol, red);
        assert!(vm.is_empty());
    }

    #[test]
    fn constants_with_identity_are_generalized() {
        let (t, mut vm) = setup();
        let five = t.int_constant(5).unwrap();
        let mut term = Term::new(five).with_identity(ident(3));
        vm.variablize_term(&mut term, true).unwrap();
        assert_eq!(t.label(term.symbol), "<c1>");
        assert!(vm.is_grounded(VariablizationKey::Identity(ident(3))));
    }

    #[test]
    fn unification_merges_groundedness() {
        let (t, mut vm) = setup();
        let five = t.int_constant(5).unwrap();
        t.acquire(five);
        let mut rel = Term::new(five).with_identity(ident(2));
        vm.variablize_term(&mut rel, false).unwrap();
        assert!(!vm.is_grounded(VariablizationKey::Identity(ident(2))));

        vm.unify(ident(2), ident(7));
        let mut eq = Term::new(five).with_identity(ident(7));
        vm.variablize_term(&mut eq, true).unwrap();
        assert_eq!(eq.symbol, rel.symbol);
        assert!(vm.is_grounded(VariablizationKey::Identity(ident(2))));
    }

    #[test]
    #[should_panic(expected = "stored twice")]
    fn storing_twice_panics() {
        let (t, mut vm) = setup();
        let s1 = t.make_identifier('S').unwrap();
        let v = t.variable("s1").unwrap();
        vm.store(VariablizationKey::Symbol(s1), s1, v, true);
        vm.store(VariablizationKey::Symbol(s1), s1, v, true);
    }

    #[test]
    fn rhs_grounded_identifier_reuses_variable() {
        let (t, mut vm) = setup();
        let s1 = t.make_identifier('S').unwrap();
        t.acquire(s1);
        let mut term = Term::new(s1);
        vm.variablize_term(&mut term, true).unwrap();
        let v = vm.resolve_rhs(s1, None, None).unwrap();
        assert_eq!(v, Some(term.symbol));
    }

    #[test]
    fn rhs_ungrounded_identifier_gets_fresh_variable() {
        let (t, mut vm) = setup();
        let x1 = t.make_identifier('X').unwrap();
        t.acquire(x1);
        let mut rel = Term::new(x1);
        vm.variablize_term(&mut rel, false).unwrap();
        let fresh = vm.resolve_rhs(x1, None, None).unwrap().unwrap();
        assert_ne!(fresh, rel.symbol);
        assert!(vm.is_grounded(VariablizationKey::Symbol(x1)));
        // Resolving again is stable.
        assert_eq!(vm.resolve_rhs(x1, None, None).unwrap(), Some(fresh));
    }

    #[test]
    fn rhs_constants_resolve_through_original_vars() {
        let (t, mut vm) = setup();
        let five = t.int_constant(5).unwrap();
        t.acquire(five);
        let cond = Condition::positive(
            Pattern::eq(
                t.make_identifier('S').unwrap(),
                t.str_constant("count").unwrap(),
                Term::new(five).with_identity(ident(4)).named("n"),
            ),
            Backtrace::default(),
        );
        vm.record_original_vars(&cond);
        let mut term = Term::new(five).with_identity(ident(4));
        vm.variablize_term(&mut term, true).unwrap();

        assert_eq!(vm.resolve_rhs(five, None, Some("n")).unwrap(), Some(term.symbol));
        assert_eq!(vm.resolve_rhs(five, None, Some("unknown")).unwrap(), None);
        assert_eq!(vm.resolve_rhs(five, None, None).unwrap(), None);
        t.release_all(cond.symbols());
    }

    #[test]
    fn rhs_ungrounded_constant_is_not_generalized() {
        let (t, mut vm) = setup();
        let five = t.int_constant(5).unwrap();
        let mut term = Term::new(five).with_identity(ident(1));
        vm.variablize_term(&mut term, false).unwrap();
        assert_eq!(vm.resolve_rhs(five, Some(ident(1)), None).unwrap(), None);
    }

    #[test]
    fn relational_tests_do_not_ground() {
        let (t, mut vm) = setup();
        let s1 = t.make_identifier('S').unwrap();
        let three = t.int_constant(3).unwrap();
        let mut cond = Condition::positive(
            Pattern::new(
                Test::eq(s1),
                Test::eq(t.str_constant("n").unwrap()),
                Test::default()
                    .with_relation(Relation::Less, Term::new(three).with_identity(ident(9))),
            ),
            Backtrace::default(),
        );
        vm.variablize_condition(&mut cond).unwrap();
        assert!(vm.is_grounded(VariablizationKey::Symbol(s1)));
        assert!(!vm.is_grounded(VariablizationKey::Identity(ident(9))));
    }

    #[test]
    fn negations_do_not_ground() {
        let (t, mut vm) = setup();
        let x1 = t.make_identifier('X').unwrap();
        let mut cond = Condition::negative(Pattern::eq(
            x1,
            t.str_constant("n").unwrap(),
            t.str_constant("v").unwrap(),
        ));
        vm.variablize_condition(&mut cond).unwrap();
        assert!(vm.lookup(VariablizationKey::Symbol(x1)).is_some());
        assert!(!vm.is_grounded(VariablizationKey::Symbol(x1)));
    }

    #[test]
    fn clear_balances_references() {
        let (t, mut vm) = setup();
        let s1 = t.make_identifier('S').unwrap();
        let five = t.int_constant(5).unwrap();
        let mut a = Term::new(s1);
        let mut b = Term::new(five).with_identity(ident(1));
        vm.variablize_term(&mut a, true).unwrap();
        vm.variablize_term(&mut b, true).unwrap();
        assert!(t.ref_count(s1) > 0);
        vm.clear();
        assert!(vm.is_empty());
        // Only the terms' variable references remain.
        assert_eq!(t.ref_count(s1), 0);
        assert_eq!(t.ref_count(five), 0);
        assert_eq!(t.ref_count(a.symbol), 1);
        assert_eq!(t.ref_count(b.symbol), 1);
    }
}
