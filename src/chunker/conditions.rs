//! Condition-list construction.
//!
//! The rule body is kept as a list of [`ConditionPair`]s: the ground copy
//! matched by the firing and the generalized copy that becomes the rule.
//! Merging, goal tests and reordering act on whole pairs so the two lists
//! never drift apart.

use std::collections::HashSet;
use std::sync::Arc;

use crate::causal::{CausalGraph, Condition, GoalLevel, Test};
use crate::error::EbcResult;
use crate::registry::SymbolTable;
use crate::rete::Action;
use crate::symbol::SymbolId;

use super::context::BuildContext;

/// A ground condition and its generalized counterpart. Each side owns its references.
#[derive(Debug, Clone)]
pub(crate) struct ConditionPair {
    pub ground: Condition,
    pub generalized: Condition,
}

impl ConditionPair {
    /// Pair two fresh copies of a ground condition.
    pub fn from_ground(table: &SymbolTable, cond: &Condition) -> Self {
        let symbols = cond.symbols();
        table.acquire_all(symbols.iter().copied());
        table.acquire_all(symbols);
        Self {
            ground: cond.clone(),
            generalized: cond.clone(),
        }
    }

    pub fn release(self, table: &SymbolTable) {
        table.release_all(self.ground.symbols());
        table.release_all(self.generalized.symbols());
    }
}

/// What condition collection found out about negations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NegationSummary {
    pub promoted: usize,
    pub dropped: usize,
    /// Negations testing structure local to the match goal or below.
    pub local: usize,
}

// ---------------------------------------------------------------------------
// Initial lists
// ---------------------------------------------------------------------------

/// Pair every ground, then promote the staged negations connected to them.
pub(crate) fn create_initial_conditions(
    graph: &mut CausalGraph,
    ctx: &mut BuildContext,
) -> NegationSummary {
    let table = Arc::clone(ctx.table());
    let tc = graph.new_tc_number();
    let mut summary = NegationSummary::default();

    for at in ctx.grounds.clone() {
        let Some(cond) = graph.condition(at).cloned() else {
            continue;
        };
        if let Some(pattern) = cond.pattern() {
            for symbol in [pattern.id.equality_symbol(), pattern.value.equality_symbol()]
                .into_iter()
                .flatten()
            {
                graph.mark_identifier(symbol, tc);
            }
        }
        ctx.pairs.push(ConditionPair::from_ground(&table, &cond));
    }

    while let Some(handle) = ctx.negated.first() {
        let at = ctx.negated.remove(handle);
        let Some(cond) = graph.condition(at) else {
            continue;
        };
        if negation_in_tc(graph, cond, tc) {
            ctx.pairs.push(ConditionPair::from_ground(&table, cond));
            summary.promoted += 1;
        } else if tests_local_structure(graph, cond, ctx.match_level) {
            tracing::debug!(inst = %ctx.inst, cond = %at.index, "negation on local structure");
            summary.local += 1;
        } else {
            tracing::debug!(inst = %ctx.inst, cond = %at.index, "unconnected negation dropped");
            summary.dropped += 1;
        }
    }
    summary
}

fn marked(graph: &CausalGraph, extra: &HashSet<SymbolId>, test: &Test, tc: u64) -> bool {
    test.equality_symbol()
        .is_some_and(|s| graph.identifier_marked(s, tc) || extra.contains(&s))
}

/// Is a negated condition connected to the grounds?
fn negation_in_tc(graph: &CausalGraph, cond: &Condition, tc: u64) -> bool {
    match cond {
        Condition::Positive { .. } => false,
        Condition::Negative { pattern } => marked(graph, &HashSet::new(), &pattern.id, tc),
        Condition::Conjunctive(inner) => {
            // Inner positives extend the closure for the conditions after them.
            let mut extra: HashSet<SymbolId> = HashSet::new();
            let mut in_tc = vec![false; inner.len()];
            loop {
                let mut changed = false;
                for (i, c) in inner.iter().enumerate() {
                    if in_tc[i] {
                        continue;
                    }
                    let Some(pattern) = c.pattern() else {
                        in_tc[i] = negation_in_tc(graph, c, tc);
                        changed |= in_tc[i];
                        continue;
                    };
                    if marked(graph, &extra, &pattern.id, tc) {
                        in_tc[i] = true;
                        changed = true;
                        if c.is_positive() {
                            extra.extend(pattern.id.equality_symbol());
                            extra.extend(pattern.value.equality_symbol());
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
            in_tc.into_iter().all(|b| b)
        }
    }
}

fn tests_local_structure(graph: &CausalGraph, cond: &Condition, match_level: GoalLevel) -> bool {
    match cond {
        Condition::Positive { pattern, .. } | Condition::Negative { pattern } => pattern
            .id
            .equality_symbol()
            .and_then(|s| graph.level_of(s))
            .is_some_and(|l| l >= match_level),
        Condition::Conjunctive(inner) => inner
            .iter()
            .any(|c| tests_local_structure(graph, c, match_level)),
    }
}

// ---------------------------------------------------------------------------
// Generalization
// ---------------------------------------------------------------------------

/// Keep an untouched ground copy for a possible revert.
pub(crate) fn save_ground_copy(ctx: &mut BuildContext) {
    let table = Arc::clone(ctx.table());
    for pair in &ctx.pairs {
        table.acquire_all(pair.ground.symbols());
        ctx.saved.push(pair.ground.clone());
    }
}

/// Variablize every generalized condition: positives first, so that their
/// equality tests ground what the negations mention.
pub(crate) fn variablize_conditions(ctx: &mut BuildContext) -> EbcResult<()> {
    for pair in &ctx.pairs {
        ctx.vars.record_original_vars(&pair.ground);
    }
    for pair in ctx.pairs.iter_mut().filter(|p| p.generalized.is_positive()) {
        ctx.vars.variablize_condition(&mut pair.generalized)?;
    }
    for pair in ctx.pairs.iter_mut().filter(|p| !p.generalized.is_positive()) {
        ctx.vars.variablize_condition(&mut pair.generalized)?;
    }
    Ok(())
}

fn same_equalities(a: &Condition, b: &Condition) -> bool {
    match (a, b) {
        (Condition::Positive { pattern: pa, .. }, Condition::Positive { pattern: pb, .. }) => pa
            .tests()
            .into_iter()
            .zip(pb.tests())
            .all(|(x, y)| x.equality_symbol().is_some() && x.equality_symbol() == y.equality_symbol()),
        _ => false,
    }
}

/// Fold positive conditions that became identical on their equality tests
/// into one, keeping the union of their other tests.
pub(crate) fn merge_conditions(ctx: &mut BuildContext) -> usize {
    let table = Arc::clone(ctx.table());
    let mut merged = 0;
    let mut i = 0;
    while i < ctx.pairs.len() {
        let mut j = i + 1;
        while j < ctx.pairs.len() {
            if !same_equalities(&ctx.pairs[i].generalized, &ctx.pairs[j].generalized) {
                j += 1;
                continue;
            }
            let removed = ctx.pairs.remove(j);
            table.release_all(removed.ground.symbols());
            merge_into(&table, &mut ctx.pairs[i].generalized, removed.generalized);
            merged += 1;
        }
        i += 1;
    }
    if merged > 0 {
        tracing::debug!(inst = %ctx.inst, merged, "merged conditions");
    }
    merged
}

fn merge_into(table: &SymbolTable, target: &mut Condition, mut source: Condition) {
    if let (Some(into), Some(from)) = (target.pattern_mut(), source.pattern_mut()) {
        for (t, s) in into.tests_mut().into_iter().zip(from.tests_mut()) {
            for rel in std::mem::take(&mut s.relations) {
                let known = t
                    .relations
                    .iter()
                    .any(|r| r.relation == rel.relation && r.term.symbol == rel.term.symbol);
                if known {
                    table.release(rel.term.symbol);
                } else {
                    t.relations.push(rel);
                }
            }
            t.goal |= s.goal;
            t.impasse |= s.impasse;
        }
    }
    table.release_all(source.symbols());
}

/// Constrain generalized goal and impasse identifiers to match goals and impasses.
pub(crate) fn add_goal_tests(graph: &CausalGraph, ctx: &mut BuildContext) {
    let mut done: HashSet<SymbolId> = HashSet::new();
    for pair in ctx.pairs.iter_mut().filter(|p| p.ground.is_positive()) {
        let Some(info) = pair.ground.id_symbol().and_then(|s| graph.identifier(s)) else {
            continue;
        };
        if !(info.isa_goal || info.isa_impasse) {
            continue;
        }
        let Some(generalized_id) = pair.generalized.id_symbol() else {
            continue;
        };
        if !done.insert(generalized_id) {
            continue;
        }
        for cond in [&mut pair.ground, &mut pair.generalized] {
            if let Some(pattern) = cond.pattern_mut() {
                pattern.id.goal |= info.isa_goal;
                pattern.id.impasse |= info.isa_impasse;
            }
        }
    }
}

/// Turn the results into actions, generalized when the build variablizes.
pub(crate) fn build_actions(graph: &CausalGraph, ctx: &mut BuildContext) -> EbcResult<()> {
    let table = Arc::clone(ctx.table());
    for result in ctx.results.clone() {
        let Some(p) = graph.preference(result) else {
            continue;
        };
        assert!(
            !p.kind.is_binary() || p.referent.is_some(),
            "binary result preference {result} has no referent"
        );
        let fields = [
            (Some(p.subject), p.identities.id, p.original_vars.id.as_deref()),
            (Some(p.attr), p.identities.attr, p.original_vars.attr.as_deref()),
            (Some(p.value), p.identities.value, p.original_vars.value.as_deref()),
            (p.referent, p.identities.referent, p.original_vars.referent.as_deref()),
        ];
        let mut resolved: [Option<SymbolId>; 4] = [None; 4];
        for (slot, (symbol, identity, original_var)) in resolved.iter_mut().zip(fields) {
            let Some(symbol) = symbol else {
                continue;
            };
            let generalized = if ctx.variablize {
                ctx.vars.resolve_rhs(symbol, identity, original_var)?
            } else {
                None
            };
            *slot = Some(generalized.unwrap_or_else(|| {
                table.acquire(symbol);
                symbol
            }));
        }
        let [Some(id), Some(attr), Some(value), referent] = resolved else {
            continue;
        };
        ctx.actions.push(Action {
            kind: p.kind,
            id,
            attr,
            value,
            referent,
        });
    }
    Ok(())
}

/// Replace the generalized lists by the saved ground copy.
pub(crate) fn rebuild_from_saved(ctx: &mut BuildContext) {
    let table = Arc::clone(ctx.table());
    ctx.release_pairs();
    ctx.release_actions();
    ctx.vars.clear();
    for cond in std::mem::take(&mut ctx.saved) {
        table.acquire_all(cond.symbols());
        ctx.pairs.push(ConditionPair {
            generalized: cond.clone(),
            ground: cond,
        });
    }
}

/// Put the pairs in the order the network will match them.
pub(crate) fn apply_order(ctx: &mut BuildContext, order: &[usize]) {
    let mut slots: Vec<Option<ConditionPair>> = ctx.pairs.drain(..).map(Some).collect();
    for &i in order {
        if let Some(pair) = slots.get_mut(i).and_then(Option::take) {
            ctx.pairs.push(pair);
        }
    }
    ctx.pairs.extend(slots.into_iter().flatten());
}
