//! Dependency analysis.
//!
//! Walks backwards from each result through the firing that created it.
//! Positive conditions on structure at or above the grounds level become
//! grounds; positive conditions on local structure are traced through the
//! preference that created the element they matched; negations are staged
//! for a later reachability decision. Every instantiation is visited once per
//! build thanks to the transitive-closure stamp.

use std::collections::HashSet;

use crate::causal::{CausalGraph, CondRef, Condition, InstantiationId, PreferenceId, WmeId};

use super::context::BuildContext;
use super::results::clone_at_level;

struct Backtracer<'a> {
    graph: &'a mut CausalGraph,
    ctx: &'a mut BuildContext,
    tc: u64,
    grounded_wmes: HashSet<WmeId>,
    pending_locals: Vec<CondRef>,
}

/// Compute grounds, locals and staged negations for the build's results.
pub(crate) fn perform_dependency_analysis(graph: &mut CausalGraph, ctx: &mut BuildContext) {
    let tc = graph.new_tc_number();
    let results = ctx.results.clone();
    let mut bt = Backtracer {
        graph,
        ctx,
        tc,
        grounded_wmes: HashSet::new(),
        pending_locals: Vec::new(),
    };
    for result in results {
        if let Some(inst) = bt.graph.preference(result).map(|p| p.inst) {
            bt.backtrace_through(inst, None);
        }
    }
    bt.trace_locals();
    tracing::debug!(
        inst = %bt.ctx.inst,
        grounds = bt.ctx.grounds.len(),
        locals = bt.ctx.locals.len(),
        negated = bt.ctx.negated.len(),
        "dependency analysis complete"
    );
}

impl Backtracer<'_> {
    fn backtrace_through(&mut self, inst: InstantiationId, trace: Option<(CondRef, PreferenceId)>) {
        if let Some((at, pref)) = trace {
            self.unify_with_preference(at, pref);
        }
        if !self.graph.mark_instantiation(inst, self.tc) {
            return;
        }
        let grounds_level = self.ctx.grounds_level();
        let count = self
            .graph
            .instantiation(inst)
            .map(|i| i.conditions.len())
            .unwrap_or(0);

        for index in 0..count {
            let at = CondRef { inst, index };
            let Some(cond) = self.graph.condition(at) else {
                continue;
            };
            match cond {
                Condition::Positive { bt, .. } if bt.level <= grounds_level => {
                    let fresh = match bt.wme {
                        Some(w) => self.grounded_wmes.insert(w),
                        None => true,
                    };
                    if fresh {
                        self.ctx.grounds.push(at);
                    }
                }
                Condition::Positive { .. } => self.pending_locals.push(at),
                Condition::Negative { .. } | Condition::Conjunctive(_) => {
                    self.ctx.negated.insert(self.graph, at);
                }
            }
        }
    }

    /// The element a condition matched was created by `pref`: the condition's
    /// identities and the preference's identities denote the same values.
    fn unify_with_preference(&mut self, at: CondRef, pref: PreferenceId) {
        let (Some(cond), Some(p)) = (self.graph.condition(at), self.graph.preference(pref)) else {
            return;
        };
        let Some(pattern) = cond.pattern() else {
            return;
        };
        let theirs = [p.identities.id, p.identities.attr, p.identities.value];
        for (test, other) in pattern.tests().into_iter().zip(theirs) {
            let own = test.equality.as_ref().and_then(|t| t.identity);
            if let (Some(own), Some(other)) = (own, other) {
                self.ctx.vars.unify(own, other);
            }
        }
    }

    fn trace_locals(&mut self) {
        while let Some(at) = self.pending_locals.pop() {
            let trace = self
                .graph
                .condition(at)
                .and_then(Condition::backtrace)
                .and_then(|bt| bt.trace);
            let Some(pref) = trace else {
                self.ctx.locals.push(at);
                continue;
            };
            let pref = clone_at_level(self.graph, pref, self.ctx.match_level).unwrap_or(pref);
            match self.graph.preference(pref).map(|p| p.inst) {
                Some(inst) => self.backtrace_through(inst, Some((at, pref))),
                None => self.ctx.locals.push(at),
            }
        }
    }
}
