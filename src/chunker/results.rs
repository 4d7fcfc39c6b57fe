//! Results calculation.
//!
//! A firing's results are the preferences it created on structure above its
//! match goal, plus everything hanging off new identifiers those results
//! link up: a result whose value is a substate identifier drags that
//! identifier's slots along, transitively.

use crate::causal::{
    CausalGraph, GoalLevel, IdentityId, Instantiation, NO_GOAL_LEVEL, PreferenceId,
};
use crate::symbol::SymbolId;

use super::context::BuildContext;

/// A firing can be learned from when it matched a goal and created at
/// least one preference above it.
pub(crate) fn can_learn_from(graph: &CausalGraph, inst: &Instantiation) -> bool {
    if inst.match_goal.is_none() || inst.match_goal_level == NO_GOAL_LEVEL {
        return false;
    }
    inst.preferences
        .iter()
        .filter_map(|p| graph.preference(*p))
        .any(|p| {
            graph
                .level_of(p.subject)
                .is_some_and(|l| l < inst.match_goal_level)
        })
}

/// Member of a preference's clone group created by a firing at `level`.
pub(crate) fn clone_at_level(
    graph: &CausalGraph,
    pref: PreferenceId,
    level: GoalLevel,
) -> Option<PreferenceId> {
    graph.clones_of(pref).into_iter().find(|c| {
        graph
            .preference(*c)
            .and_then(|p| graph.instantiation(p.inst))
            .is_some_and(|i| i.match_goal_level == level)
    })
}

struct ResultWalk<'a> {
    graph: &'a mut CausalGraph,
    ctx: &'a mut BuildContext,
    tc: u64,
    /// Every preference of the firing, searched for extra results.
    extra: Vec<PreferenceId>,
}

/// Fill `ctx.results` for the build's instantiation.
pub(crate) fn collect_results(graph: &mut CausalGraph, ctx: &mut BuildContext) {
    let tc = graph.new_tc_number();
    let extra = graph
        .instantiation(ctx.inst)
        .map(|i| i.preferences.clone())
        .unwrap_or_default();
    let mut walk = ResultWalk {
        graph,
        ctx,
        tc,
        extra,
    };
    for pref in walk.extra.clone() {
        let Some(subject) = walk.graph.preference(pref).map(|p| p.subject) else {
            continue;
        };
        let above = walk
            .graph
            .level_of(subject)
            .is_some_and(|l| l < walk.ctx.match_level);
        if above && !walk.graph.identifier_marked(subject, tc) {
            walk.add_pref(pref, None);
        }
    }
    tracing::debug!(
        inst = %walk.ctx.inst,
        results = walk.ctx.results.len(),
        "results calculated"
    );
}

impl ResultWalk<'_> {
    fn add_pref(&mut self, pref: PreferenceId, linked: Option<IdentityId>) {
        let Some(p) = self.graph.preference(pref) else {
            return;
        };
        let duplicate = self
            .ctx
            .results
            .iter()
            .filter_map(|r| self.graph.preference(*r))
            .any(|r| r.same_content(p));
        if duplicate {
            return;
        }

        let level = self
            .graph
            .instantiation(p.inst)
            .map(|i| i.match_goal_level)
            .unwrap_or(NO_GOAL_LEVEL);
        let pref = if level == self.ctx.match_level {
            pref
        } else {
            match clone_at_level(self.graph, pref, self.ctx.match_level) {
                Some(clone) => clone,
                None => return,
            }
        };
        let Some(p) = self.graph.preference(pref) else {
            return;
        };
        let (kind, value, referent) = (p.kind, p.value, p.referent);
        let identities = p.identities.clone();

        self.ctx.results.push(pref);
        if let (Some(own), Some(linked)) = (identities.id, linked) {
            self.ctx.vars.unify(own, linked);
        }
        self.add_if_needed(value, identities.value);
        if kind.is_binary() {
            if let Some(referent) = referent {
                self.add_if_needed(referent, identities.referent);
            }
        }
    }

    fn add_if_needed(&mut self, symbol: SymbolId, linked: Option<IdentityId>) {
        let local = self
            .graph
            .level_of(symbol)
            .is_some_and(|l| l >= self.ctx.match_level);
        if local && !self.graph.identifier_marked(symbol, self.tc) {
            self.add_for_id(symbol, linked);
        }
    }

    fn add_for_id(&mut self, id: SymbolId, linked: Option<IdentityId>) {
        self.graph.mark_identifier(id, self.tc);
        let Some(info) = self.graph.identifier(id) else {
            return;
        };
        let input_wmes = info.input_wmes.clone();
        let slots: Vec<(Vec<PreferenceId>, Vec<_>)> = info
            .slots
            .iter()
            .map(|s| (s.preferences.clone(), s.wmes.clone()))
            .collect();

        for w in input_wmes {
            if let Some((value, identity)) = self.wme_value(w) {
                self.add_if_needed(value, identity);
            }
        }
        for (prefs, wmes) in slots {
            for pref in prefs {
                self.add_pref(pref, linked);
            }
            for w in wmes {
                if let Some((value, identity)) = self.wme_value(w) {
                    self.add_if_needed(value, identity);
                }
            }
        }
        for pref in self.extra.clone() {
            if self.graph.preference(pref).is_some_and(|p| p.subject == id) {
                self.add_pref(pref, linked);
            }
        }
    }

    /// Value of an element and the value identity of its supporting preference.
    fn wme_value(&self, w: crate::causal::WmeId) -> Option<(SymbolId, Option<IdentityId>)> {
        let wme = self.graph.wme(w)?;
        let identity = wme
            .preference
            .and_then(|p| self.graph.preference(p))
            .and_then(|p| p.identities.value);
        Some((wme.value, identity))
    }
}
