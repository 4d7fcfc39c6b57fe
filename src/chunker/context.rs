//! Per-build state.
//!
//! A [`BuildContext`] is created for one build attempt and dropped at every
//! exit point. Dropping it releases every symbol reference it still holds:
//! the paired condition lists, the saved ground copy, the actions, the rule
//! name, and (through the variablization manager) every variablization entry.

use std::sync::Arc;

use crate::causal::{CondRef, Condition, GoalLevel, InstantiationId, PreferenceId};
use crate::registry::SymbolTable;
use crate::rete::Action;
use crate::symbol::SymbolId;

use super::cond_set::ChunkCondSet;
use super::conditions::ConditionPair;
use super::variablize::VariablizationManager;

/// Phase of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Analyzing,
    CollectingConditions,
    Variablizing,
    Validating,
    Installing,
    Reverting,
    Aborted,
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildState::Idle => "idle",
            BuildState::Analyzing => "analyzing",
            BuildState::CollectingConditions => "collecting-conditions",
            BuildState::Variablizing => "variablizing",
            BuildState::Validating => "validating",
            BuildState::Installing => "installing",
            BuildState::Reverting => "reverting",
            BuildState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

pub(crate) struct BuildContext {
    table: Arc<SymbolTable>,
    pub state: BuildState,
    pub inst: InstantiationId,
    pub match_goal: SymbolId,
    pub match_level: GoalLevel,
    pub results: Vec<PreferenceId>,
    pub grounds: Vec<CondRef>,
    /// Positive conditions above the grounds level with no trace to follow.
    pub locals: Vec<CondRef>,
    pub negated: ChunkCondSet,
    pub reliable: bool,
    pub variablize: bool,
    pub vars: VariablizationManager,
    pub pairs: Vec<ConditionPair>,
    /// Ground copy kept for reverting to a justification.
    pub saved: Vec<Condition>,
    pub actions: Vec<Action>,
    pub name: Option<(SymbolId, String)>,
}

impl BuildContext {
    pub fn new(
        table: Arc<SymbolTable>,
        inst: InstantiationId,
        match_goal: SymbolId,
        match_level: GoalLevel,
    ) -> Self {
        Self {
            vars: VariablizationManager::new(Arc::clone(&table)),
            table,
            state: BuildState::Idle,
            inst,
            match_goal,
            match_level,
            results: Vec::new(),
            grounds: Vec::new(),
            locals: Vec::new(),
            negated: ChunkCondSet::new(),
            reliable: true,
            variablize: false,
            pairs: Vec::new(),
            saved: Vec::new(),
            actions: Vec::new(),
            name: None,
        }
    }

    pub fn table(&self) -> &Arc<SymbolTable> {
        &self.table
    }

    pub fn transition(&mut self, next: BuildState) {
        tracing::debug!(inst = %self.inst, from = %self.state, to = %next, "chunk build");
        self.state = next;
    }

    /// Goal level whose structure may appear in the rule body.
    pub fn grounds_level(&self) -> GoalLevel {
        self.match_level.saturating_sub(1)
    }

    pub fn release_pairs(&mut self) {
        for pair in self.pairs.drain(..) {
            pair.release(&self.table);
        }
    }

    pub fn release_actions(&mut self) {
        for action in self.actions.drain(..) {
            self.table.release_all(action.symbols());
        }
    }

    pub fn release_saved(&mut self) {
        for cond in self.saved.drain(..) {
            self.table.release_all(cond.symbols());
        }
    }

    pub fn release_name(&mut self) {
        if let Some((symbol, _)) = self.name.take() {
            self.table.release(symbol);
        }
    }
}

impl Drop for BuildContext {
    fn drop(&mut self) {
        self.release_pairs();
        self.release_saved();
        self.release_actions();
        self.release_name();
        self.vars.clear();
        self.negated.clear();
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("state", &self.state)
            .field("inst", &self.inst)
            .field("match_level", &self.match_level)
            .field("results", &self.results.len())
            .field("grounds", &self.grounds.len())
            .field("pairs", &self.pairs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::{Backtrace, Pattern, PreferenceKind};

    #[test]
    fn dropping_context_releases_everything() {
        let table = Arc::new(SymbolTable::new());
        let s1 = table.make_identifier('S').unwrap();
        let a = table.str_constant("a").unwrap();
        {
            let mut ctx = BuildContext::new(
                Arc::clone(&table),
                InstantiationId::new(1).unwrap(),
                s1,
                2,
            );
            let cond = Condition::positive(Pattern::eq(s1, a, a), Backtrace::default());
            table.acquire_all(cond.symbols());
            table.acquire_all(cond.symbols());
            ctx.pairs.push(ConditionPair {
                ground: cond.clone(),
                generalized: cond,
            });
            table.acquire_all([s1, a, a]);
            ctx.actions.push(Action {
                kind: PreferenceKind::Acceptable,
                id: s1,
                attr: a,
                value: a,
                referent: None,
            });
            let name = table.str_constant("chunk*x*d1-1").unwrap();
            ctx.name = Some((name, "chunk*x*d1-1".into()));
            assert_eq!(ctx.grounds_level(), 1);
        }
        assert_eq!(table.ref_count(s1), 1);
        assert_eq!(table.ref_count(a), 1);
        assert!(table.lookup_str("chunk*x*d1-1").is_none());
    }
}
