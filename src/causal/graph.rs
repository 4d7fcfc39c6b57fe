//! Arena holding identifiers, working-memory elements, preferences and
//! instantiations.
//!
//! The host reasoning loop populates the graph as rules fire; the chunker
//! reads it and adds the synthetic instantiations of learned rules. Every
//! symbol stored anywhere in the graph holds one reference in the shared
//! [`SymbolTable`], released when the owning entity is removed or the graph
//! is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::condition::{Backtrace, CondRef, Condition, Pattern};
use super::{
    CloneGroupId, GoalLevel, IdentityId, InstantiationId, NO_GOAL_LEVEL, PreferenceId,
    PreferenceKind, Slots, WmeId,
};
use crate::error::{EbcResult, GraphError};
use crate::registry::SymbolTable;
use crate::symbol::SymbolId;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A working-memory element `(subject ^attr value)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wme {
    pub id: WmeId,
    pub subject: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    /// Preference supporting this element; `None` for input elements.
    pub preference: Option<PreferenceId>,
}

/// Preferences and elements sharing one identifier and attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slot {
    pub attr: Option<SymbolId>,
    pub preferences: Vec<PreferenceId>,
    pub wmes: Vec<WmeId>,
}

/// Per-identifier bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierInfo {
    pub symbol: SymbolId,
    pub level: GoalLevel,
    pub isa_goal: bool,
    pub isa_impasse: bool,
    /// Next goal up the stack (goals only).
    pub higher_goal: Option<SymbolId>,
    /// Cleared while a subgoal below is learning; read by `bottom-only` learning.
    pub allow_bottom_up_chunks: bool,
    pub input_wmes: Vec<WmeId>,
    pub slots: Vec<Slot>,
    #[serde(skip)]
    pub(crate) tc: u64,
}

/// A proposed fact produced by one rule firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub id: PreferenceId,
    pub kind: PreferenceKind,
    pub subject: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
    pub inst: InstantiationId,
    pub identities: Slots<Option<IdentityId>>,
    /// Variable names the producing rule used for each field.
    pub original_vars: Slots<Option<String>>,
    pub clone_group: Option<CloneGroupId>,
}

impl Preference {
    pub fn symbols(&self) -> Vec<SymbolId> {
        let mut out = vec![self.subject, self.attr, self.value];
        out.extend(self.referent);
        out
    }

    /// Same logical preference: fields and kind match (referent only for binary kinds).
    pub fn same_content(&self, other: &Preference) -> bool {
        self.subject == other.subject
            && self.attr == other.attr
            && self.value == other.value
            && self.kind == other.kind
            && (self.kind.is_unary() || self.referent == other.referent)
    }
}

/// Caller-supplied description of a preference.
#[derive(Debug, Clone)]
pub struct PreferenceSpec {
    pub kind: PreferenceKind,
    pub subject: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
    pub identities: Slots<Option<IdentityId>>,
    pub original_vars: Slots<Option<String>>,
}

impl PreferenceSpec {
    pub fn new(kind: PreferenceKind, subject: SymbolId, attr: SymbolId, value: SymbolId) -> Self {
        Self {
            kind,
            subject,
            attr,
            value,
            referent: None,
            identities: Slots::default(),
            original_vars: Slots::default(),
        }
    }

    /// Acceptable preference, the common case.
    pub fn acceptable(subject: SymbolId, attr: SymbolId, value: SymbolId) -> Self {
        Self::new(PreferenceKind::Acceptable, subject, attr, value)
    }

    pub fn with_referent(mut self, referent: SymbolId) -> Self {
        self.referent = Some(referent);
        self
    }

    pub fn with_identities(mut self, identities: Slots<Option<IdentityId>>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_value_var(mut self, name: impl Into<String>) -> Self {
        self.original_vars.value = Some(name.into());
        self
    }
}

/// One rule firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instantiation {
    pub id: InstantiationId,
    /// Name of the rule that fired.
    pub production: Option<String>,
    /// For learned rules: the rule the learning started from.
    pub origin: Option<String>,
    pub match_goal: Option<SymbolId>,
    pub match_goal_level: GoalLevel,
    /// Ground conditions matched, in order.
    pub conditions: Vec<Condition>,
    pub preferences: Vec<PreferenceId>,
    /// False when the derivation relied on local negations.
    pub reliable: bool,
    /// Still active in the match set.
    pub in_ms: bool,
    /// Created by the chunker for a learned rule.
    pub synthetic: bool,
    #[serde(skip)]
    pub(crate) backtrace_mark: u64,
}

impl Instantiation {
    /// Rule name used when naming rules learned from this firing.
    pub fn origin_rule(&self) -> &str {
        self.origin
            .as_deref()
            .or(self.production.as_deref())
            .unwrap_or("unnamed")
    }
}

/// Caller-supplied description of an instantiation.
#[derive(Debug, Clone, Default)]
pub struct InstantiationSpec {
    pub production: Option<String>,
    pub match_goal: Option<SymbolId>,
    pub conditions: Vec<Condition>,
}

impl InstantiationSpec {
    pub fn new(production: impl Into<String>, match_goal: SymbolId) -> Self {
        Self {
            production: Some(production.into()),
            match_goal: Some(match_goal),
            conditions: Vec::new(),
        }
    }

    pub fn condition(mut self, cond: Condition) -> Self {
        self.conditions.push(cond);
        self
    }
}

// ---------------------------------------------------------------------------
// CausalGraph
// ---------------------------------------------------------------------------

/// The causal graph of one agent.
pub struct CausalGraph {
    symbols: Arc<SymbolTable>,
    identifiers: HashMap<SymbolId, IdentifierInfo>,
    goals: Vec<SymbolId>,
    wmes: HashMap<WmeId, Wme>,
    preferences: HashMap<PreferenceId, Preference>,
    instantiations: HashMap<InstantiationId, Instantiation>,
    clone_groups: HashMap<CloneGroupId, Vec<PreferenceId>>,
    next_wme: u64,
    next_pref: u64,
    next_inst: u64,
    next_identity: u64,
    next_group: u64,
    tc_counter: u64,
}

impl CausalGraph {
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        Self {
            symbols,
            identifiers: HashMap::new(),
            goals: Vec::new(),
            wmes: HashMap::new(),
            preferences: HashMap::new(),
            instantiations: HashMap::new(),
            clone_groups: HashMap::new(),
            next_wme: 0,
            next_pref: 0,
            next_inst: 0,
            next_identity: 0,
            next_group: 0,
            tc_counter: 0,
        }
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    // -- identifiers and goals ------------------------------------------------

    /// Push a new goal (state) below the current bottom goal.
    pub fn add_goal(&mut self) -> EbcResult<SymbolId> {
        let level = self.goals.len() as GoalLevel + 1;
        let symbol = self.symbols.make_identifier('S')?;
        self.identifiers.insert(
            symbol,
            IdentifierInfo {
                symbol,
                level,
                isa_goal: true,
                isa_impasse: false,
                higher_goal: self.goals.last().copied(),
                allow_bottom_up_chunks: true,
                input_wmes: Vec::new(),
                slots: Vec::new(),
                tc: 0,
            },
        );
        self.goals.push(symbol);
        Ok(symbol)
    }

    /// Create a non-goal identifier at the given level.
    pub fn add_identifier(&mut self, letter: char, level: GoalLevel) -> EbcResult<SymbolId> {
        let symbol = self.symbols.make_identifier(letter)?;
        self.identifiers.insert(
            symbol,
            IdentifierInfo {
                symbol,
                level,
                isa_goal: false,
                isa_impasse: false,
                higher_goal: None,
                allow_bottom_up_chunks: true,
                input_wmes: Vec::new(),
                slots: Vec::new(),
                tc: 0,
            },
        );
        Ok(symbol)
    }

    pub fn mark_impasse(&mut self, symbol: SymbolId) -> EbcResult<()> {
        let info = self.identifier_mut(symbol)?;
        info.isa_impasse = true;
        Ok(())
    }

    pub fn identifier(&self, symbol: SymbolId) -> Option<&IdentifierInfo> {
        self.identifiers.get(&symbol)
    }

    fn identifier_mut(&mut self, symbol: SymbolId) -> EbcResult<&mut IdentifierInfo> {
        match self.identifiers.get_mut(&symbol) {
            Some(info) => Ok(info),
            None => Err(GraphError::NotAnIdentifier {
                label: self.symbols.label(symbol),
            }
            .into()),
        }
    }

    pub fn level_of(&self, symbol: SymbolId) -> Option<GoalLevel> {
        self.identifiers.get(&symbol).map(|i| i.level)
    }

    pub fn goals(&self) -> &[SymbolId] {
        &self.goals
    }

    pub fn goal_at_level(&self, level: GoalLevel) -> Option<SymbolId> {
        if level == 0 {
            return None;
        }
        self.goals.get(level as usize - 1).copied()
    }

    pub fn set_allow_bottom_up_chunks(&mut self, goal: SymbolId, allow: bool) {
        if let Some(info) = self.identifiers.get_mut(&goal) {
            info.allow_bottom_up_chunks = allow;
        }
    }

    /// Allocate a fresh identity.
    pub fn new_identity(&mut self) -> IdentityId {
        self.next_identity += 1;
        IdentityId::new(self.next_identity).unwrap_or_else(|| unreachable!("identity counter starts at 1"))
    }

    // -- working memory -------------------------------------------------------

    /// Add an element. With a preference it lands in the subject's slot,
    /// without one it is an input element.
    pub fn add_wme(
        &mut self,
        subject: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        preference: Option<PreferenceId>,
    ) -> EbcResult<WmeId> {
        if let Some(pref) = preference {
            if !self.preferences.contains_key(&pref) {
                return Err(GraphError::UnknownPreference { id: pref.get() }.into());
            }
        }
        self.next_wme += 1;
        let id = WmeId::new(self.next_wme).unwrap_or_else(|| unreachable!("wme counter starts at 1"));
        let info = self.identifier_mut(subject)?;
        match preference {
            Some(_) => slot_for(info, attr).wmes.push(id),
            None => info.input_wmes.push(id),
        }
        self.symbols.acquire_all([subject, attr, value]);
        self.wmes.insert(
            id,
            Wme {
                id,
                subject,
                attr,
                value,
                preference,
            },
        );
        Ok(id)
    }

    /// Add the element a preference supports.
    pub fn add_wme_for_preference(&mut self, pref: PreferenceId) -> EbcResult<WmeId> {
        let p = self
            .preferences
            .get(&pref)
            .ok_or(GraphError::UnknownPreference { id: pref.get() })?;
        let (subject, attr, value) = (p.subject, p.attr, p.value);
        self.add_wme(subject, attr, value, Some(pref))
    }

    pub fn remove_wme(&mut self, id: WmeId) -> Option<Wme> {
        let wme = self.wmes.remove(&id)?;
        if let Some(info) = self.identifiers.get_mut(&wme.subject) {
            info.input_wmes.retain(|w| *w != id);
            for slot in &mut info.slots {
                slot.wmes.retain(|w| *w != id);
            }
        }
        self.symbols.release_all([wme.subject, wme.attr, wme.value]);
        Some(wme)
    }

    pub fn wme(&self, id: WmeId) -> Option<&Wme> {
        self.wmes.get(&id)
    }

    /// Ground positive condition that matched the given element.
    pub fn condition_for_wme(&self, id: WmeId) -> EbcResult<Condition> {
        let wme = self
            .wmes
            .get(&id)
            .ok_or(GraphError::UnknownWme { id: id.get() })?;
        let level = self.level_of(wme.subject).unwrap_or(NO_GOAL_LEVEL);
        Ok(Condition::positive(
            Pattern::eq(wme.subject, wme.attr, wme.value),
            Backtrace {
                wme: Some(id),
                level,
                trace: wme.preference,
            },
        ))
    }

    // -- instantiations and preferences ---------------------------------------

    /// Record a rule firing. The graph takes a reference on every condition symbol.
    pub fn add_instantiation(&mut self, spec: InstantiationSpec) -> EbcResult<InstantiationId> {
        if let Some(goal) = spec.match_goal {
            if !self.identifiers.get(&goal).is_some_and(|i| i.isa_goal) {
                return Err(GraphError::NotAGoal {
                    label: self.symbols.label(goal),
                }
                .into());
            }
        }
        for cond in &spec.conditions {
            self.symbols.acquire_all(cond.symbols());
        }
        Ok(self.insert_instantiation(spec, None, true, false))
    }

    /// Take ownership of a synthetic instantiation whose condition references
    /// the caller already holds.
    pub(crate) fn adopt_instantiation(
        &mut self,
        spec: InstantiationSpec,
        origin: Option<String>,
        reliable: bool,
    ) -> InstantiationId {
        self.insert_instantiation(spec, origin, reliable, true)
    }

    fn insert_instantiation(
        &mut self,
        spec: InstantiationSpec,
        origin: Option<String>,
        reliable: bool,
        synthetic: bool,
    ) -> InstantiationId {
        self.next_inst += 1;
        let id = InstantiationId::new(self.next_inst)
            .unwrap_or_else(|| unreachable!("instantiation counter starts at 1"));
        let match_goal_level = spec
            .match_goal
            .and_then(|g| self.level_of(g))
            .unwrap_or(NO_GOAL_LEVEL);
        self.instantiations.insert(
            id,
            Instantiation {
                id,
                production: spec.production,
                origin,
                match_goal: spec.match_goal,
                match_goal_level,
                conditions: spec.conditions,
                preferences: Vec::new(),
                reliable,
                in_ms: true,
                synthetic,
                backtrace_mark: 0,
            },
        );
        id
    }

    /// Deepest goal tested by the positive conditions of a condition list.
    pub fn deepest_goal_of(&self, conditions: &[Condition]) -> Option<SymbolId> {
        conditions
            .iter()
            .filter_map(|c| c.backtrace())
            .map(|bt| bt.level)
            .filter(|l| *l != NO_GOAL_LEVEL)
            .max()
            .and_then(|l| self.goal_at_level(l))
    }

    /// Ground condition at a position inside an instantiation.
    pub fn condition(&self, at: CondRef) -> Option<&Condition> {
        self.instantiations
            .get(&at.inst)
            .and_then(|i| i.conditions.get(at.index))
    }

    pub fn instantiation(&self, id: InstantiationId) -> Option<&Instantiation> {
        self.instantiations.get(&id)
    }

    pub(crate) fn instantiation_mut(&mut self, id: InstantiationId) -> Option<&mut Instantiation> {
        self.instantiations.get_mut(&id)
    }

    pub fn instantiations(&self) -> impl Iterator<Item = &Instantiation> {
        self.instantiations.values()
    }

    /// Add a preference generated by an instantiation.
    pub fn add_preference(
        &mut self,
        inst: InstantiationId,
        spec: PreferenceSpec,
    ) -> EbcResult<PreferenceId> {
        if !self.instantiations.contains_key(&inst) {
            return Err(GraphError::UnknownInstantiation { id: inst.get() }.into());
        }
        if spec.kind.is_binary() && spec.referent.is_none() {
            return Err(GraphError::MissingReferent {
                kind: spec.kind.to_string(),
            }
            .into());
        }
        self.next_pref += 1;
        let id = PreferenceId::new(self.next_pref)
            .unwrap_or_else(|| unreachable!("preference counter starts at 1"));
        let info = self.identifier_mut(spec.subject)?;
        slot_for(info, spec.attr).preferences.push(id);

        let pref = Preference {
            id,
            kind: spec.kind,
            subject: spec.subject,
            attr: spec.attr,
            value: spec.value,
            referent: if spec.kind.is_binary() { spec.referent } else { None },
            inst,
            identities: spec.identities,
            original_vars: spec.original_vars,
            clone_group: None,
        };
        self.symbols.acquire_all(pref.symbols());
        self.preferences.insert(id, pref);
        if let Some(i) = self.instantiations.get_mut(&inst) {
            i.preferences.push(id);
        }
        Ok(id)
    }

    pub fn preference(&self, id: PreferenceId) -> Option<&Preference> {
        self.preferences.get(&id)
    }

    // -- clones ----------------------------------------------------------------

    /// Put two preferences in the same clone group, merging groups if needed.
    pub fn link_clone(&mut self, a: PreferenceId, b: PreferenceId) -> EbcResult<()> {
        for p in [a, b] {
            if !self.preferences.contains_key(&p) {
                return Err(GraphError::UnknownPreference { id: p.get() }.into());
            }
        }
        let ga = self.preferences.get(&a).and_then(|p| p.clone_group);
        let gb = self.preferences.get(&b).and_then(|p| p.clone_group);
        let group = match (ga, gb) {
            (Some(g), Some(h)) if g == h => return Ok(()),
            (Some(g), Some(h)) => {
                let moved = self.clone_groups.remove(&h).unwrap_or_default();
                for p in &moved {
                    if let Some(pref) = self.preferences.get_mut(p) {
                        pref.clone_group = Some(g);
                    }
                }
                self.clone_groups.entry(g).or_default().extend(moved);
                return Ok(());
            }
            (Some(g), None) | (None, Some(g)) => g,
            (None, None) => {
                self.next_group += 1;
                let g = CloneGroupId::new(self.next_group)
                    .unwrap_or_else(|| unreachable!("group counter starts at 1"));
                self.clone_groups.insert(g, Vec::new());
                g
            }
        };
        for p in [a, b] {
            if let Some(pref) = self.preferences.get_mut(&p) {
                if pref.clone_group.is_none() {
                    pref.clone_group = Some(group);
                    self.clone_groups.entry(group).or_default().push(p);
                }
            }
        }
        Ok(())
    }

    /// Other members of a preference's clone group.
    pub fn clones_of(&self, id: PreferenceId) -> Vec<PreferenceId> {
        self.preferences
            .get(&id)
            .and_then(|p| p.clone_group)
            .and_then(|g| self.clone_groups.get(&g))
            .map(|members| members.iter().copied().filter(|m| *m != id).collect())
            .unwrap_or_default()
    }

    /// Remove a preference from its clone group. A group left with one member dissolves.
    pub fn unlink_clone(&mut self, id: PreferenceId) {
        let Some(group) = self.preferences.get_mut(&id).and_then(|p| p.clone_group.take()) else {
            return;
        };
        let remaining = match self.clone_groups.get_mut(&group) {
            Some(members) => {
                members.retain(|m| *m != id);
                members.clone()
            }
            None => return,
        };
        if remaining.len() <= 1 {
            self.clone_groups.remove(&group);
            for m in remaining {
                if let Some(p) = self.preferences.get_mut(&m) {
                    p.clone_group = None;
                }
            }
        }
    }

    // -- retraction --------------------------------------------------------------

    /// Remove an instantiation with its preferences and the elements they support.
    pub fn retract_instantiation(&mut self, id: InstantiationId) -> EbcResult<()> {
        let inst = self
            .instantiations
            .remove(&id)
            .ok_or(GraphError::UnknownInstantiation { id: id.get() })?;
        for pref in &inst.preferences {
            self.remove_preference(*pref);
        }
        for cond in &inst.conditions {
            self.symbols.release_all(cond.symbols());
        }
        tracing::debug!(inst = %id, prefs = inst.preferences.len(), "retracted instantiation");
        Ok(())
    }

    fn remove_preference(&mut self, id: PreferenceId) {
        self.unlink_clone(id);
        let supported: Vec<WmeId> = self
            .wmes
            .values()
            .filter(|w| w.preference == Some(id))
            .map(|w| w.id)
            .collect();
        for w in supported {
            self.remove_wme(w);
        }
        let Some(pref) = self.preferences.remove(&id) else {
            return;
        };
        if let Some(info) = self.identifiers.get_mut(&pref.subject) {
            for slot in &mut info.slots {
                slot.preferences.retain(|p| *p != id);
            }
        }
        self.symbols.release_all(pref.symbols());
    }

    // -- transitive-closure stamps ---------------------------------------------

    pub(crate) fn new_tc_number(&mut self) -> u64 {
        self.tc_counter += 1;
        self.tc_counter
    }

    /// Stamp an identifier; returns false if it already carried this stamp.
    pub(crate) fn mark_identifier(&mut self, symbol: SymbolId, tc: u64) -> bool {
        match self.identifiers.get_mut(&symbol) {
            Some(info) if info.tc != tc => {
                info.tc = tc;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn identifier_marked(&self, symbol: SymbolId, tc: u64) -> bool {
        self.identifiers.get(&symbol).is_some_and(|i| i.tc == tc)
    }

    /// Stamp an instantiation; returns false if it was already visited with this stamp.
    pub(crate) fn mark_instantiation(&mut self, id: InstantiationId, tc: u64) -> bool {
        match self.instantiations.get_mut(&id) {
            Some(inst) if inst.backtrace_mark != tc => {
                inst.backtrace_mark = tc;
                true
            }
            _ => false,
        }
    }
}

fn slot_for(info: &mut IdentifierInfo, attr: SymbolId) -> &mut Slot {
    let pos = match info.slots.iter().position(|s| s.attr == Some(attr)) {
        Some(pos) => pos,
        None => {
            info.slots.push(Slot {
                attr: Some(attr),
                ..Default::default()
            });
            info.slots.len() - 1
        }
    };
    &mut info.slots[pos]
}

impl Drop for CausalGraph {
    fn drop(&mut self) {
        let table = Arc::clone(&self.symbols);
        for (_, inst) in self.instantiations.drain() {
            for cond in &inst.conditions {
                table.release_all(cond.symbols());
            }
        }
        for (_, pref) in self.preferences.drain() {
            table.release_all(pref.symbols());
        }
        for (_, wme) in self.wmes.drain() {
            table.release_all([wme.subject, wme.attr, wme.value]);
        }
        for (symbol, _) in self.identifiers.drain() {
            table.release(symbol);
        }
    }
}

impl std::fmt::Debug for CausalGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CausalGraph")
            .field("goals", &self.goals.len())
            .field("identifiers", &self.identifiers.len())
            .field("wmes", &self.wmes.len())
            .field("preferences", &self.preferences.len())
            .field("instantiations", &self.instantiations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<SymbolTable>, CausalGraph) {
        let table = Arc::new(SymbolTable::new());
        let graph = CausalGraph::new(Arc::clone(&table));
        (table, graph)
    }

    #[test]
    fn goals_stack_with_levels() {
        let (_t, mut g) = setup();
        let s1 = g.add_goal().unwrap();
        let s2 = g.add_goal().unwrap();
        assert_eq!(g.level_of(s1), Some(1));
        assert_eq!(g.level_of(s2), Some(2));
        assert_eq!(g.identifier(s2).unwrap().higher_goal, Some(s1));
        assert_eq!(g.goal_at_level(2), Some(s2));
        assert_eq!(g.goal_at_level(0), None);
    }

    #[test]
    fn preference_lands_in_slot_and_supports_wme() {
        let (t, mut g) = setup();
        let s1 = g.add_goal().unwrap();
        let s2 = g.add_goal().unwrap();
        let attr = t.str_constant("result").unwrap();
        let val = t.str_constant("done").unwrap();
        let inst = g
            .add_instantiation(InstantiationSpec::new("return", s2))
            .unwrap();
        let pref = g
            .add_preference(inst, PreferenceSpec::acceptable(s1, attr, val))
            .unwrap();
        let wme = g.add_wme_for_preference(pref).unwrap();

        let info = g.identifier(s1).unwrap();
        assert_eq!(info.slots.len(), 1);
        assert_eq!(info.slots[0].preferences, vec![pref]);
        assert_eq!(info.slots[0].wmes, vec![wme]);

        let cond = g.condition_for_wme(wme).unwrap();
        let bt = cond.backtrace().unwrap();
        assert_eq!(bt.level, 1);
        assert_eq!(bt.trace, Some(pref));
    }

    #[test]
    fn binary_preference_requires_referent() {
        let (t, mut g) = setup();
        let s1 = g.add_goal().unwrap();
        let attr = t.str_constant("operator").unwrap();
        let o1 = g.add_identifier('O', 1).unwrap();
        let inst = g
            .add_instantiation(InstantiationSpec::new("compare", s1))
            .unwrap();
        let err = g
            .add_preference(inst, PreferenceSpec::new(PreferenceKind::Better, s1, attr, o1))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::EbcError::Graph(GraphError::MissingReferent { .. })
        ));
    }

    #[test]
    fn clone_groups_link_and_unlink_symmetrically() {
        let (t, mut g) = setup();
        let s1 = g.add_goal().unwrap();
        let attr = t.str_constant("a").unwrap();
        let inst = g.add_instantiation(InstantiationSpec::new("r", s1)).unwrap();
        let p1 = g.add_preference(inst, PreferenceSpec::acceptable(s1, attr, attr)).unwrap();
        let p2 = g.add_preference(inst, PreferenceSpec::acceptable(s1, attr, attr)).unwrap();
        let p3 = g.add_preference(inst, PreferenceSpec::acceptable(s1, attr, attr)).unwrap();
        g.link_clone(p1, p2).unwrap();
        g.link_clone(p2, p3).unwrap();
        assert_eq!(g.clones_of(p1).len(), 2);

        g.unlink_clone(p2);
        assert_eq!(g.clones_of(p1), vec![p3]);
        assert!(g.clones_of(p2).is_empty());

        g.unlink_clone(p3);
        assert!(g.clones_of(p1).is_empty());
        assert!(g.preference(p1).unwrap().clone_group.is_none());
    }

    #[test]
    fn retraction_releases_everything() {
        let (t, mut g) = setup();
        let s1 = g.add_goal().unwrap();
        let attr = t.str_constant("color").unwrap();
        let red = t.str_constant("red").unwrap();
        let before = t.ref_count(red);

        let input = g.add_wme(s1, attr, red, None).unwrap();
        let cond = g.condition_for_wme(input).unwrap();
        let inst = g
            .add_instantiation(InstantiationSpec::new("copy", s1).condition(cond))
            .unwrap();
        let pref = g
            .add_preference(inst, PreferenceSpec::acceptable(s1, attr, red))
            .unwrap();
        g.add_wme_for_preference(pref).unwrap();
        assert_eq!(t.ref_count(red), before + 4);

        g.retract_instantiation(inst).unwrap();
        g.remove_wme(input).unwrap();
        assert_eq!(t.ref_count(red), before);
        assert!(g.preference(pref).is_none());
    }

    #[test]
    fn dropping_graph_releases_identifiers() {
        let table = Arc::new(SymbolTable::new());
        {
            let mut g = CausalGraph::new(Arc::clone(&table));
            let s1 = g.add_goal().unwrap();
            let attr = table.str_constant("x").unwrap();
            g.add_wme(s1, attr, attr, None).unwrap();
            table.release(attr);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn deepest_goal_follows_condition_levels() {
        let (t, mut g) = setup();
        let s1 = g.add_goal().unwrap();
        let s2 = g.add_goal().unwrap();
        let attr = t.str_constant("a").unwrap();
        let w1 = g.add_wme(s1, attr, attr, None).unwrap();
        let w2 = g.add_wme(s2, attr, attr, None).unwrap();
        let conds = vec![g.condition_for_wme(w1).unwrap(), g.condition_for_wme(w2).unwrap()];
        assert_eq!(g.deepest_goal_of(&conds), Some(s2));
        assert_eq!(g.deepest_goal_of(&conds[..1]), Some(s1));
    }
}
