//! Explanation-based chunking.
//!
//! [`Chunker::attempt_chunk`] turns one rule firing in a substate into a
//! learned rule. The build runs as a small state machine over a
//! [`BuildState`]:
//!
//! 1. results: preferences the firing created above its match goal
//! 2. dependency analysis: backtrace through the causal graph to grounds
//! 3. condition collection: grounds plus reachable negations
//! 4. variablization: identities become variables, merged conditions
//! 5. validation: reorder for matching, revert to a justification on failure
//! 6. installation: insert into the network and resolve duplicates
//!
//! A successful build adds a synthetic instantiation to the causal graph.
//! That instantiation may itself return results to a higher goal, so
//! chunking cascades until nothing more is learnable or the per-cycle
//! budget runs out.

mod backtrace;
mod cond_set;
mod conditions;
mod context;
mod install;
mod results;
pub mod stats;
pub mod variablize;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::causal::{CausalGraph, InstantiationId, InstantiationSpec};
use crate::config::ChunkerConfig;
use crate::error::{EbcResult, GraphError};
use crate::registry::SymbolTable;
use crate::rete::{Rule, RuleKind, RuleNetwork};
use crate::symbol::SymbolId;

use backtrace::perform_dependency_analysis;
use conditions::{
    add_goal_tests, apply_order, build_actions, create_initial_conditions, merge_conditions,
    rebuild_from_saved, save_ground_copy, variablize_conditions,
};
use context::BuildContext;
use install::{make_result_clones, request_stop, rule_name};
use results::{can_learn_from, collect_results};

pub use context::BuildState;
pub use stats::ChunkerStats;
pub use variablize::{VariablizationKey, VariablizationManager};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a build stopped without installing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    NoResults,
    NoGrounds,
    MaxChunks,
    MaxDupes,
    ValidationRejected,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::NoResults => "no results",
            FailureReason::NoGrounds => "no grounds",
            FailureReason::MaxChunks => "max-chunks reached",
            FailureReason::MaxDupes => "max-dupes reached",
            FailureReason::ValidationRejected => "validation rejected",
        };
        write!(f, "{s}")
    }
}

/// Result of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "rule", rename_all = "kebab-case")]
pub enum ChunkOutcome {
    /// The firing had no goal or created nothing above it.
    #[default]
    NotAttempted,
    Learned(String),
    LearnedJustification(String),
    /// An equivalent rule was already installed.
    Duplicate { existing: String },
    /// A justification was installed, failed to reproduce its firing and
    /// was removed again.
    Excised(String),
    Failed(FailureReason),
}

impl ChunkOutcome {
    /// Name of the rule left installed by this build, if any.
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            ChunkOutcome::Learned(name) | ChunkOutcome::LearnedJustification(name) => Some(name),
            _ => None,
        }
    }
}

/// Everything one call to [`Chunker::attempt_chunk`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    /// Outcome of the build for the firing passed in.
    pub outcome: ChunkOutcome,
    /// Outcomes of cascaded builds, in order.
    pub cascade: Vec<ChunkOutcome>,
    /// Synthetic instantiations added to the causal graph.
    pub instantiations: Vec<InstantiationId>,
    /// Set when a configured interrupt fired; the host should stop.
    pub stop_requested: Option<String>,
}

impl ChunkReport {
    /// Every outcome, the initial build first.
    pub fn outcomes(&self) -> impl Iterator<Item = &ChunkOutcome> {
        std::iter::once(&self.outcome).chain(self.cascade.iter())
    }
}

/// Rules learned so far in the current decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleBudget {
    pub used: u64,
    pub limit: u64,
    /// Set once a build was refused for the budget; stops cascading.
    pub exhausted: bool,
}

impl CycleBudget {
    fn new(limit: u64) -> Self {
        Self {
            used: 0,
            limit,
            exhausted: false,
        }
    }

    /// Change the limit mid-cycle. Raising it past `used` lifts the exhaustion.
    fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
        self.exhausted &= self.used >= limit;
    }
}

/// State threaded through one attempt and its cascade.
struct Attempt {
    budget: CycleBudget,
    report: ChunkReport,
    disabled_goals: Vec<SymbolId>,
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Learns rules from substate problem solving.
pub struct Chunker {
    config: ChunkerConfig,
    symbols: Arc<SymbolTable>,
    stats: ChunkerStats,
    decision_cycle: u64,
    budget: CycleBudget,
    rule_counter: u64,
    /// Per-rule duplicate count as (decision cycle, count).
    duplicates_by_rule: HashMap<String, (u64, u64)>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, symbols: Arc<SymbolTable>) -> EbcResult<Self> {
        config.validate()?;
        tracing::info!(
            learning = ?config.learning,
            max_chunks = config.max_chunks,
            max_dupes = config.max_dupes,
            "chunker ready"
        );
        Ok(Self {
            budget: CycleBudget::new(config.max_chunks),
            config,
            symbols,
            stats: ChunkerStats::default(),
            decision_cycle: 1,
            rule_counter: 0,
            duplicates_by_rule: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Settings are validated and read at the start of every attempt.
    pub fn config_mut(&mut self) -> &mut ChunkerConfig {
        &mut self.config
    }

    /// Replace the configuration. The new settings take effect on the next
    /// attempt; the running cycle's budget keeps its count.
    pub fn set_config(&mut self, config: ChunkerConfig) -> EbcResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Apply one `name value` option, as a host command line would.
    pub fn apply_option(&mut self, option: &str, value: &str) -> EbcResult<()> {
        self.config.apply(option, value)
    }

    pub fn stats(&self) -> &ChunkerStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn decision_cycle(&self) -> u64 {
        self.decision_cycle
    }

    pub fn budget(&self) -> CycleBudget {
        self.budget
    }

    /// Start a new decision cycle: the chunk budget and duplicate counts reset.
    pub fn begin_decision_cycle(&mut self) {
        self.decision_cycle += 1;
        self.budget = CycleBudget::new(self.config.max_chunks);
        tracing::trace!(cycle = self.decision_cycle, "decision cycle");
    }

    /// Whether a firing of `production` matching `goal` may learn a chunk
    /// rather than a justification.
    pub fn learning_on_for(
        &self,
        graph: &CausalGraph,
        production: Option<&str>,
        goal: SymbolId,
    ) -> bool {
        if !self.config.learning_allowed_for(production) {
            return false;
        }
        !self.config.bottom_only
            || graph
                .identifier(goal)
                .is_some_and(|info| info.allow_bottom_up_chunks)
    }

    /// Try to learn from one firing, then from whatever that learning fires.
    ///
    /// Higher goals have bottom-up learning suspended while the attempt runs
    /// and restored when it returns.
    pub fn attempt_chunk(
        &mut self,
        graph: &mut CausalGraph,
        network: &mut dyn RuleNetwork,
        inst: InstantiationId,
    ) -> EbcResult<ChunkReport> {
        if graph.instantiation(inst).is_none() {
            return Err(GraphError::UnknownInstantiation { id: inst.get() }.into());
        }
        self.config.validate()?;
        self.budget.set_limit(self.config.max_chunks);
        let mut attempt = Attempt {
            budget: self.budget,
            report: ChunkReport::default(),
            disabled_goals: Vec::new(),
        };

        let result = self.build(graph, network, inst, &mut attempt, 0);

        for goal in attempt.disabled_goals.drain(..) {
            graph.set_allow_bottom_up_chunks(goal, true);
        }
        self.budget = attempt.budget;
        result?;
        Ok(attempt.report)
    }

    fn build(
        &mut self,
        graph: &mut CausalGraph,
        network: &mut dyn RuleNetwork,
        inst: InstantiationId,
        attempt: &mut Attempt,
        depth: usize,
    ) -> EbcResult<()> {
        let (outcome, synthetic) = self.build_one(graph, network, inst, attempt)?;
        if depth == 0 {
            attempt.report.outcome = outcome;
        } else if outcome != ChunkOutcome::NotAttempted {
            attempt.report.cascade.push(outcome);
        }

        if let Some(next) = synthetic {
            attempt.report.instantiations.push(next);
            if !attempt.budget.exhausted {
                self.build(graph, network, next, attempt, depth + 1)?;
            }
        }
        Ok(())
    }

    fn build_one(
        &mut self,
        graph: &mut CausalGraph,
        network: &mut dyn RuleNetwork,
        inst_id: InstantiationId,
        attempt: &mut Attempt,
    ) -> EbcResult<(ChunkOutcome, Option<InstantiationId>)> {
        let Some(inst) = graph.instantiation(inst_id) else {
            return Err(GraphError::UnknownInstantiation { id: inst_id.get() }.into());
        };
        if !can_learn_from(graph, inst) {
            return Ok((ChunkOutcome::NotAttempted, None));
        }
        let Some(match_goal) = inst.match_goal else {
            return Ok((ChunkOutcome::NotAttempted, None));
        };
        let match_level = inst.match_goal_level;
        let production = inst.production.clone();
        let origin = inst.origin_rule().to_string();
        let learning = self.learning_on_for(graph, production.as_deref(), match_goal);

        let mut ctx = BuildContext::new(Arc::clone(&self.symbols), inst_id, match_goal, match_level);
        collect_results(graph, &mut ctx);
        if ctx.results.is_empty() {
            ctx.transition(BuildState::Aborted);
            return Ok((ChunkOutcome::Failed(FailureReason::NoResults), None));
        }

        if attempt.budget.used >= attempt.budget.limit {
            attempt.budget.exhausted = true;
            self.stats.max_chunks += 1;
            tracing::warn!(
                limit = attempt.budget.limit,
                rule = %origin,
                "max-chunks reached, not learning this cycle"
            );
            ctx.transition(BuildState::Aborted);
            return Ok((ChunkOutcome::Failed(FailureReason::MaxChunks), None));
        }
        if let Some(production) = &production {
            if let Some(&(cycle, count)) = self.duplicates_by_rule.get(production) {
                if cycle == self.decision_cycle && count >= self.config.max_dupes {
                    self.stats.max_dupes += 1;
                    tracing::warn!(
                        rule = %production,
                        limit = self.config.max_dupes,
                        "max-dupes reached for rule this cycle"
                    );
                    ctx.transition(BuildState::Aborted);
                    return Ok((ChunkOutcome::Failed(FailureReason::MaxDupes), None));
                }
            }
        }
        attempt.budget.used += 1;
        self.suspend_higher_goals(graph, match_goal, attempt);

        // ── Dependency analysis ──
        ctx.transition(BuildState::Analyzing);
        perform_dependency_analysis(graph, &mut ctx);
        if learning {
            self.stats.chunks_attempted += 1;
        } else {
            self.stats.justifications_attempted += 1;
        }

        ctx.transition(BuildState::CollectingConditions);
        let negations = create_initial_conditions(graph, &mut ctx);
        if negations.local > 0 {
            self.stats.tested_local_negation += 1;
            if !self.config.allow_local_negations {
                ctx.reliable = false;
                tracing::warn!(
                    rule = %origin,
                    negations = negations.local,
                    "result depends on a negation of substate structure"
                );
            }
        }
        if ctx.pairs.is_empty() {
            self.stats.no_grounds += 1;
            tracing::warn!(rule = %origin, "result has no grounds in the superstate, not learning");
            if self.config.interrupt_on_warning {
                request_stop(&mut attempt.report, "learning found no grounds");
            }
            ctx.transition(BuildState::Aborted);
            return Ok((ChunkOutcome::Failed(FailureReason::NoGrounds), None));
        }

        ctx.variablize = learning && ctx.reliable;
        if learning
            && !ctx.reliable
            && self.config.interrupt_on_warning
            && !self.config.allow_local_negations
        {
            request_stop(&mut attempt.report, "learned rule would test substate negations");
        }
        let mut kind = if ctx.variablize {
            RuleKind::Chunk
        } else {
            RuleKind::Justification
        };
        ctx.name = Some(rule_name(
            &self.symbols,
            kind,
            &origin,
            self.decision_cycle,
            &mut self.rule_counter,
        )?);

        // ── Variablization ──
        if ctx.variablize {
            save_ground_copy(&mut ctx);
            self.symbols.reset_variable_generator();
            ctx.transition(BuildState::Variablizing);
            variablize_conditions(&mut ctx)?;
            merge_conditions(&mut ctx);
        }
        self.symbols.reset_variable_generator();
        build_actions(graph, &mut ctx)?;
        add_goal_tests(graph, &mut ctx);

        // ── Validation ──
        ctx.transition(BuildState::Validating);
        let mut ungrounded = false;
        let order = loop {
            let generalized: Vec<_> = ctx.pairs.iter().map(|p| p.generalized.clone()).collect();
            match network.reorder_and_validate(&self.symbols, &generalized, &ctx.actions) {
                Ok(order) => break order,
                Err(report) if ctx.variablize => {
                    tracing::warn!(issues = %report, "chunk failed validation, reverting to justification");
                    ctx.transition(BuildState::Reverting);
                    self.stats.chunks_reverted += 1;
                    kind = RuleKind::Justification;
                    ctx.variablize = false;
                    ctx.release_name();
                    ctx.name = Some(rule_name(
                        &self.symbols,
                        kind,
                        &origin,
                        self.decision_cycle,
                        &mut self.rule_counter,
                    )?);
                    rebuild_from_saved(&mut ctx);
                    build_actions(graph, &mut ctx)?;
                    add_goal_tests(graph, &mut ctx);
                    ctx.transition(BuildState::Validating);
                }
                Err(report) if self.config.dont_add_bad_justifications => {
                    self.stats.ungrounded_justifications_ignored += 1;
                    tracing::warn!(issues = %report, "justification failed validation, not adding it");
                    ctx.transition(BuildState::Aborted);
                    return Ok((ChunkOutcome::Failed(FailureReason::ValidationRejected), None));
                }
                Err(report) => {
                    self.stats.ungrounded_justifications_added += 1;
                    tracing::warn!(issues = %report, "adding justification that failed validation");
                    ungrounded = true;
                    break (0..ctx.pairs.len()).collect();
                }
            }
        };
        apply_order(&mut ctx, &order);

        // ── Installation ──
        ctx.transition(BuildState::Installing);
        let (name, label) = match ctx.name.take() {
            Some(named) => named,
            None => rule_name(
                &self.symbols,
                kind,
                &origin,
                self.decision_cycle,
                &mut self.rule_counter,
            )?,
        };
        let (grounds, generalized): (Vec<_>, Vec<_>) = ctx
            .pairs
            .drain(..)
            .map(|pair| (pair.ground, pair.generalized))
            .unzip();
        let rule = Rule {
            name,
            label: label.clone(),
            kind,
            conditions: generalized,
            actions: std::mem::take(&mut ctx.actions),
            origin: Some(origin.clone()),
            ungrounded,
        };
        let insert = network.insert_rule(rule, Some(&grounds));
        let (outcome, in_ms) = self.dispatch_insert(
            network,
            insert,
            kind,
            &label,
            production.as_deref(),
            &origin,
            &mut attempt.report,
        );

        let spec = InstantiationSpec {
            production: Some(label),
            match_goal: graph.deepest_goal_of(&grounds),
            conditions: grounds,
        };
        let synthetic = graph.adopt_instantiation(spec, Some(origin), ctx.reliable);
        if let Some(i) = graph.instantiation_mut(synthetic) {
            i.in_ms = in_ms;
        }
        make_result_clones(graph, &ctx, synthetic, kind == RuleKind::Chunk)?;

        ctx.transition(BuildState::Idle);
        Ok((outcome, Some(synthetic)))
    }

    /// Turn off bottom-up learning on every goal above `goal`, stopping at
    /// the first one already off.
    fn suspend_higher_goals(&self, graph: &mut CausalGraph, goal: SymbolId, attempt: &mut Attempt) {
        let mut next = graph.identifier(goal).and_then(|info| info.higher_goal);
        while let Some(higher) = next {
            let Some(info) = graph.identifier(higher) else {
                break;
            };
            if !info.allow_bottom_up_chunks {
                break;
            }
            next = info.higher_goal;
            graph.set_allow_bottom_up_chunks(higher, false);
            attempt.disabled_goals.push(higher);
        }
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("decision_cycle", &self.decision_cycle)
            .field("budget", &self.budget)
            .field("stats", &self.stats)
            .finish()
    }
}
