//! Naming, installation and duplicate resolution.

use crate::causal::{CausalGraph, InstantiationId, PreferenceSpec, Slots};
use crate::error::EbcResult;
use crate::registry::SymbolTable;
use crate::rete::{InsertOutcome, RuleKind, RuleNetwork};
use crate::symbol::SymbolId;

use super::context::BuildContext;
use super::{ChunkOutcome, ChunkReport, Chunker};

/// Intern a fresh rule name: `chunk*<origin>*d<cycle>-<n>` or `justify*...`.
pub(crate) fn rule_name(
    table: &SymbolTable,
    kind: RuleKind,
    origin: &str,
    cycle: u64,
    counter: &mut u64,
) -> EbcResult<(SymbolId, String)> {
    let prefix = match kind {
        RuleKind::Chunk => "chunk",
        RuleKind::Justification => "justify",
    };
    loop {
        *counter += 1;
        let label = format!("{prefix}*{origin}*d{cycle}-{counter}");
        if table.lookup_str(&label).is_none() {
            let symbol = table.str_constant(&label)?;
            return Ok((symbol, label));
        }
    }
}

pub(crate) fn request_stop(report: &mut ChunkReport, reason: &str) {
    if report.stop_requested.is_none() {
        report.stop_requested = Some(reason.to_string());
    }
}

impl Chunker {
    /// Classify the network's answer. Returns the outcome and whether the
    /// synthetic instantiation stays in the match set.
    pub(crate) fn dispatch_insert(
        &mut self,
        network: &mut dyn RuleNetwork,
        insert: InsertOutcome,
        kind: RuleKind,
        label: &str,
        production: Option<&str>,
        origin: &str,
        report: &mut ChunkReport,
    ) -> (ChunkOutcome, bool) {
        match insert {
            InsertOutcome::Added | InsertOutcome::RefractedMatched => match kind {
                RuleKind::Chunk => {
                    self.stats.chunks_succeeded += 1;
                    tracing::info!(rule = %label, origin, "learned chunk");
                    if self.config.interrupt_on_chunk {
                        request_stop(report, "learned a new rule");
                    }
                    let watched = self.config.watched_rules.contains(origin)
                        || production.is_some_and(|p| self.config.watched_rules.contains(p));
                    if self.config.interrupt_on_watched_chunk && watched {
                        request_stop(report, "learned a new rule from a watched rule");
                    }
                    (ChunkOutcome::Learned(label.to_string()), true)
                }
                RuleKind::Justification => {
                    self.stats.justifications_succeeded += 1;
                    tracing::info!(rule = %label, origin, "learned justification");
                    (ChunkOutcome::LearnedJustification(label.to_string()), true)
                }
            },
            InsertOutcome::Duplicate {
                existing,
                candidate,
            } => {
                if let Some(production) = production {
                    let cycle = self.decision_cycle;
                    let entry = self
                        .duplicates_by_rule
                        .entry(production.to_string())
                        .or_insert((cycle, 0));
                    if entry.0 != cycle {
                        *entry = (cycle, 0);
                    }
                    entry.1 += 1;
                }
                self.stats.duplicates += 1;
                tracing::debug!(candidate = %label, existing = %existing, "learned rule is a duplicate");
                candidate.release(&self.symbols);
                (ChunkOutcome::Duplicate { existing }, false)
            }
            InsertOutcome::RefractedNoMatch => {
                if self.config.interrupt_on_warning {
                    request_stop(report, "learned rule did not match working memory");
                }
                match kind {
                    RuleKind::Justification => {
                        self.stats.justification_did_not_match += 1;
                        tracing::warn!(rule = %label, "justification did not match working memory, excised");
                        if let Some(rule) = network.remove_rule(label) {
                            rule.release(&self.symbols);
                        }
                        (ChunkOutcome::Excised(label.to_string()), false)
                    }
                    RuleKind::Chunk => {
                        self.stats.chunk_did_not_match += 1;
                        tracing::warn!(rule = %label, "chunk did not match working memory");
                        (ChunkOutcome::Learned(label.to_string()), true)
                    }
                }
            }
        }
    }
}

/// Give the synthetic instantiation clones of the build's results, linked
/// into each result's clone group.
pub(crate) fn make_result_clones(
    graph: &mut CausalGraph,
    ctx: &BuildContext,
    synthetic: InstantiationId,
    for_chunk: bool,
) -> EbcResult<()> {
    for &result in &ctx.results {
        let Some(p) = graph.preference(result) else {
            continue;
        };
        let identities = if for_chunk {
            let root = |i: Option<_>| i.map(|i| ctx.vars.find(i));
            Slots {
                id: root(p.identities.id),
                attr: root(p.identities.attr),
                value: root(p.identities.value),
                referent: root(p.identities.referent),
            }
        } else {
            p.identities.clone()
        };
        let mut spec = PreferenceSpec::new(p.kind, p.subject, p.attr, p.value)
            .with_identities(identities);
        spec.referent = p.referent;
        spec.original_vars = p.original_vars.clone();
        let clone = graph.add_preference(synthetic, spec)?;
        graph.link_clone(result, clone)?;
    }
    Ok(())
}
