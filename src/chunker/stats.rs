//! Learning counters.

use serde::{Deserialize, Serialize};

/// Cumulative counters, each independently queryable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerStats {
    pub chunks_attempted: u64,
    pub chunks_succeeded: u64,
    /// Chunks that failed validation and were rebuilt as justifications.
    pub chunks_reverted: u64,
    pub justifications_attempted: u64,
    pub justifications_succeeded: u64,
    pub duplicates: u64,
    pub no_grounds: u64,
    pub max_chunks: u64,
    pub max_dupes: u64,
    pub chunk_did_not_match: u64,
    pub justification_did_not_match: u64,
    pub ungrounded_justifications_added: u64,
    pub ungrounded_justifications_ignored: u64,
    /// Builds whose analysis met a negation on substate structure.
    pub tested_local_negation: u64,
}

impl ChunkerStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Display for ChunkerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "chunks: {} attempted, {} learned, {} reverted",
            self.chunks_attempted, self.chunks_succeeded, self.chunks_reverted
        )?;
        writeln!(
            f,
            "justifications: {} attempted, {} learned, {} ungrounded added, {} ungrounded ignored",
            self.justifications_attempted,
            self.justifications_succeeded,
            self.ungrounded_justifications_added,
            self.ungrounded_justifications_ignored
        )?;
        write!(
            f,
            "duplicates: {}, no grounds: {}, max-chunks: {}, max-dupes: {}, did not match: {}/{}, local negations: {}",
            self.duplicates,
            self.no_grounds,
            self.max_chunks,
            self.max_dupes,
            self.chunk_did_not_match,
            self.justification_did_not_match,
            self.tested_local_negation
        )
    }
}
