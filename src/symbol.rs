//! Core symbol types for the chunking engine.
//!
//! Every value that appears in working memory, in a preference, or in a rule
//! is a symbol identified by a [`SymbolId`] and described by [`SymbolMeta`].
//! Identifiers are graph nodes (short-term memory), constants are literal
//! values, and variables only ever appear inside generalized rules.
//! The [`AtomicSymbolAllocator`] hands out IDs for the shared
//! [`SymbolTable`](crate::registry::SymbolTable).

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EbcResult, SymbolError};

/// Unique, niche-optimized identifier for a symbol.
///
/// Uses `NonZeroU64` so that `Option<SymbolId>` is the same size as `SymbolId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SymbolId(NonZeroU64);

impl SymbolId {
    /// Create a `SymbolId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SymbolId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym:{}", self.0)
    }
}

/// Classification of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    /// A short-term memory identifier such as `S1` or `O23`.
    Identifier {
        /// Upper-case name letter.
        letter: char,
        /// Per-letter number.
        number: u64,
    },
    /// A string constant.
    Str(String),
    /// An integer constant.
    Int(i64),
    /// A rule variable such as `<s1>`.
    Variable(String),
}

impl SymbolKind {
    /// Whether this is a short-term identifier.
    pub fn is_identifier(&self) -> bool {
        matches!(self, SymbolKind::Identifier { .. })
    }

    /// Whether this is a rule variable.
    pub fn is_variable(&self) -> bool {
        matches!(self, SymbolKind::Variable(_))
    }

    /// Whether this is a literal constant (string or integer).
    pub fn is_constant(&self) -> bool {
        matches!(self, SymbolKind::Str(_) | SymbolKind::Int(_))
    }

    /// Key used to intern constants and variables. Identifiers are never interned.
    pub(crate) fn intern_key(&self) -> Option<String> {
        match self {
            SymbolKind::Identifier { .. } => None,
            SymbolKind::Str(s) => Some(format!("s:{s}")),
            SymbolKind::Int(i) => Some(format!("i:{i}")),
            SymbolKind::Variable(v) => Some(format!("v:{v}")),
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Identifier { letter, number } => write!(f, "{letter}{number}"),
            SymbolKind::Str(s) => write!(f, "{s}"),
            SymbolKind::Int(i) => write!(f, "{i}"),
            SymbolKind::Variable(v) => write!(f, "<{v}>"),
        }
    }
}

/// Metadata describing a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMeta {
    /// Unique identifier.
    pub id: SymbolId,
    /// What kind of symbol this is.
    pub kind: SymbolKind,
}

impl SymbolMeta {
    pub fn new(id: SymbolId, kind: SymbolKind) -> Self {
        Self { id, kind }
    }

    /// Human-readable rendering (`S1`, `red`, `5`, `<s1>`).
    pub fn label(&self) -> String {
        self.kind.to_string()
    }

    /// Lower-case first letter used as the prefix of generated variables.
    ///
    /// Identifiers use their own name letter, everything else uses `c`.
    pub fn variable_prefix(&self) -> char {
        match self.kind {
            SymbolKind::Identifier { letter, .. } => letter.to_ascii_lowercase(),
            _ => 'c',
        }
    }
}

/// Thread-safe symbol ID allocator.
///
/// Produces monotonically increasing IDs starting from 1.
#[derive(Debug)]
pub struct AtomicSymbolAllocator {
    next: AtomicU64,
}

impl AtomicSymbolAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next symbol ID.
    pub fn next_id(&self) -> EbcResult<SymbolId> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        SymbolId::new(raw).ok_or_else(|| SymbolError::AllocatorExhausted.into())
    }
}

impl Default for AtomicSymbolAllocator {
    fn default() -> Self {
        Self::new()
    }
}
