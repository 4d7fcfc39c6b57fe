//! Symbol table: interning plus reference counting.
//!
//! The [`SymbolTable`] is shared between the host reasoning loop and the
//! chunker (wrap it in an `Arc`). Constants and variables are interned by
//! value so the same literal always maps to the same [`SymbolId`];
//! identifiers are always fresh. Every holder of a symbol owns one
//! reference: `acquire` on store, `release` on drop. A symbol whose count
//! reaches zero is removed from the table.
//!
//! Counting mistakes are logic defects in the caller, so `acquire` on an
//! unknown symbol and `release` below zero panic instead of returning errors.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::EbcResult;
use crate::symbol::{AtomicSymbolAllocator, SymbolId, SymbolKind, SymbolMeta};

#[derive(Debug, Clone)]
struct SymbolEntry {
    meta: SymbolMeta,
    refs: u64,
}

/// Reference-counted symbol table.
pub struct SymbolTable {
    /// SymbolId → metadata and reference count (source of truth).
    entries: DashMap<SymbolId, SymbolEntry>,
    /// Intern key → SymbolId for constants and variables.
    interned: DashMap<String, SymbolId>,
    allocator: AtomicSymbolAllocator,
    /// Next number per identifier letter (`S1`, `S2`, `O1`, ...).
    id_numbers: DashMap<char, u64>,
    /// Next uniquifier per generated-variable prefix.
    var_numbers: DashMap<char, u64>,
}

impl SymbolTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            interned: DashMap::new(),
            allocator: AtomicSymbolAllocator::new(),
            id_numbers: DashMap::new(),
            var_numbers: DashMap::new(),
        }
    }

    /// Create a fresh identifier with the given name letter. The caller owns one reference.
    pub fn make_identifier(&self, letter: char) -> EbcResult<SymbolId> {
        let letter = letter.to_ascii_uppercase();
        let number = {
            let mut n = self.id_numbers.entry(letter).or_insert(0);
            *n += 1;
            *n
        };
        let id = self.allocator.next_id()?;
        self.entries.insert(
            id,
            SymbolEntry {
                meta: SymbolMeta::new(id, SymbolKind::Identifier { letter, number }),
                refs: 1,
            },
        );
        Ok(id)
    }

    /// Intern a constant or variable. The caller owns one new reference.
    ///
    /// Identifiers cannot be interned; use [`SymbolTable::make_identifier`].
    pub fn intern(&self, kind: SymbolKind) -> EbcResult<SymbolId> {
        let Some(key) = kind.intern_key() else {
            return Err(crate::error::SymbolError::NotInternable {
                label: kind.to_string(),
            }
            .into());
        };
        match self.interned.entry(key) {
            Entry::Occupied(mut e) => {
                let id = *e.get();
                if let Some(mut entry) = self.entries.get_mut(&id) {
                    entry.refs += 1;
                    return Ok(id);
                }
                // A concurrent release removed the symbol but not its key yet.
                let id = self.insert_entry(kind)?;
                e.insert(id);
                Ok(id)
            }
            Entry::Vacant(v) => {
                let id = self.insert_entry(kind)?;
                v.insert(id);
                Ok(id)
            }
        }
    }

    fn insert_entry(&self, kind: SymbolKind) -> EbcResult<SymbolId> {
        let id = self.allocator.next_id()?;
        self.entries.insert(
            id,
            SymbolEntry {
                meta: SymbolMeta::new(id, kind),
                refs: 1,
            },
        );
        Ok(id)
    }

    /// Intern a string constant.
    pub fn str_constant(&self, value: &str) -> EbcResult<SymbolId> {
        self.intern(SymbolKind::Str(value.to_string()))
    }

    /// Intern an integer constant.
    pub fn int_constant(&self, value: i64) -> EbcResult<SymbolId> {
        self.intern(SymbolKind::Int(value))
    }

    /// Intern a variable by name (without angle brackets).
    pub fn variable(&self, name: &str) -> EbcResult<SymbolId> {
        self.intern(SymbolKind::Variable(name.to_string()))
    }

    /// Generate a variable that does not collide with any live variable.
    ///
    /// Names are `<prefix><n>`; `n` restarts at 1 after
    /// [`SymbolTable::reset_variable_generator`].
    pub fn generate_new_variable(&self, prefix: char) -> EbcResult<SymbolId> {
        let prefix = prefix.to_ascii_lowercase();
        loop {
            let n = {
                let mut n = self.var_numbers.entry(prefix).or_insert(0);
                *n += 1;
                *n
            };
            let name = format!("{prefix}{n}");
            if !self.interned.contains_key(&format!("v:{name}")) {
                return self.variable(&name);
            }
        }
    }

    /// Restart generated-variable numbering for every prefix.
    pub fn reset_variable_generator(&self) {
        self.var_numbers.clear();
    }

    /// Add one reference to a live symbol.
    pub fn acquire(&self, id: SymbolId) {
        match self.entries.get_mut(&id) {
            Some(mut entry) => entry.refs += 1,
            None => panic!("acquire on unknown symbol {id}"),
        }
    }

    /// Drop one reference; the symbol is removed when its count reaches zero.
    ///
    /// The decrement and the removal happen under one shard lock, so a
    /// concurrent `intern` either revives the entry first or misses it.
    pub fn release(&self, id: SymbolId) {
        let mut found = false;
        let removed = self.entries.remove_if_mut(&id, |_, entry| {
            found = true;
            assert!(entry.refs > 0, "release below zero on symbol {id}");
            entry.refs -= 1;
            entry.refs == 0
        });
        if !found {
            panic!("release on unknown symbol {id}");
        }
        if let Some((_, entry)) = removed {
            self.forget_interned(id, &entry.meta.kind);
        }
    }

    /// Drop the intern key of a removed symbol unless it was re-interned meanwhile.
    fn forget_interned(&self, id: SymbolId, kind: &SymbolKind) {
        if let Some(key) = kind.intern_key() {
            self.interned.remove_if(&key, |_, current| *current == id);
        }
    }

    /// Acquire every symbol yielded by the iterator.
    pub fn acquire_all(&self, ids: impl IntoIterator<Item = SymbolId>) {
        for id in ids {
            self.acquire(id);
        }
    }

    /// Release every symbol yielded by the iterator.
    pub fn release_all(&self, ids: impl IntoIterator<Item = SymbolId>) {
        for id in ids {
            self.release(id);
        }
    }

    /// Current reference count (0 for symbols that are no longer live).
    pub fn ref_count(&self, id: SymbolId) -> u64 {
        self.entries.get(&id).map(|e| e.refs).unwrap_or(0)
    }

    /// Look up symbol metadata.
    pub fn meta(&self, id: SymbolId) -> Option<SymbolMeta> {
        self.entries.get(&id).map(|e| e.meta.clone())
    }

    /// Look up the kind of a symbol.
    pub fn kind(&self, id: SymbolId) -> Option<SymbolKind> {
        self.entries.get(&id).map(|e| e.meta.kind.clone())
    }

    pub fn is_identifier(&self, id: SymbolId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.meta.kind.is_identifier())
    }

    pub fn is_variable(&self, id: SymbolId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.meta.kind.is_variable())
    }

    /// Prefix letter for a variable generalizing this symbol.
    pub fn variable_prefix(&self, id: SymbolId) -> char {
        self.entries
            .get(&id)
            .map(|e| e.meta.variable_prefix())
            .unwrap_or('c')
    }

    /// Render a symbol, falling back to `sym:{id}` for dead symbols.
    pub fn label(&self, id: SymbolId) -> String {
        self.entries
            .get(&id)
            .map(|e| e.meta.label())
            .unwrap_or_else(|| id.to_string())
    }

    /// Look up an interned string constant without acquiring it.
    pub fn lookup_str(&self, value: &str) -> Option<SymbolId> {
        self.interned.get(&format!("s:{value}")).map(|r| *r.value())
    }

    /// Number of live symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_numbered_per_letter() {
        let table = SymbolTable::new();
        let s1 = table.make_identifier('s').unwrap();
        let o1 = table.make_identifier('O').unwrap();
        let s2 = table.make_identifier('S').unwrap();
        assert_eq!(table.label(s1), "S1");
        assert_eq!(table.label(o1), "O1");
        assert_eq!(table.label(s2), "S2");
        assert!(table.is_identifier(s1));
    }

    #[test]
    fn constants_are_interned_and_counted() {
        let table = SymbolTable::new();
        let a = table.str_constant("red").unwrap();
        let b = table.str_constant("red").unwrap();
        assert_eq!(a, b);
        assert_eq!(table.ref_count(a), 2);
        assert_eq!(table.lookup_str("red"), Some(a));
        assert_ne!(table.int_constant(5).unwrap(), table.str_constant("5").unwrap());
    }

    #[test]
    fn release_to_zero_removes_symbol() {
        let table = SymbolTable::new();
        let red = table.str_constant("red").unwrap();
        table.acquire(red);
        table.release(red);
        table.release(red);
        assert_eq!(table.ref_count(red), 0);
        assert!(table.meta(red).is_none());
        assert!(table.lookup_str("red").is_none());

        // Re-interning yields a fresh symbol.
        let again = table.str_constant("red").unwrap();
        assert_ne!(again, red);
    }

    #[test]
    fn generated_variables_skip_live_names() {
        let table = SymbolTable::new();
        let taken = table.variable("o1").unwrap();
        let fresh = table.generate_new_variable('o').unwrap();
        assert_ne!(fresh, taken);
        assert_eq!(table.label(fresh), "<o2>");
        assert!(table.is_variable(fresh));
    }

    #[test]
    fn reset_restarts_numbering() {
        let table = SymbolTable::new();
        let v = table.generate_new_variable('s').unwrap();
        assert_eq!(table.label(v), "<s1>");
        table.release(v);
        table.reset_variable_generator();
        let w = table.generate_new_variable('s').unwrap();
        assert_eq!(table.label(w), "<s1>");
    }

    #[test]
    fn identifiers_cannot_be_interned() {
        let table = SymbolTable::new();
        let result = table.intern(SymbolKind::Identifier {
            letter: 'S',
            number: 1,
        });
        assert!(result.is_err());
    }

    #[test]
    fn intern_replaces_a_key_whose_symbol_was_removed() {
        let table = SymbolTable::new();
        let red = table.str_constant("red").unwrap();
        // State between a concurrent release's removal and its key cleanup.
        let (_, entry) = table.entries.remove(&red).unwrap();

        let again = table.str_constant("red").unwrap();
        assert_ne!(again, red);
        assert_eq!(table.lookup_str("red"), Some(again));

        // The late cleanup leaves the new mapping alone.
        table.forget_interned(red, &entry.meta.kind);
        assert_eq!(table.lookup_str("red"), Some(again));
        assert_eq!(table.ref_count(again), 1);
    }

    #[test]
    fn concurrent_intern_and_release_keep_live_symbols() {
        let table = SymbolTable::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..2_000 {
                        let shared = table.str_constant("shared").unwrap();
                        assert!(table.meta(shared).is_some());
                        assert_eq!(table.lookup_str("shared"), Some(shared));
                        table.release(shared);
                    }
                });
            }
        });
        assert!(table.is_empty());
        assert!(table.lookup_str("shared").is_none());
    }

    #[test]
    #[should_panic(expected = "release on unknown symbol")]
    fn double_release_panics() {
        let table = SymbolTable::new();
        let red = table.str_constant("red").unwrap();
        table.release(red);
        table.release(red);
    }
}
