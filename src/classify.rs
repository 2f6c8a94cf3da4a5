//! Diff Classification side table.
//!
//! Per the redesign notes, classifications are *not* stored as a tagged
//! field smuggled into the symbol record (the original overloads a
//! `void*` for this); they live in a side table keyed by the symbol's
//! original index in the "A" (first/original) ELF view.

use std::collections::HashMap;

/// One symbol's diff classification. Starts `Unchanged`; transitions are
/// monotone — once a symbol is marked changed it never reverts (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No observable difference between A and B.
    Unchanged,
    /// Present in A, not in B, and tagged `is_var`.
    NewVariable,
    /// Present in both, `is_var`, and judged different.
    ModifiedVariable,
    /// Present in A, not in B, and tagged `is_fun`.
    NewFunction,
    /// Present in both, `is_fun`, and judged different (including via
    /// near-jump propagation from an already-changed function).
    ModifiedFunction,
}

impl Classification {
    /// Anything other than `Unchanged` counts toward diff output.
    pub fn is_changed(self) -> bool {
        !matches!(self, Classification::Unchanged)
    }

    /// Display text matching §6's `diff` output contract
    /// (`Modified function: <name>`, etc.).
    pub fn label(self) -> &'static str {
        match self {
            Classification::Unchanged => "Unchanged",
            Classification::NewVariable => "New variable",
            Classification::ModifiedVariable => "Modified variable",
            Classification::NewFunction => "New function",
            Classification::ModifiedFunction => "Modified function",
        }
    }
}

/// Classifications keyed by original (A-side) symbol index.
#[derive(Debug, Default)]
pub struct ClassificationTable {
    entries: HashMap<usize, Classification>,
}

impl ClassificationTable {
    /// An empty table; every symbol defaults to `Unchanged` when queried.
    pub fn new() -> Self {
        ClassificationTable { entries: HashMap::new() }
    }

    /// Current classification of `index`, `Unchanged` if never set.
    pub fn get(&self, index: usize) -> Classification {
        self.entries.get(&index).copied().unwrap_or(Classification::Unchanged)
    }

    /// Monotone set: refuses to downgrade a symbol back toward
    /// `Unchanged`, matching §3's "transitions are monotone" invariant.
    pub fn set(&mut self, index: usize, classification: Classification) {
        if classification == Classification::Unchanged {
            return;
        }
        self.entries.insert(index, classification);
    }

    /// Number of symbols classified as anything other than `Unchanged`.
    pub fn changed_count(&self) -> usize {
        self.entries.values().filter(|c| c.is_changed()).count()
    }

    /// Iterate `(index, classification)` pairs for every changed symbol.
    pub fn changed(&self) -> impl Iterator<Item = (usize, Classification)> + '_ {
        self.entries.iter().filter(|(_, c)| c.is_changed()).map(|(&i, &c)| (i, c))
    }
}
