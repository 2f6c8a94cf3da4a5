//! Diff orchestration: classifies every symbol in two ELF views as
//! unchanged / new / modified by driving C5 (Function Comparator) and C6
//! (Near-Jump Propagator) over the pair, per §2's "Diff mode" data flow.

use crate::classify::{Classification, ClassificationTable};
use crate::compare::{functions_equal, variables_equal};
use crate::disasm::propagate::propagate;
use crate::elf::ElfView;
use crate::error::Result;

/// One classified symbol in the diff output, named and tagged for display.
#[derive(Debug, Clone)]
pub struct DiffEntry {
    /// Symbol name.
    pub name: String,
    /// Its classification.
    pub classification: Classification,
}

/// Classify every function and variable symbol of `a` against `b`
/// (original vs modified), returning one entry per changed symbol.
///
/// Matches §2's data flow: for each function, C5 (using C2/C3/C4) decides
/// unchanged/modified/new, then C6 iterates to widen the changed set over
/// near-jump reachability before results are emitted.
pub fn diff(a: &ElfView, b: &ElfView) -> Result<Vec<DiffEntry>> {
    let mut classifications = ClassificationTable::new();

    for func_a in a.functions() {
        match b.symbol_by_name_and_type(&func_a.name, func_a.sym_type) {
            None => {
                classifications.set(func_a.index, Classification::NewFunction);
            }
            Some(func_b) => {
                if !functions_equal(a, func_a, b, func_b)? {
                    classifications.set(func_a.index, Classification::ModifiedFunction);
                }
            }
        }
    }

    for var_a in a.variables() {
        match b.symbol_by_name_and_type(&var_a.name, var_a.sym_type) {
            None => {
                classifications.set(var_a.index, Classification::NewVariable);
            }
            Some(var_b) => {
                if !variables_equal(a, var_a, b, var_b)? {
                    classifications.set(var_a.index, Classification::ModifiedVariable);
                }
            }
        }
    }

    // §5: the propagator must reach a fixed point before results are
    // emitted, since a short jump from an already-changed function can
    // still pull in unrelated-looking functions.
    propagate(a, &mut classifications)?;

    let mut entries: Vec<DiffEntry> = classifications
        .changed()
        .map(|(index, classification)| DiffEntry { name: a.symbols[index].name.clone(), classification })
        .collect();
    entries.sort_by(|x, y| x.name.cmp(&y.name));
    Ok(entries)
}
