//! `callchain` command (SPEC_FULL.md §E.1): for every function symbol, a
//! DFS over its relocation targets that are themselves functions, printing
//! every root-to-leaf path. Grounded on `elfutils.c`'s
//! `symbolCallees`/`printCallees`.

use std::collections::HashSet;

use crate::elf::ElfView;
use crate::error::Result;
use crate::resolve::resolve;

/// One function's resolved, deduplicated function-typed callees, in
/// relocation order.
fn callees(view: &ElfView, function_index: usize) -> Result<Vec<usize>> {
    let function = &view.symbols[function_index];
    let Some(rela) = view.rela_section_for(function.section_index) else { return Ok(Vec::new()) };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in &rela.entries {
        if entry.offset < function.value || entry.offset >= function.value + function.size {
            continue;
        }
        let resolved = resolve(view, entry)?;
        if resolved.symbol.is_fun() && seen.insert(resolved.symbol.index) {
            out.push(resolved.symbol.index);
        }
    }
    Ok(out)
}

/// DFS from `root`, appending every completed root-to-leaf path (as
/// symbol-index lists) to `paths`. Cycle-free: a symbol already on the
/// current path is skipped rather than revisited. A leaf is a function with
/// no resolved function callees (or only already-visited ones).
fn walk(view: &ElfView, root: usize, path: &mut Vec<usize>, on_path: &mut HashSet<usize>, paths: &mut Vec<Vec<usize>>) -> Result<()> {
    path.push(root);
    on_path.insert(root);

    let next: Vec<usize> = callees(view, root)?.into_iter().filter(|c| !on_path.contains(c)).collect();
    if next.is_empty() {
        paths.push(path.clone());
    } else {
        for callee in next {
            walk(view, callee, path, on_path, paths)?;
        }
    }

    on_path.remove(&root);
    path.pop();
    Ok(())
}

/// Compute every call chain starting at every function symbol in `view`,
/// each as a list of symbol names root-first.
pub fn callchains(view: &ElfView) -> Result<Vec<Vec<String>>> {
    let mut all_paths = Vec::new();
    for function in view.functions() {
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        let mut paths = Vec::new();
        walk(view, function.index, &mut path, &mut on_path, &mut paths)?;
        for p in paths {
            all_paths.push(p.into_iter().map(|i| view.symbols[i].name.clone()).collect());
        }
    }
    Ok(all_paths)
}
