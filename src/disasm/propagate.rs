//! Near-Jump Propagator (C6): iterative fixed-point expansion of the
//! changed set over intra-section jumps whose displacement is too small
//! to ever become a relocation. If a changed function short-jumps into
//! another, that other function must be pulled into the changed set too,
//! or the extracted result would carry a dangling jump.

use crate::classify::{Classification, ClassificationTable};
use crate::disasm::decode;
use crate::disasm::{read_signed, resolve_control_flow_target, target_section_offset};
use crate::elf::ElfView;
use crate::error::Result;

/// Run §4.6's fixed-point loop to completion. `view` is the side the
/// changed functions live in; `classifications` is mutated in place.
///
/// Termination is guaranteed: the changed set only grows, and it's bounded
/// by `view.symbols.len()`.
pub fn propagate(view: &ElfView, classifications: &mut ClassificationTable) -> Result<()> {
    loop {
        let before = classifications.changed_count();

        let changed_functions: Vec<usize> = view
            .functions()
            .filter(|f| {
                matches!(
                    classifications.get(f.index),
                    Classification::NewFunction | Classification::ModifiedFunction
                )
            })
            .map(|f| f.index)
            .collect();

        for function_index in changed_functions {
            let function = &view.symbols[function_index];
            let section = match view.section_by_index(function.section_index) {
                Some(s) => s,
                None => continue,
            };
            let start = function.value as usize;
            let end = (start + function.size as usize).min(section.data.len());
            if start >= end {
                continue;
            }
            let code = &section.data[start..end];

            let mut offset = 0;
            while offset < code.len() {
                let inst = decode::decode(code, offset);
                let step = inst.length.max(1);
                if let Some(cf) = inst.control_flow {
                    if cf.operand_size != 4 {
                        let op_start = inst.offset + cf.operand_off;
                        let op_end = op_start + cf.operand_size;
                        if op_end <= code.len() {
                            let displacement = read_signed(&code[op_start..op_end]);
                            let target = target_section_offset(function.value, inst.offset, inst.length, displacement);
                            if let Some(resolved) = resolve_control_flow_target(view, function.section_index, target) {
                                if resolved.symbol.index != function.index
                                    && classifications.get(resolved.symbol.index) == Classification::Unchanged
                                {
                                    classifications.set(resolved.symbol.index, Classification::ModifiedFunction);
                                }
                            }
                        }
                    }
                }
                offset += step;
            }
        }

        let after = classifications.changed_count();
        if before == after {
            return Ok(());
        }
    }
}
