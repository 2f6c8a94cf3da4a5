//! JMP→Reloc Rewriter (C7): converts inter-function near/far jumps that
//! were resolved at compile time (because both sides lived in the same
//! translation unit) into explicit relocations, so a function extracted
//! on its own can still be linked against whatever build provides its
//! callees.

use goblin::elf::reloc;

use crate::disasm::decode;
use crate::disasm::{read_signed, resolve_control_flow_target, target_section_offset};
use crate::elf::{ElfView, Relocation, SymbolRecord};
use crate::error::{Error, Result};

/// Walk `code` (the function's own bytes, function-local offsets) and
/// rewrite every 4-byte-operand control-flow instruction whose displacement
/// is nonzero (i.e. not already backed by a relocation) and which targets a
/// *different* symbol than `function` itself.
///
/// `register_target` is given the resolved target symbol and must return
/// its index in the output symbol table (creating it there if needed);
/// this lets the caller (the Extractor, via the Builder) decide whether the
/// target becomes a full copy or an external reference.
///
/// Returns the new RELA entries to append to the function's relocation
/// section. `code` is mutated in place: the 4 displacement bytes of each
/// rewritten instruction are zeroed.
pub fn rewrite_function<F>(
    view: &ElfView,
    function: &SymbolRecord,
    code: &mut [u8],
    mut register_target: F,
) -> Result<Vec<Relocation>>
where
    F: FnMut(&SymbolRecord) -> Result<usize>,
{
    let mut new_relocs = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let inst = decode::decode(code, offset);
        let step = inst.length.max(1);
        if let Some(cf) = inst.control_flow {
            if cf.operand_size == 4 {
                let op_start = inst.offset + cf.operand_off;
                let op_end = op_start + 4;
                if op_end <= code.len() {
                    let nonzero = code[op_start..op_end].iter().any(|&b| b != 0);
                    if nonzero {
                        let displacement = read_signed(&code[op_start..op_end]);
                        let target = target_section_offset(function.value, inst.offset, inst.length, displacement);
                        let resolved = resolve_control_flow_target(view, function.section_index, target).ok_or_else(|| {
                            log::error!("unresolved call target in {} at offset {:#x}", function.name, inst.offset);
                            Error::UnresolvedCallTarget { function: function.name.clone(), offset: inst.offset }
                        })?;
                        if resolved.symbol.index != function.index {
                            let new_index = register_target(&resolved.symbol)?;
                            code[op_start..op_end].copy_from_slice(&[0, 0, 0, 0]);
                            let inner = resolved.inner_offset.unwrap_or(0) as i64;
                            new_relocs.push(Relocation {
                                offset: function.value + inst.offset as u64 + cf.operand_off as u64,
                                addend: inner - 4,
                                sym_index: new_index,
                                r_type: reloc::R_X86_64_PC32,
                            });
                        }
                    }
                }
            }
        }
        offset += step;
    }
    Ok(new_relocs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::Section;
    use goblin::elf::sym;

    fn sample() -> (ElfView, SymbolRecord) {
        // foo: call bar, where bar starts 5 bytes after the call
        // instruction ends (so the pre-computed displacement is nonzero,
        // not indistinguishable from an unrelocated placeholder).
        let mut data = vec![0xE8, 0x05, 0x00, 0x00, 0x00]; // foo: call bar
        data.extend_from_slice(&[0x90; 5]); // padding
        data.extend_from_slice(&[0xC3]); // bar: ret
        let section = Section { index: 1, name: ".text".into(), sh_type: 1, sh_flags: 0, sh_link: 0, sh_info: 0, sh_entsize: 0, sh_size: data.len() as u64, data };
        let foo = SymbolRecord { index: 1, name: "foo".into(), binding: sym::STB_GLOBAL, sym_type: sym::STT_FUNC, section_index: 1, value: 0, size: 5 };
        let bar = SymbolRecord { index: 2, name: "bar".into(), binding: sym::STB_GLOBAL, sym_type: sym::STT_FUNC, section_index: 1, value: 10, size: 1 };
        let view = ElfView {
            sections: vec![Section { index: 0, name: String::new(), sh_type: 0, sh_flags: 0, sh_link: 0, sh_info: 0, sh_entsize: 0, sh_size: 0, data: vec![] }, section],
            symbols: vec![SymbolRecord { index: 0, name: String::new(), binding: 0, sym_type: 0, section_index: 0, value: 0, size: 0 }, foo.clone(), bar],
            relas: vec![],
            machine: goblin::elf::header::EM_X86_64,
        };
        (view, foo)
    }

    #[test]
    fn zeroes_displacement_and_emits_rela() {
        let (view, foo) = sample();
        let section = view.section_by_index(1).unwrap().clone();
        let mut code = section.data[0..5].to_vec();
        let relocs = rewrite_function(&view, &foo, &mut code, |sym| Ok(if sym.name == "bar" { 7 } else { 0 })).unwrap();
        assert_eq!(code, vec![0xE8, 0, 0, 0, 0]);
        assert_eq!(relocs[0].offset, 1);
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].sym_index, 7);
        assert_eq!(relocs[0].addend, -4);
        assert_eq!(relocs[0].r_type, goblin::elf::reloc::R_X86_64_PC32);
    }
}
