//! Symbol Resolver (C2): maps a relocation into the symbol it semantically
//! refers to, unwrapping section-symbol + addend references into the
//! actual function/variable/string they point at.

use goblin::elf::sym;

use crate::elf::{ElfView, Relocation, SymbolRecord};
use crate::error::{Error, Result};

/// The symbol a relocation actually refers to, plus the displacement past
/// its start if it was reached through a section-symbol reference.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The resolved symbol.
    pub symbol: SymbolRecord,
    /// Nonzero when `symbol` was reached via a section symbol with a
    /// nonzero effective addend that didn't land exactly on `symbol`'s
    /// start, or when no covering symbol was found at all (in which case
    /// this is the raw effective addend into the section).
    pub inner_offset: Option<u64>,
}

impl Resolved {
    /// `<name>` when `inner_offset` is absent or zero, `<name+0xNN>`
    /// otherwise — the display contract §9 requires be preserved since the
    /// disassembly fallback in C5 compares rendered text.
    pub fn display(&self) -> String {
        match self.inner_offset {
            Some(off) if off != 0 => format!("{}+{:#x}", self.symbol.name, off),
            _ => self.symbol.name.clone(),
        }
    }
}

/// Resolve relocation `reloc` (found in a `.rela` section whose entries
/// apply to `_target_section`) to the symbol it semantically references.
///
/// §4.2: section-symbol references are unwrapped by searching for a
/// symbol in the same defining section whose `[st_value, st_value+st_size)`
/// range covers the effective addend (PC32/PLT32 relocations add 4 to
/// account for the instruction bytes the operand itself consumes).
pub fn resolve(view: &ElfView, reloc: &Relocation) -> Result<Resolved> {
    let sym = view.symbols.get(reloc.sym_index).ok_or_else(|| {
        log::error!("resolve: relocation references out-of-range symbol {}", reloc.sym_index);
        Error::malformed_at("relocation references out-of-range symbol", reloc.sym_index)
    })?;

    if sym.is_undefined() || sym.size > 0 || sym.sym_type == sym::STT_FUNC || sym.sym_type == sym::STT_OBJECT {
        return Ok(Resolved { symbol: sym.clone(), inner_offset: None });
    }

    // sym is a section symbol (or at least zero-sized and untyped): resolve
    // through its defining section via the effective addend.
    let mut effective_addend = reloc.addend;
    if reloc.is_pc_relative() {
        effective_addend += 4;
    }
    let effective_addend = effective_addend.max(0) as u64;

    let found = view
        .symbols
        .iter()
        .filter(|candidate| candidate.section_index == sym.section_index)
        .find(|candidate| candidate.covers(effective_addend, false));

    match found {
        Some(found) => {
            let inner = effective_addend.saturating_sub(found.value);
            Ok(Resolved { symbol: found.clone(), inner_offset: Some(inner) })
        }
        None => Ok(Resolved { symbol: sym.clone(), inner_offset: Some(effective_addend) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{Section, SymbolRecord};

    fn make_view() -> ElfView {
        let section_sym = SymbolRecord {
            index: 1,
            name: String::new(),
            binding: goblin::elf::sym::STB_LOCAL,
            sym_type: sym::STT_SECTION,
            section_index: 2,
            value: 0,
            size: 0,
        };
        let bar = SymbolRecord {
            index: 2,
            name: "bar".to_string(),
            binding: goblin::elf::sym::STB_GLOBAL,
            sym_type: sym::STT_FUNC,
            section_index: 2,
            value: 12,
            size: 20,
        };
        ElfView {
            sections: vec![
                Section { index: 0, name: String::new(), sh_type: 0, sh_flags: 0, sh_link: 0, sh_info: 0, sh_entsize: 0, sh_size: 0, data: vec![] },
                Section { index: 1, name: ".text".into(), sh_type: 1, sh_flags: 0, sh_link: 0, sh_info: 0, sh_entsize: 0, sh_size: 0, data: vec![] },
                Section { index: 2, name: ".text.foo".into(), sh_type: 1, sh_flags: 0, sh_link: 0, sh_info: 0, sh_entsize: 0, sh_size: 40, data: vec![0; 40] },
            ],
            symbols: vec![
                SymbolRecord { index: 0, name: String::new(), binding: 0, sym_type: 0, section_index: 0, value: 0, size: 0 },
                section_sym,
                bar,
            ],
            relas: vec![],
            machine: goblin::elf::header::EM_X86_64,
        }
    }

    #[test]
    fn unwraps_section_symbol_with_pc_relative_addend() {
        let view = make_view();
        // relocation into .text.foo's section symbol at addend 8, PC32:
        // effective addend = 8 + 4 = 12, which is bar's st_value exactly.
        let reloc = Relocation { offset: 0, addend: 8, sym_index: 1, r_type: goblin::elf::reloc::R_X86_64_PC32 };
        let resolved = resolve(&view, &reloc).unwrap();
        assert_eq!(resolved.symbol.name, "bar");
        assert_eq!(resolved.inner_offset, Some(0));
        assert_eq!(resolved.display(), "bar");
    }

    #[test]
    fn passes_through_defined_function_symbols() {
        let view = make_view();
        let reloc = Relocation { offset: 0, addend: 0, sym_index: 2, r_type: goblin::elf::reloc::R_X86_64_PLT32 };
        let resolved = resolve(&view, &reloc).unwrap();
        assert_eq!(resolved.symbol.name, "bar");
        assert_eq!(resolved.inner_offset, None);
    }
}
