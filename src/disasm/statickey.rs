//! Static-Key Normalizer (C4): rewrites the 2/4/5-byte NOP placeholders
//! kernel static keys leave in `__jump_table` into the jump form the
//! kernel would patch them into at runtime, so that byte comparison in C5
//! isn't defeated by a flipped-but-dormant static branch.

use crate::elf::{RelaSection, SymbolRecord};
use crate::error::{Error, Result};

const NOP2: [u8; 2] = [0x66, 0x90];
const NOP4: [u8; 4] = [0x0f, 0x1f, 0x40, 0x00];
const NOP5: [u8; 5] = [0x0f, 0x1f, 0x44, 0x00, 0x00];

/// A single `(code, target)` pair out of `__jump_table`, resolved to
/// section-relative offsets.
struct KeyEntry {
    /// Offset within the function's section where the NOP/jump lives.
    code_addend: u64,
    /// Offset within the function's section the jump should target.
    target_addend: u64,
}

fn key_entries(jump_table_relocs: &RelaSection, symbols: &[SymbolRecord], section_index: usize) -> Vec<KeyEntry> {
    let entries = &jump_table_relocs.entries;
    let mut out = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let code = &entries[i];
        if code.offset % 16 != 0 {
            i += 1;
            continue;
        }
        let belongs = symbols
            .get(code.sym_index)
            .map(|s| s.section_index == section_index)
            .unwrap_or(false);
        if belongs {
            if let Some(target) = entries.get(i + 1) {
                out.push(KeyEntry {
                    code_addend: code.addend.max(0) as u64,
                    target_addend: target.addend.max(0) as u64,
                });
            }
        }
        i += 1;
    }
    out
}

/// Patch every static-key NOP placeholder inside `[function_value,
/// function_value + function_size)` of `section_bytes` into its effective
/// jump form.
///
/// `section_bytes` is the *whole* section's buffer (not a function-local
/// copy): `__jump_table` relocation addends are section-relative, matching
/// the original's own `applyStaticKeys(elf, sym, d_buf)` contract.
pub fn apply_static_keys(
    section_bytes: &mut [u8],
    section_index: usize,
    function_name: &str,
    function_value: u64,
    function_size: u64,
    jump_table_relocs: Option<&RelaSection>,
    symbols: &[SymbolRecord],
) -> Result<()> {
    let Some(jump_table_relocs) = jump_table_relocs else { return Ok(()) };

    for entry in key_entries(jump_table_relocs, symbols, section_index) {
        if entry.code_addend < function_value || entry.code_addend > function_value + function_size {
            continue;
        }
        let addend = entry.code_addend as usize;
        if addend + NOP5.len() > section_bytes.len() {
            log::error!("static key entry out of bounds in {} at offset {:#x}", function_name, addend);
            return Err(Error::malformed_at("static key entry out of section bounds", addend));
        }

        if section_bytes[addend..addend + 2] == NOP2 {
            let disp = entry.target_addend.wrapping_sub(entry.code_addend).wrapping_sub(2) as u8;
            section_bytes[addend] = 0xEB;
            section_bytes[addend + 1] = disp;
        } else if section_bytes[addend..addend + 4] == NOP4 {
            // Marked TODO upstream too: unverified against a real 4-byte
            // jump-table placeholder.
            let disp = entry.target_addend.wrapping_sub(entry.code_addend).wrapping_sub(3) as u16;
            section_bytes[addend] = 0xEA;
            section_bytes[addend + 1..addend + 3].copy_from_slice(&disp.to_le_bytes());
        } else if section_bytes[addend..addend + 5] == NOP5 {
            let disp = entry.target_addend.wrapping_sub(entry.code_addend).wrapping_sub(5) as u32;
            section_bytes[addend] = 0xE9;
            section_bytes[addend + 1..addend + 5].copy_from_slice(&disp.to_le_bytes());
        } else if matches!(section_bytes[addend], 0xEB | 0xEA | 0xE9) {
            // Already patched by a prior normalization pass.
        } else {
            log::error!("unrecognized static_key pattern in {} at offset {:#x}", function_name, addend);
            return Err(Error::UnrecognizedStaticKey {
                function: function_name.to_string(),
                offset: addend,
            });
        }
    }
    Ok(())
}

/// True when any relocation in `__jump_table` references a symbol defined
/// in `section_index` within `[value, value+size)` — used by the
/// extractor's static-key warning (§4.9 step 6).
pub fn references_static_key(
    jump_table_relocs: Option<&RelaSection>,
    symbols: &[SymbolRecord],
    section_index: usize,
    value: u64,
    size: u64,
) -> bool {
    let Some(jump_table_relocs) = jump_table_relocs else { return false };
    key_entries(jump_table_relocs, symbols, section_index)
        .iter()
        .any(|e| e.code_addend >= value && e.code_addend < value + size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::elf::sym;

    fn foo_sym() -> SymbolRecord {
        SymbolRecord {
            index: 3,
            name: "foo".into(),
            binding: sym::STB_GLOBAL,
            sym_type: sym::STT_FUNC,
            section_index: 1,
            value: 0,
            size: 16,
        }
    }

    #[test]
    fn patches_nop5_into_jmp32() {
        let mut section = vec![0u8; 16];
        section[4..9].copy_from_slice(&NOP5);
        let symbols = vec![foo_sym()];
        let jt = RelaSection {
            index: 9,
            name: ".rela__jump_table".into(),
            target_section: 9,
            link: 0,
            entries: vec![
                Relocation { offset: 0, addend: 4, sym_index: 0, r_type: goblin::elf::reloc::R_X86_64_PC32 },
                Relocation { offset: 4, addend: 32, sym_index: 0, r_type: goblin::elf::reloc::R_X86_64_PC32 },
            ],
        };
        apply_static_keys(&mut section, 1, "foo", 0, 16, Some(&jt), &symbols).unwrap();
        assert_eq!(section[4], 0xE9);
        let disp = u32::from_le_bytes(section[5..9].try_into().unwrap());
        assert_eq!(disp, 32u64.wrapping_sub(4).wrapping_sub(5) as u32);
    }

    #[test]
    fn leaves_already_patched_jumps_alone() {
        let mut section = vec![0u8; 16];
        section[4] = 0xEB;
        section[5] = 0x10;
        let symbols = vec![foo_sym()];
        let jt = RelaSection {
            index: 9,
            name: ".rela__jump_table".into(),
            target_section: 9,
            link: 0,
            entries: vec![
                Relocation { offset: 0, addend: 4, sym_index: 0, r_type: goblin::elf::reloc::R_X86_64_PC32 },
                Relocation { offset: 4, addend: 32, sym_index: 0, r_type: goblin::elf::reloc::R_X86_64_PC32 },
            ],
        };
        apply_static_keys(&mut section, 1, "foo", 0, 16, Some(&jt), &symbols).unwrap();
        assert_eq!(section[4], 0xEB);
        assert_eq!(section[5], 0x10);
    }

    #[test]
    fn unrecognized_pattern_is_fatal() {
        let mut section = vec![0u8; 16];
        section[4] = 0x90; // plain single-byte nop, not a jump-table shape
        let symbols = vec![foo_sym()];
        let jt = RelaSection {
            index: 9,
            name: ".rela__jump_table".into(),
            target_section: 9,
            link: 0,
            entries: vec![
                Relocation { offset: 0, addend: 4, sym_index: 0, r_type: goblin::elf::reloc::R_X86_64_PC32 },
                Relocation { offset: 4, addend: 32, sym_index: 0, r_type: goblin::elf::reloc::R_X86_64_PC32 },
            ],
        };
        assert!(apply_static_keys(&mut section, 1, "foo", 0, 16, Some(&jt), &symbols).is_err());
    }
}
