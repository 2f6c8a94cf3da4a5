//! Function Comparator (C5): decides equality of two same-named functions
//! across two ELF views.

use goblin::elf::section_header;

use crate::disasm::render::render_function;
use crate::disasm::statickey::apply_static_keys;
use crate::elf::{ElfView, SymbolRecord};
use crate::error::Result;
use crate::resolve::resolve;

/// Table-free equivalent of the non-reflected CRC-32 (poly `0x04C11DB7`,
/// init `0`, no final XOR) used to fingerprint relocation targets.
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
        }
    }
    crc
}

fn normalized_function_bytes(view: &ElfView, function: &SymbolRecord) -> Result<Vec<u8>> {
    let section = view.section_by_index(function.section_index).ok_or_else(|| {
        log::error!("functions_equal: {} references missing section {}", function.name, function.section_index);
        crate::error::Error::malformed_at("function references missing section", function.section_index)
    })?;
    let mut bytes = section.data.clone();
    let relocs = view.rela_section_by_name(".rela__jump_table");
    apply_static_keys(&mut bytes, function.section_index, &function.name, function.value, function.size, relocs, &view.symbols)?;
    let start = function.value as usize;
    let end = start + function.size as usize;
    if end > bytes.len() {
        log::error!("functions_equal: {} range exceeds section size", function.name);
        return Err(crate::error::Error::malformed_at("function range exceeds section size", function.index));
    }
    Ok(bytes[start..end].to_vec())
}

/// §4.5's relocation fingerprint: the ordered sum of, for each relocation
/// inside the function, `(offset - st_value) + CRC32(name)`, where `name`
/// is either the resolved symbol's name or, for a reference into a merged
/// string pool, the actual string literal at the target offset.
fn relocation_fingerprint(view: &ElfView, function: &SymbolRecord) -> Result<u64> {
    let Some(rela) = view.rela_section_for(function.section_index) else {
        return Ok(0);
    };
    let mut sum: u64 = 0;
    for entry in &rela.entries {
        if entry.offset < function.value || entry.offset >= function.value + function.size {
            continue;
        }
        let name = merged_string_or_resolved_name(view, function.section_index, entry)?;
        sum = sum
            .wrapping_add(entry.offset.wrapping_sub(function.value))
            .wrapping_add(crc32(name.as_bytes()) as u64);
    }
    Ok(sum)
}

fn merged_string_or_resolved_name(view: &ElfView, _section_index: usize, entry: &crate::elf::Relocation) -> Result<String> {
    let sym = view.symbols.get(entry.sym_index).ok_or_else(|| {
        log::error!("merged_string_or_resolved_name: relocation references out-of-range symbol {}", entry.sym_index);
        crate::error::Error::malformed_at("relocation references out-of-range symbol", entry.sym_index)
    })?;

    if sym.is_section_symbol() {
        if let Some(target_section) = view.section_by_index(sym.section_index) {
            let is_merged_strings = target_section.sh_flags & (section_header::SHF_MERGE as u64 | section_header::SHF_STRINGS as u64)
                == (section_header::SHF_MERGE as u64 | section_header::SHF_STRINGS as u64);
            if is_merged_strings {
                let addend = entry.addend.max(0) as usize;
                let bytes = &target_section.data;
                let end = bytes[addend..].iter().position(|&b| b == 0).map(|p| addend + p).unwrap_or(bytes.len());
                return Ok(String::from_utf8_lossy(&bytes[addend.min(bytes.len())..end.min(bytes.len())]).into_owned());
            }
        }
    }
    let resolved = resolve(view, entry)?;
    Ok(resolved.symbol.name)
}

/// §4.5: compare `a` and `b` (the same-named function in two views).
/// Returns `true` when they are judged semantically equal.
pub fn functions_equal(view_a: &ElfView, a: &SymbolRecord, view_b: &ElfView, b: &SymbolRecord) -> Result<bool> {
    if a.size != b.size {
        return Ok(false);
    }

    let bytes_a = normalized_function_bytes(view_a, a)?;
    let bytes_b = normalized_function_bytes(view_b, b)?;

    if bytes_a != bytes_b {
        let rendered_a = render_function(view_a, a)?;
        let rendered_b = render_function(view_b, b)?;
        if rendered_a != rendered_b {
            return Ok(false);
        }
    }

    Ok(relocation_fingerprint(view_a, a)? == relocation_fingerprint(view_b, b)?)
}

/// Raw byte comparison for `is_var` symbols. Variables aren't subject to
/// static-key normalization (that only rewrites executable code), so
/// equality is just "same size, same bytes".
pub fn variables_equal(view_a: &ElfView, a: &SymbolRecord, view_b: &ElfView, b: &SymbolRecord) -> Result<bool> {
    if a.size != b.size {
        return Ok(false);
    }
    let bytes_a = variable_bytes(view_a, a)?;
    let bytes_b = variable_bytes(view_b, b)?;
    Ok(bytes_a == bytes_b)
}

fn variable_bytes(view: &ElfView, var: &SymbolRecord) -> Result<Vec<u8>> {
    let section = view.section_by_index(var.section_index).ok_or_else(|| {
        log::error!("variable_bytes: {} references missing section {}", var.name, var.section_index);
        crate::error::Error::malformed_at("variable references missing section", var.section_index)
    })?;
    let start = var.value as usize;
    let end = start + var.size as usize;
    if end > section.data.len() {
        // SHT_NOBITS (.bss) sections carry no data; treat as all-zero.
        return Ok(vec![0u8; var.size as usize]);
    }
    Ok(section.data[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_is_deterministic_and_input_sensitive() {
        let a = crc32(b"foo");
        let b = crc32(b"foo");
        let c = crc32(b"bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
