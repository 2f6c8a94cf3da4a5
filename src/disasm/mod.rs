//! Disassembler Adapter (C3) and its three consumers: rendering (used by
//! C5 as an equality fallback), rewriting (C7), and near-jump propagation
//! (C6). All three walk the same instruction stream produced by
//! [`decode`]; they differ only in what they do at each control-flow
//! operand, matching the "three implementations of one callback trait"
//! re-architecture called for in the redesign notes.

pub mod decode;
pub mod propagate;
pub mod render;
pub mod rewrite;
pub mod statickey;

use crate::elf::{ElfView, SymbolRecord};
use crate::resolve::Resolved;

/// Read a little-endian signed integer of 1, 2 or 4 bytes.
pub(crate) fn read_signed(bytes: &[u8]) -> i64 {
    match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        _ => 0,
    }
}

/// The section-relative offset a control-flow instruction targets: the
/// standard x86 PC-relative rule (relative to the address *after* the
/// instruction), expressed in terms of the function's own `st_value` so
/// the result is directly comparable against other symbols' `st_value`.
pub(crate) fn target_section_offset(function_value: u64, inst_offset: usize, inst_length: usize, displacement: i64) -> i64 {
    function_value as i64 + inst_offset as i64 + inst_length as i64 + displacement
}

/// Resolve a section-relative target offset to the symbol whose range
/// covers it, preferring an exact-function match, and returning a
/// [`Resolved`]-shaped answer so callers get the same `<name>`/`<name+0xNN>`
/// display contract used elsewhere.
pub(crate) fn resolve_control_flow_target(view: &ElfView, section_index: usize, target_offset: i64) -> Option<Resolved> {
    if target_offset < 0 {
        return None;
    }
    let target_offset = target_offset as u64;
    let found: Option<&SymbolRecord> = view.symbol_by_offset(section_index, target_offset, false);
    found.map(|sym| {
        let inner = target_offset.saturating_sub(sym.value);
        Resolved { symbol: sym.clone(), inner_offset: Some(inner) }
    })
}
