//! Rendering mode (§4.3): produces symbolic text for a function, used
//! only as C5's fallback equality check when raw bytes differ but might
//! still be semantically identical (e.g. a call target whose absolute
//! displacement moved because something earlier in the link unit grew).

use crate::disasm::decode::{self, Instruction};
use crate::disasm::{read_signed, resolve_control_flow_target, target_section_offset};
use crate::elf::{ElfView, SymbolRecord};
use crate::error::{Error, Result};

/// Render `function`'s instructions as text: non-control-flow instructions
/// as their raw hex bytes, control-flow instructions as their non-operand
/// prefix bytes plus the symbolic name of their target (`<name>` or
/// `<name+0xNN>`, per §9's display contract).
pub fn render_function(view: &ElfView, function: &SymbolRecord) -> Result<String> {
    let section = view.section_by_index(function.section_index).ok_or_else(|| {
        log::error!("render_function: {} references missing section {}", function.name, function.section_index);
        Error::malformed_at("function references missing section", function.section_index)
    })?;

    let start = function.value as usize;
    let end = start + function.size as usize;
    if end > section.data.len() {
        log::error!("render_function: {} range exceeds section size", function.name);
        return Err(Error::malformed_at("function range exceeds section size", function.index));
    }
    let code = &section.data[start..end];

    let mut lines = Vec::new();
    decode::for_each_instruction(code, |inst: Instruction| {
        let bytes = &code[inst.offset..(inst.offset + inst.length).min(code.len())];
        match inst.control_flow {
            Some(cf) if cf.operand_off + cf.operand_size <= bytes.len() => {
                let disp_bytes = &bytes[cf.operand_off..cf.operand_off + cf.operand_size];
                let displacement = read_signed(disp_bytes);
                let target = target_section_offset(function.value, inst.offset, inst.length, displacement);
                let prefix = &bytes[..cf.operand_off];
                let label = match resolve_control_flow_target(view, function.section_index, target) {
                    Some(resolved) => format!("<{}>", resolved.display()),
                    None => format!("<{:#x}>", target.max(0) as u64),
                };
                lines.push(format!("{:02x?} {}", prefix, label));
            }
            _ => lines.push(format!("{:02x?}", bytes)),
        }
    });
    Ok(lines.join("\n"))
}
