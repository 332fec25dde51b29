//! Field decoders for the words the emitters produce.
//!
//! These cover the forms the listing renderer and the tests need to read
//! back, not the whole instruction set. A64 words are otherwise rendered by
//! `disarm64`.

use std::fmt;

use crate::a32::{self, DpOp, Operand2};
use crate::a64::Width;
use crate::cond::{Cond, Shift};
use crate::emit::Isa;
use crate::imm::{BitmaskImm, MoveWide, decode_bitmask_imm, expand_a32_imm};
use crate::label::{FixupKind, sign_extend};

// ============================================================
// PC-relative references
// ============================================================

/// The fixup kind of an A64 word that refers to a PC-relative target.
pub fn a64_reference_kind(word: u32) -> Option<FixupKind> {
    match word >> 24 {
        // B, BL
        0x14..=0x17 | 0x94..=0x97 => Some(FixupKind::A64Branch26),
        // B.cond (bit 4 clear)
        0x54 if word & 0x10 == 0 => Some(FixupKind::A64Imm19),
        // CBZ/CBNZ, W and X
        0x34 | 0x35 | 0xB4 | 0xB5 => Some(FixupKind::A64Imm19),
        // LDR literal, W and X
        0x18 | 0x58 => Some(FixupKind::A64Imm19),
        // TBZ/TBNZ, bit 5 of the tested bit in bit 31
        0x36 | 0x37 | 0xB6 | 0xB7 => Some(FixupKind::A64Imm14),
        _ => None,
    }
}

/// The fixup kind of an A32 word that refers to a PC-relative target.
pub fn a32_reference_kind(word: u32) -> Option<FixupKind> {
    if word >> 28 == 0xF {
        return None;
    }
    if (word >> 25) & 0b111 == 0b101 {
        return Some(FixupKind::A32Branch24);
    }
    // LDR Rt, [PC, #+/-imm12]
    if word & 0x0F7F_0000 == 0x051F_0000 {
        return Some(FixupKind::A32Literal12);
    }
    None
}

/// Byte offset a PC-relative word at `site` refers to, with its kind.
pub fn reference_target(isa: Isa, word: u32, site: usize) -> Option<(FixupKind, usize)> {
    let kind = match isa {
        Isa::A32 => a32_reference_kind(word)?,
        Isa::A64 => a64_reference_kind(word)?,
    };
    Some((kind, kind.target(word, site)))
}

// ============================================================
// A64
// ============================================================

fn width_of(word: u32) -> Width {
    if word >> 31 == 1 { Width::X } else { Width::W }
}

/// Decoded `ADD/ADDS/SUB/SUBS (immediate)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddSubImm {
    pub subtract: bool,
    pub sets_flags: bool,
    pub width: Width,
    pub rd: u8,
    pub rn: u8,
    /// The operand after applying the optional `LSL #12`.
    pub imm: u64,
}

pub fn a64_add_sub_imm(word: u32) -> Option<AddSubImm> {
    if word & 0x1F80_0000 != 0x1100_0000 {
        return None;
    }
    let imm12 = ((word >> 10) & 0xFFF) as u64;
    let shifted = (word >> 22) & 1 == 1;
    Some(AddSubImm {
        subtract: (word >> 30) & 1 == 1,
        sets_flags: (word >> 29) & 1 == 1,
        width: width_of(word),
        rd: (word & 0x1F) as u8,
        rn: ((word >> 5) & 0x1F) as u8,
        imm: if shifted { imm12 << 12 } else { imm12 },
    })
}

/// Decoded logical (immediate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalImm {
    /// `AND`=0, `ORR`=1, `EOR`=2, `ANDS`=3.
    pub opc: u32,
    pub width: Width,
    pub rd: u8,
    pub rn: u8,
    pub value: u64,
}

pub fn a64_logical_imm(word: u32) -> Option<LogicalImm> {
    if word & 0x1F80_0000 != 0x1200_0000 {
        return None;
    }
    let width = width_of(word);
    let imm = BitmaskImm {
        n: (word >> 22) & 1,
        immr: (word >> 16) & 0x3F,
        imms: (word >> 10) & 0x3F,
    };
    Some(LogicalImm {
        opc: (word >> 29) & 0b11,
        width,
        rd: (word & 0x1F) as u8,
        rn: ((word >> 5) & 0x1F) as u8,
        value: decode_bitmask_imm(imm, width.bits())?,
    })
}

/// Decoded `MOVN/MOVZ/MOVK`: width, destination register number and the
/// move itself.
pub fn a64_move_wide(word: u32) -> Option<(Width, u8, MoveWide)> {
    if word & 0x1F80_0000 != 0x1280_0000 {
        return None;
    }
    let hw = (word >> 21) & 0b11;
    let imm16 = ((word >> 5) & 0xFFFF) as u16;
    let mov = match (word >> 29) & 0b11 {
        0b00 => MoveWide::Movn { hw, imm16 },
        0b10 => MoveWide::Movz { hw, imm16 },
        0b11 => MoveWide::Movk { hw, imm16 },
        _ => return None,
    };
    Some((width_of(word), (word & 0x1F) as u8, mov))
}

/// Run a constant-materialization sequence (`MOVZ`/`MOVN`/`MOVK` or
/// `ORR Rd, ZR, #imm`) against one register and return the value it leaves.
/// `None` if any word is something else or the destination changes.
pub fn eval_mov_sequence(words: &[u32]) -> Option<u64> {
    let mut value = 0u64;
    let mut dest = None;
    let mut width = Width::X;

    for &word in words {
        let rd = if let Some((w, rd, mov)) = a64_move_wide(word) {
            width = w;
            value = match mov {
                MoveWide::Movz { hw, imm16 } => (imm16 as u64) << (hw * 16),
                MoveWide::Movn { hw, imm16 } => !((imm16 as u64) << (hw * 16)),
                MoveWide::Movk { hw, imm16 } => {
                    let shift = hw * 16;
                    (value & !(0xFFFFu64 << shift)) | (imm16 as u64) << shift
                }
            };
            rd
        } else {
            let logical = a64_logical_imm(word)?;
            if logical.opc != 0b01 || logical.rn != 31 {
                return None;
            }
            width = logical.width;
            value = logical.value;
            logical.rd
        };
        if width == Width::W {
            value &= 0xFFFF_FFFF;
        }
        if *dest.get_or_insert(rd) != rd {
            return None;
        }
    }
    dest.map(|_| value)
}

// ============================================================
// A32
// ============================================================

/// An A32 instruction from the families the listing can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A32Insn {
    DataProcessing {
        cond: Cond,
        op: DpOp,
        s: bool,
        rd: a32::Reg,
        rn: a32::Reg,
        op2: Operand2,
    },
    /// `B`/`BL`; `offset` is the byte displacement from this instruction.
    Branch { cond: Cond, link: bool, offset: i64 },
    Bx { cond: Cond, rm: a32::Reg },
    LoadStore {
        cond: Cond,
        op: a32::MemOp,
        rt: a32::Reg,
        rn: a32::Reg,
        offset: i32,
    },
    Push(u16),
    Pop(u16),
}

pub fn decode_a32(word: u32) -> Option<A32Insn> {
    let cond = Cond::from_bits(word >> 28)?;
    let reg = |shift: u32| a32::Reg(((word >> shift) & 0xF) as u8);

    if word & 0x0FFF_FFF0 == 0x012F_FF10 {
        return Some(A32Insn::Bx { cond, rm: reg(0) });
    }
    if word & 0x0FFF_0000 == 0x092D_0000 {
        return Some(A32Insn::Push(word as u16));
    }
    if word & 0x0FFF_0000 == 0x08BD_0000 {
        return Some(A32Insn::Pop(word as u16));
    }

    match (word >> 25) & 0b111 {
        0b101 => Some(A32Insn::Branch {
            cond,
            link: (word >> 24) & 1 == 1,
            offset: (sign_extend(word & 0x00FF_FFFF, 24) << 2) + 8,
        }),
        // Immediate-offset word/byte access, no writeback.
        0b010 if word & (1 << 24) != 0 && word & (1 << 21) == 0 => {
            let op = match ((word >> 22) & 1, (word >> 20) & 1) {
                (0, 1) => a32::MemOp::Ldr,
                (0, _) => a32::MemOp::Str,
                (_, 1) => a32::MemOp::Ldrb,
                _ => a32::MemOp::Strb,
            };
            let magnitude = (word & 0xFFF) as i32;
            Some(A32Insn::LoadStore {
                cond,
                op,
                rt: reg(12),
                rn: reg(16),
                offset: if word & (1 << 23) != 0 { magnitude } else { -magnitude },
            })
        }
        // Immediate-offset halfword access.
        0b000 if word & 0x0160_00F0 == 0x0140_00B0 => {
            let op = if (word >> 20) & 1 == 1 {
                a32::MemOp::Ldrh
            } else {
                a32::MemOp::Strh
            };
            let magnitude = (((word >> 4) & 0xF0) | (word & 0xF)) as i32;
            Some(A32Insn::LoadStore {
                cond,
                op,
                rt: reg(12),
                rn: reg(16),
                offset: if word & (1 << 23) != 0 { magnitude } else { -magnitude },
            })
        }
        0b000 | 0b001 => decode_a32_dp(word, cond),
        _ => None,
    }
}

fn decode_a32_dp(word: u32, cond: Cond) -> Option<A32Insn> {
    let immediate = (word >> 25) & 1 == 1;
    // Multiplies and extra loads/stores share this space.
    if !immediate && word & 0x90 == 0x90 {
        return None;
    }
    let op = DpOp::from_bits(word >> 21);
    let s = (word >> 20) & 1 == 1;
    // Compare opcodes without S are miscellaneous instructions.
    if op.is_compare() && !s {
        return None;
    }

    let rm = a32::Reg((word & 0xF) as u8);
    let shift = Shift::from_bits(word >> 5);
    let op2 = if immediate {
        Operand2::Imm(expand_a32_imm(word & 0xFFF))
    } else if word & 0x10 != 0 {
        Operand2::ShiftReg {
            rm,
            shift,
            rs: a32::Reg(((word >> 8) & 0xF) as u8),
        }
    } else {
        match ((word >> 7) & 0x1F, shift) {
            (0, Shift::Lsl) => Operand2::Reg(rm),
            (0, Shift::Ror) => Operand2::Rrx(rm),
            (0, shift) => Operand2::ShiftImm { rm, shift, amount: 32 },
            (amount, shift) => Operand2::ShiftImm { rm, shift, amount },
        }
    };

    Some(A32Insn::DataProcessing {
        cond,
        op,
        s,
        rd: a32::Reg(((word >> 12) & 0xF) as u8),
        rn: a32::Reg(((word >> 16) & 0xF) as u8),
        op2,
    })
}

fn cond_suffix(cond: Cond) -> &'static str {
    if cond == Cond::AL { "" } else { cond.name() }
}

impl fmt::Display for Operand2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operand2::Imm(v) if v < 10 => write!(f, "#{v}"),
            Operand2::Imm(v) => write!(f, "#{v:#x}"),
            Operand2::Reg(rm) => write!(f, "{rm}"),
            Operand2::ShiftImm { rm, shift, amount } => write!(f, "{rm}, {shift} #{amount}"),
            Operand2::ShiftReg { rm, shift, rs } => write!(f, "{rm}, {shift} {rs}"),
            Operand2::Rrx(rm) => write!(f, "{rm}, rrx"),
        }
    }
}

fn write_reglist(f: &mut fmt::Formatter<'_>, regs: u16) -> fmt::Result {
    f.write_str("{")?;
    let mut first = true;
    for n in 0..16u8 {
        if regs & (1 << n) != 0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}", a32::Reg(n))?;
            first = false;
        }
    }
    f.write_str("}")
}

impl fmt::Display for A32Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            A32Insn::DataProcessing {
                cond,
                op,
                s,
                rd,
                rn,
                op2,
            } => {
                let c = cond_suffix(cond);
                if op.is_compare() {
                    write!(f, "{}{c} {rn}, {op2}", op.name())
                } else {
                    let s = if s { "s" } else { "" };
                    if op.is_move() {
                        write!(f, "{}{s}{c} {rd}, {op2}", op.name())
                    } else {
                        write!(f, "{}{s}{c} {rd}, {rn}, {op2}", op.name())
                    }
                }
            }
            A32Insn::Branch { cond, link, offset } => {
                let l = if link { "l" } else { "" };
                write!(f, "b{l}{} .{offset:+}", cond_suffix(cond))
            }
            A32Insn::Bx { cond, rm } => write!(f, "bx{} {rm}", cond_suffix(cond)),
            A32Insn::LoadStore {
                cond,
                op,
                rt,
                rn,
                offset,
            } => {
                let name = match op {
                    a32::MemOp::Ldr => "ldr",
                    a32::MemOp::Str => "str",
                    a32::MemOp::Ldrb => "ldrb",
                    a32::MemOp::Strb => "strb",
                    a32::MemOp::Ldrh => "ldrh",
                    a32::MemOp::Strh => "strh",
                };
                let c = cond_suffix(cond);
                if offset == 0 {
                    write!(f, "{name}{c} {rt}, [{rn}]")
                } else {
                    write!(f, "{name}{c} {rt}, [{rn}, #{offset}]")
                }
            }
            A32Insn::Push(regs) => {
                f.write_str("push ")?;
                write_reglist(f, regs)
            }
            A32Insn::Pop(regs) => {
                f.write_str("pop ")?;
                write_reglist(f, regs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a64_reference_kinds() {
        assert_eq!(a64_reference_kind(0x1400_0000), Some(FixupKind::A64Branch26));
        assert_eq!(a64_reference_kind(0x9400_0001), Some(FixupKind::A64Branch26));
        assert_eq!(a64_reference_kind(0x5400_0060), Some(FixupKind::A64Imm19));
        assert_eq!(a64_reference_kind(0xB500_0003), Some(FixupKind::A64Imm19));
        assert_eq!(a64_reference_kind(0x5800_0040), Some(FixupKind::A64Imm19));
        assert_eq!(a64_reference_kind(0xB600_0000), Some(FixupKind::A64Imm14));
        assert_eq!(a64_reference_kind(0xD65F_03C0), None);
    }

    #[test]
    fn a32_reference_kinds() {
        assert_eq!(a32_reference_kind(0xEAFF_FFFE), Some(FixupKind::A32Branch24));
        assert_eq!(a32_reference_kind(0x1B00_0000), Some(FixupKind::A32Branch24));
        assert_eq!(a32_reference_kind(0xE59F_0004), Some(FixupKind::A32Literal12));
        assert_eq!(a32_reference_kind(0xE591_0004), None);
        assert_eq!(a32_reference_kind(0xFA00_0000), None);
    }

    #[test]
    fn eval_movz_movk() {
        // MOVZ X0, #0x5678; MOVK X0, #0x1234, LSL #16
        assert_eq!(eval_mov_sequence(&[0xD28A_CF00, 0xF2A2_4680]), Some(0x1234_5678));
        // MOVN W1, #0
        assert_eq!(eval_mov_sequence(&[0x1280_0001]), Some(0xFFFF_FFFF));
        // Different destinations.
        assert_eq!(eval_mov_sequence(&[0xD28A_CF00, 0xF2A2_4681]), None);
        assert_eq!(eval_mov_sequence(&[]), None);
    }

    #[test]
    fn decode_a32_forms() {
        assert_eq!(
            decode_a32(0xE081_0002),
            Some(A32Insn::DataProcessing {
                cond: Cond::AL,
                op: DpOp::Add,
                s: false,
                rd: a32::Reg::R0,
                rn: a32::Reg::R1,
                op2: Operand2::Reg(a32::Reg::R2),
            })
        );
        assert_eq!(decode_a32(0xE12F_FF1E).unwrap().to_string(), "bx lr");
        assert_eq!(decode_a32(0xE92D_4010).unwrap().to_string(), "push {r4, lr}");
        assert_eq!(decode_a32(0xE591_0004).unwrap().to_string(), "ldr r0, [r1, #4]");
        assert_eq!(decode_a32(0xE1D1_00B2).unwrap().to_string(), "ldrh r0, [r1, #2]");
        assert_eq!(decode_a32(0xE355_0001).unwrap().to_string(), "cmp r5, #1");
        assert_eq!(decode_a32(0x0AFF_FFFE).unwrap().to_string(), "beq .+0");
        assert_eq!(decode_a32(0xE1A0_0061).unwrap().to_string(), "mov r0, r1, rrx");
        // MUL lives in the data-processing space.
        assert_eq!(decode_a32(0xE000_0291), None);
    }
}
