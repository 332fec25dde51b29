use std::fmt;

use crate::cond::{Cond, Shift};
use crate::emit::{Arm64, Emitter};
use crate::error::{EncodeError, check_range};
use crate::imm::{
    BitmaskImm, MovImmPlan, MoveWide, encode_bitmask_imm, plan_mov_imm, plan_mov_wide,
};
use crate::label::{FixupKind, Label};

/// Register width. Decides the `sf` bit of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// 32-bit `Wn`.
    W,
    /// 64-bit `Xn`.
    X,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::W => 32,
            Width::X => 64,
        }
    }

    fn sf(self) -> u32 {
        match self {
            Width::W => 0,
            Width::X => 1,
        }
    }
}

const ZR_NUM: u8 = 31;
const SP_NUM: u8 = 32;

/// AArch64 general-purpose register with its width.
///
/// Numbers 0–30 are the general registers. The zero register and the stack
/// pointer both encode as 31; they are kept apart here so each instruction
/// form can reject the one it does not accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    num: u8,
    width: Width,
}

impl Reg {
    pub const XZR: Reg = Reg::x(ZR_NUM);
    pub const WZR: Reg = Reg::w(ZR_NUM);
    pub const SP: Reg = Reg::x(SP_NUM);
    pub const WSP: Reg = Reg::w(SP_NUM);
    /// Frame pointer, x29.
    pub const FP: Reg = Reg::x(29);
    /// Link register, x30.
    pub const LR: Reg = Reg::x(30);

    /// `Xn`. Only 0–30 name a register; anything else is rejected when
    /// encoded.
    pub const fn x(num: u8) -> Reg {
        Reg { num, width: Width::X }
    }

    /// `Wn`.
    pub const fn w(num: u8) -> Reg {
        Reg { num, width: Width::W }
    }

    /// The zero register of the given width.
    pub const fn zr(width: Width) -> Reg {
        Reg { num: ZR_NUM, width }
    }

    pub fn num(self) -> u8 {
        self.num
    }

    pub fn width(self) -> Width {
        self.width
    }

    pub fn is_sp(self) -> bool {
        self.num == SP_NUM
    }

    pub fn is_zr(self) -> bool {
        self.num == ZR_NUM
    }

    /// Same register viewed at another width.
    pub fn with_width(self, width: Width) -> Reg {
        Reg { num: self.num, width }
    }

    fn invalid(self, role: &'static str, form: &'static str) -> EncodeError {
        EncodeError::InvalidRegister {
            reg: self.to_string(),
            role,
            form,
        }
    }

    /// 5-bit field where 31 means the zero register.
    fn gp(self, role: &'static str, form: &'static str) -> Result<u32, EncodeError> {
        if self.num > ZR_NUM {
            return Err(self.invalid(role, form));
        }
        Ok(self.num as u32)
    }

    /// 5-bit field where 31 means the stack pointer.
    fn gp_or_sp(self, role: &'static str, form: &'static str) -> Result<u32, EncodeError> {
        match self.num {
            0..=30 => Ok(self.num as u32),
            SP_NUM => Ok(31),
            _ => Err(self.invalid(role, form)),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.num, self.width) {
            (ZR_NUM, Width::X) => f.write_str("xzr"),
            (ZR_NUM, Width::W) => f.write_str("wzr"),
            (SP_NUM, Width::X) => f.write_str("sp"),
            (SP_NUM, Width::W) => f.write_str("wsp"),
            (n, Width::X) => write!(f, "x{n}"),
            (n, Width::W) => write!(f, "w{n}"),
        }
    }
}

fn expect_width(form: &'static str, width: Width, reg: Reg) -> Result<(), EncodeError> {
    if reg.width != width {
        return Err(EncodeError::WidthMismatch {
            form,
            reg: reg.to_string(),
            expected: width.bits(),
        });
    }
    Ok(())
}

/// Register extension applied to the last operand of an extended-register
/// add/sub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Extend {
    Uxtb = 0b000,
    Uxth = 0b001,
    Uxtw = 0b010,
    Uxtx = 0b011,
    Sxtb = 0b100,
    Sxth = 0b101,
    Sxtw = 0b110,
    Sxtx = 0b111,
}

impl Extend {
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// The 64-bit extends take an `Xm` source; the rest a `Wm`.
    fn source_width(self) -> Width {
        match self {
            Extend::Uxtx | Extend::Sxtx => Width::X,
            _ => Width::W,
        }
    }
}

/// Second source of `ADD`/`ADDS`/`SUB`/`SUBS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOperand {
    /// Unsigned 12-bit value, or a 12-bit value shifted left by 12.
    Imm(u64),
    /// `Rm, LSL|LSR|ASR #amount`, amount below the register width.
    Reg { rm: Reg, shift: Shift, amount: u32 },
    /// `Rm, <extend> #amount`, amount 0–4.
    Ext { rm: Reg, extend: Extend, amount: u32 },
}

impl From<Reg> for ArithOperand {
    fn from(rm: Reg) -> Self {
        ArithOperand::Reg {
            rm,
            shift: Shift::Lsl,
            amount: 0,
        }
    }
}

/// Second source of the logical instructions. There is no
/// extended-register form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperand {
    /// A value that must be a valid bitmask immediate for the width.
    Imm(u64),
    /// `Rm, LSL|LSR|ASR|ROR #amount`.
    Reg { rm: Reg, shift: Shift, amount: u32 },
}

impl From<Reg> for LogicalOperand {
    fn from(rm: Reg) -> Self {
        LogicalOperand::Reg {
            rm,
            shift: Shift::Lsl,
            amount: 0,
        }
    }
}

/// Index register treatment in a register-offset address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexExtend {
    Uxtw,
    Lsl,
    Sxtw,
    Sxtx,
}

impl IndexExtend {
    fn option(self) -> u32 {
        match self {
            IndexExtend::Uxtw => 0b010,
            IndexExtend::Lsl => 0b011,
            IndexExtend::Sxtw => 0b110,
            IndexExtend::Sxtx => 0b111,
        }
    }

    fn index_width(self) -> Width {
        match self {
            IndexExtend::Uxtw | IndexExtend::Sxtw => Width::W,
            IndexExtend::Lsl | IndexExtend::Sxtx => Width::X,
        }
    }
}

/// Memory operand of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// `[Xn|SP, #offset]`
    Offset(Reg, i64),
    /// `[Xn|SP, #offset]!`
    PreIndex(Reg, i64),
    /// `[Xn|SP], #offset`
    PostIndex(Reg, i64),
    /// `[Xn|SP, Rm{, <extend> #scale}]`, scaled by the access size when
    /// `scaled` is set.
    Indexed {
        base: Reg,
        index: Reg,
        extend: IndexExtend,
        scaled: bool,
    },
}

impl Address {
    pub fn base(reg: Reg) -> Address {
        Address::Offset(reg, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddSubOp {
    Add,
    Adds,
    Sub,
    Subs,
}

impl AddSubOp {
    /// `op` (bit 30) and `S` (bit 29).
    fn bits(self) -> u32 {
        match self {
            AddSubOp::Add => 0b00,
            AddSubOp::Adds => 0b01,
            AddSubOp::Sub => 0b10,
            AddSubOp::Subs => 0b11,
        }
    }

    fn sets_flags(self) -> bool {
        matches!(self, AddSubOp::Adds | AddSubOp::Subs)
    }

    fn name(self) -> &'static str {
        match self {
            AddSubOp::Add => "add",
            AddSubOp::Adds => "adds",
            AddSubOp::Sub => "sub",
            AddSubOp::Subs => "subs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Bic,
    Orr,
    Orn,
    Eor,
    Eon,
    Ands,
    Bics,
}

impl LogicalOp {
    fn opc(self) -> u32 {
        match self {
            LogicalOp::And | LogicalOp::Bic => 0b00,
            LogicalOp::Orr | LogicalOp::Orn => 0b01,
            LogicalOp::Eor | LogicalOp::Eon => 0b10,
            LogicalOp::Ands | LogicalOp::Bics => 0b11,
        }
    }

    /// The `N` bit of the shifted-register form: operate on `NOT Rm`.
    fn inverted(self) -> bool {
        matches!(
            self,
            LogicalOp::Bic | LogicalOp::Orn | LogicalOp::Eon | LogicalOp::Bics
        )
    }

    fn name(self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Bic => "bic",
            LogicalOp::Orr => "orr",
            LogicalOp::Orn => "orn",
            LogicalOp::Eor => "eor",
            LogicalOp::Eon => "eon",
            LogicalOp::Ands => "ands",
            LogicalOp::Bics => "bics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitfieldOp {
    Sbfm,
    Bfm,
    Ubfm,
}

impl BitfieldOp {
    fn base(self) -> u32 {
        match self {
            BitfieldOp::Sbfm => 0x1300_0000,
            BitfieldOp::Bfm => 0x3300_0000,
            BitfieldOp::Ubfm => 0x5300_0000,
        }
    }
}

/// Single-register load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemOp {
    Ldr,
    Str,
    Ldrb,
    Strb,
    Ldrh,
    Strh,
}

impl MemOp {
    fn is_load(self) -> bool {
        matches!(self, MemOp::Ldr | MemOp::Ldrb | MemOp::Ldrh)
    }

    fn name(self) -> &'static str {
        match self {
            MemOp::Ldr => "ldr",
            MemOp::Str => "str",
            MemOp::Ldrb => "ldrb",
            MemOp::Strb => "strb",
            MemOp::Ldrh => "ldrh",
            MemOp::Strh => "strh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairOp {
    Ldp,
    Stp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondSelectOp {
    Csel,
    Csinc,
    Csinv,
    Csneg,
}

impl CondSelectOp {
    fn base(self) -> u32 {
        match self {
            CondSelectOp::Csel => 0x1A80_0000,
            CondSelectOp::Csinc => 0x1A80_0400,
            CondSelectOp::Csinv => 0x5A80_0000,
            CondSelectOp::Csneg => 0x5A80_0400,
        }
    }
}

impl Emitter<Arm64> {
    // ---- Add/subtract ----

    /// `ADD/ADDS/SUB/SUBS Rd, Rn, <operand>`. Width comes from `rd`.
    pub fn add_sub(
        &mut self,
        op: AddSubOp,
        rd: Reg,
        rn: Reg,
        operand: impl Into<ArithOperand>,
    ) -> Result<(), EncodeError> {
        let form = op.name();
        let width = rd.width;
        expect_width(form, width, rn)?;
        let head = width.sf() << 31 | op.bits() << 29;
        // The flag-setting forms write ZR where the others write SP.
        let rd_field = |rd: Reg| {
            if op.sets_flags() {
                rd.gp("Rd", form)
            } else {
                rd.gp_or_sp("Rd", form)
            }
        };

        let inst = match operand.into() {
            ArithOperand::Imm(value) => {
                let (sh, imm12) = if value <= 0xFFF {
                    (0, value as u32)
                } else if value & 0xFFF == 0 && value >> 12 <= 0xFFF {
                    (1, (value >> 12) as u32)
                } else {
                    return Err(EncodeError::UnencodableImmediate {
                        form: "add/sub immediate",
                        value,
                    });
                };
                head | 0x1100_0000
                    | sh << 22
                    | imm12 << 10
                    | rn.gp_or_sp("Rn", form)? << 5
                    | rd_field(rd)?
            }
            ArithOperand::Reg { rm, shift, amount } => {
                if shift == Shift::Ror {
                    return Err(EncodeError::InvalidShift { form, shift: shift.name() });
                }
                expect_width(form, width, rm)?;
                check_range("shift amount", amount as i64, 0, width.bits() as i64 - 1)?;
                head | 0x0B00_0000
                    | shift.bits() << 22
                    | rm.gp("Rm", form)? << 16
                    | amount << 10
                    | rn.gp("Rn", form)? << 5
                    | rd.gp("Rd", form)?
            }
            ArithOperand::Ext { rm, extend, amount } => {
                let source = if width == Width::X { extend.source_width() } else { Width::W };
                expect_width(form, source, rm)?;
                check_range("extend shift", amount as i64, 0, 4)?;
                head | 0x0B20_0000
                    | rm.gp("Rm", form)? << 16
                    | extend.bits() << 13
                    | amount << 10
                    | rn.gp_or_sp("Rn", form)? << 5
                    | rd_field(rd)?
            }
        };
        self.code.push(inst);
        Ok(())
    }

    /// `ADD Rd, Rn, <operand>`
    pub fn add(&mut self, rd: Reg, rn: Reg, operand: impl Into<ArithOperand>) -> Result<(), EncodeError> {
        self.add_sub(AddSubOp::Add, rd, rn, operand)
    }

    pub fn adds(&mut self, rd: Reg, rn: Reg, operand: impl Into<ArithOperand>) -> Result<(), EncodeError> {
        self.add_sub(AddSubOp::Adds, rd, rn, operand)
    }

    /// `SUB Rd, Rn, <operand>`
    pub fn sub(&mut self, rd: Reg, rn: Reg, operand: impl Into<ArithOperand>) -> Result<(), EncodeError> {
        self.add_sub(AddSubOp::Sub, rd, rn, operand)
    }

    pub fn subs(&mut self, rd: Reg, rn: Reg, operand: impl Into<ArithOperand>) -> Result<(), EncodeError> {
        self.add_sub(AddSubOp::Subs, rd, rn, operand)
    }

    /// `CMP Rn, <operand>`: `SUBS ZR, Rn, <operand>`.
    pub fn cmp(&mut self, rn: Reg, operand: impl Into<ArithOperand>) -> Result<(), EncodeError> {
        self.add_sub(AddSubOp::Subs, Reg::zr(rn.width), rn, operand)
    }

    /// `CMN Rn, <operand>`: `ADDS ZR, Rn, <operand>`.
    pub fn cmn(&mut self, rn: Reg, operand: impl Into<ArithOperand>) -> Result<(), EncodeError> {
        self.add_sub(AddSubOp::Adds, Reg::zr(rn.width), rn, operand)
    }

    /// `NEG Rd, Rm`: `SUB Rd, ZR, Rm`.
    pub fn neg(&mut self, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.sub(rd, Reg::zr(rd.width), rm)
    }

    /// `MOV Rd, Rm`: `ORR Rd, ZR, Rm`, or `ADD Rd, Rm, #0` when either side
    /// is the stack pointer.
    pub fn mov(&mut self, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        if rd.is_sp() || rm.is_sp() {
            self.add(rd, rm, ArithOperand::Imm(0))
        } else {
            self.orr(rd, Reg::zr(rd.width), rm)
        }
    }

    // ---- Logical ----

    /// `AND/BIC/ORR/ORN/EOR/EON/ANDS/BICS Rd, Rn, <operand>`.
    ///
    /// The inverted ops accept an immediate too; it is complemented and
    /// encoded with the base op.
    pub fn logical(
        &mut self,
        op: LogicalOp,
        rd: Reg,
        rn: Reg,
        operand: impl Into<LogicalOperand>,
    ) -> Result<(), EncodeError> {
        let form = op.name();
        let width = rd.width;
        expect_width(form, width, rn)?;
        let head = width.sf() << 31 | op.opc() << 29;

        let inst = match operand.into() {
            LogicalOperand::Imm(value) => {
                let value = if op.inverted() {
                    let mask = if width == Width::W { 0xFFFF_FFFF } else { u64::MAX };
                    !value & mask
                } else {
                    value
                };
                let BitmaskImm { n, immr, imms } = encode_bitmask_imm(value, width.bits())
                    .ok_or(EncodeError::UnencodableImmediate {
                        form: "logical immediate",
                        value,
                    })?;
                let rd = if op.opc() == 0b11 {
                    rd.gp("Rd", form)?
                } else {
                    rd.gp_or_sp("Rd", form)?
                };
                head | 0x1200_0000
                    | n << 22
                    | immr << 16
                    | imms << 10
                    | rn.gp("Rn", form)? << 5
                    | rd
            }
            LogicalOperand::Reg { rm, shift, amount } => {
                expect_width(form, width, rm)?;
                check_range("shift amount", amount as i64, 0, width.bits() as i64 - 1)?;
                head | 0x0A00_0000
                    | shift.bits() << 22
                    | u32::from(op.inverted()) << 21
                    | rm.gp("Rm", form)? << 16
                    | amount << 10
                    | rn.gp("Rn", form)? << 5
                    | rd.gp("Rd", form)?
            }
        };
        self.code.push(inst);
        Ok(())
    }

    pub fn and(&mut self, rd: Reg, rn: Reg, operand: impl Into<LogicalOperand>) -> Result<(), EncodeError> {
        self.logical(LogicalOp::And, rd, rn, operand)
    }

    pub fn ands(&mut self, rd: Reg, rn: Reg, operand: impl Into<LogicalOperand>) -> Result<(), EncodeError> {
        self.logical(LogicalOp::Ands, rd, rn, operand)
    }

    pub fn orr(&mut self, rd: Reg, rn: Reg, operand: impl Into<LogicalOperand>) -> Result<(), EncodeError> {
        self.logical(LogicalOp::Orr, rd, rn, operand)
    }

    pub fn eor(&mut self, rd: Reg, rn: Reg, operand: impl Into<LogicalOperand>) -> Result<(), EncodeError> {
        self.logical(LogicalOp::Eor, rd, rn, operand)
    }

    pub fn bic(&mut self, rd: Reg, rn: Reg, operand: impl Into<LogicalOperand>) -> Result<(), EncodeError> {
        self.logical(LogicalOp::Bic, rd, rn, operand)
    }

    pub fn orn(&mut self, rd: Reg, rn: Reg, operand: impl Into<LogicalOperand>) -> Result<(), EncodeError> {
        self.logical(LogicalOp::Orn, rd, rn, operand)
    }

    /// `TST Rn, <operand>`: `ANDS ZR, Rn, <operand>`.
    pub fn tst(&mut self, rn: Reg, operand: impl Into<LogicalOperand>) -> Result<(), EncodeError> {
        self.logical(LogicalOp::Ands, Reg::zr(rn.width), rn, operand)
    }

    /// `MVN Rd, Rm`: `ORN Rd, ZR, Rm`.
    pub fn mvn(&mut self, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.orn(rd, Reg::zr(rd.width), rm)
    }

    // ---- Move wide ----

    /// `MOVZ/MOVN/MOVK Rd, #imm16, LSL #(hw*16)`. `hw` is 0–1 for W and
    /// 0–3 for X.
    pub fn move_wide(&mut self, rd: Reg, mov: MoveWide) -> Result<(), EncodeError> {
        let (base, hw, imm16) = match mov {
            MoveWide::Movn { hw, imm16 } => (0x1280_0000, hw, imm16),
            MoveWide::Movz { hw, imm16 } => (0x5280_0000, hw, imm16),
            MoveWide::Movk { hw, imm16 } => (0x7280_0000, hw, imm16),
        };
        let lanes = rd.width.bits() as i64 / 16;
        check_range("hw", hw as i64, 0, lanes - 1)?;
        let inst = rd.width.sf() << 31
            | base
            | hw << 21
            | (imm16 as u32) << 5
            | rd.gp("Rd", "move wide")?;
        self.code.push(inst);
        Ok(())
    }

    pub fn movz(&mut self, rd: Reg, imm16: u16, hw: u32) -> Result<(), EncodeError> {
        self.move_wide(rd, MoveWide::Movz { hw, imm16 })
    }

    pub fn movn(&mut self, rd: Reg, imm16: u16, hw: u32) -> Result<(), EncodeError> {
        self.move_wide(rd, MoveWide::Movn { hw, imm16 })
    }

    pub fn movk(&mut self, rd: Reg, imm16: u16, hw: u32) -> Result<(), EncodeError> {
        self.move_wide(rd, MoveWide::Movk { hw, imm16 })
    }

    /// Put `value` in `rd` with the shortest sequence available: one
    /// `ORR Rd, ZR, #bitmask`, or `MOVZ`/`MOVN` followed by `MOVK`s.
    ///
    /// Rd = 31 names SP in the `ORR` form, so ZR always gets the move-wide
    /// sequence.
    pub fn mov_imm(&mut self, rd: Reg, value: u64) -> Result<(), EncodeError> {
        let bits = rd.width.bits();
        let plan = match plan_mov_imm(value, bits)? {
            MovImmPlan::Orr(_) if rd.is_zr() => MovImmPlan::Wide(plan_mov_wide(value, bits)),
            plan => plan,
        };
        match plan {
            MovImmPlan::Orr(imm) => {
                let inst = rd.width.sf() << 31
                    | 0x3200_0000
                    | imm.n << 22
                    | imm.immr << 16
                    | imm.imms << 10
                    | 31 << 5
                    | rd.gp_or_sp("Rd", "mov")?;
                self.code.push(inst);
            }
            MovImmPlan::Wide(seq) => {
                for mov in seq {
                    self.move_wide(rd, mov)?;
                }
            }
        }
        Ok(())
    }

    // ---- Shifts and bitfields ----

    /// `LSLV/LSRV/ASRV/RORV Rd, Rn, Rm`
    pub fn shift_reg(&mut self, shift: Shift, rd: Reg, rn: Reg, rm: Reg) -> Result<(), EncodeError> {
        let form = "variable shift";
        expect_width(form, rd.width, rn)?;
        expect_width(form, rd.width, rm)?;
        let inst = rd.width.sf() << 31
            | 0x1AC0_2000
            | rm.gp("Rm", form)? << 16
            | shift.bits() << 10
            | rn.gp("Rn", form)? << 5
            | rd.gp("Rd", form)?;
        self.code.push(inst);
        Ok(())
    }

    /// `SBFM/BFM/UBFM Rd, Rn, #immr, #imms`
    pub fn bitfield(&mut self, op: BitfieldOp, rd: Reg, rn: Reg, immr: u32, imms: u32) -> Result<(), EncodeError> {
        expect_width("bitfield", rd.width, rn)?;
        self.bitfield_word(op, rd, rn, immr, imms)
    }

    /// Bitfield word with `sf` and `N` from `rd`; `rn` contributes only its
    /// number, so the sign/zero-extend aliases can take a `Wn` source.
    fn bitfield_word(&mut self, op: BitfieldOp, rd: Reg, rn: Reg, immr: u32, imms: u32) -> Result<(), EncodeError> {
        let form = "bitfield";
        let max = rd.width.bits() as i64 - 1;
        check_range("immr", immr as i64, 0, max)?;
        check_range("imms", imms as i64, 0, max)?;
        let sf = rd.width.sf();
        let inst = sf << 31
            | op.base()
            | sf << 22
            | immr << 16
            | imms << 10
            | rn.gp("Rn", form)? << 5
            | rd.gp("Rd", form)?;
        self.code.push(inst);
        Ok(())
    }

    /// `LSL Rd, Rn, #shift`: `UBFM Rd, Rn, #(-shift MOD size), #(size-1-shift)`.
    pub fn lsl(&mut self, rd: Reg, rn: Reg, shift: u32) -> Result<(), EncodeError> {
        let size = rd.width.bits();
        check_range("shift", shift as i64, 0, size as i64 - 1)?;
        self.bitfield(BitfieldOp::Ubfm, rd, rn, (size - shift) % size, size - 1 - shift)
    }

    /// `LSR Rd, Rn, #shift`: `UBFM Rd, Rn, #shift, #(size-1)`.
    pub fn lsr(&mut self, rd: Reg, rn: Reg, shift: u32) -> Result<(), EncodeError> {
        let size = rd.width.bits();
        self.bitfield(BitfieldOp::Ubfm, rd, rn, shift, size - 1)
    }

    /// `ASR Rd, Rn, #shift`: `SBFM Rd, Rn, #shift, #(size-1)`.
    pub fn asr(&mut self, rd: Reg, rn: Reg, shift: u32) -> Result<(), EncodeError> {
        let size = rd.width.bits();
        self.bitfield(BitfieldOp::Sbfm, rd, rn, shift, size - 1)
    }

    /// `ROR Rd, Rn, #shift`: `EXTR Rd, Rn, Rn, #shift`.
    pub fn ror(&mut self, rd: Reg, rn: Reg, shift: u32) -> Result<(), EncodeError> {
        self.extr(rd, rn, rn, shift)
    }

    /// `UBFX Rd, Rn, #lsb, #width`
    pub fn ubfx(&mut self, rd: Reg, rn: Reg, lsb: u32, width: u32) -> Result<(), EncodeError> {
        let (immr, imms) = extract_fields(rd.width, lsb, width)?;
        self.bitfield(BitfieldOp::Ubfm, rd, rn, immr, imms)
    }

    /// `SBFX Rd, Rn, #lsb, #width`
    pub fn sbfx(&mut self, rd: Reg, rn: Reg, lsb: u32, width: u32) -> Result<(), EncodeError> {
        let (immr, imms) = extract_fields(rd.width, lsb, width)?;
        self.bitfield(BitfieldOp::Sbfm, rd, rn, immr, imms)
    }

    /// `BFI Rd, Rn, #lsb, #width`: `BFM Rd, Rn, #(-lsb MOD size), #(width-1)`.
    pub fn bfi(&mut self, rd: Reg, rn: Reg, lsb: u32, width: u32) -> Result<(), EncodeError> {
        let size = rd.width.bits();
        extract_fields(rd.width, lsb, width)?;
        self.bitfield(BitfieldOp::Bfm, rd, rn, (size - lsb) % size, width - 1)
    }

    /// `SXTB Rd, Wn`: `SBFM Rd, Rn, #0, #7`.
    pub fn sxtb(&mut self, rd: Reg, rn: Reg) -> Result<(), EncodeError> {
        expect_width("sxtb", Width::W, rn)?;
        self.bitfield_word(BitfieldOp::Sbfm, rd, rn, 0, 7)
    }

    /// `SXTH Rd, Wn`: `SBFM Rd, Rn, #0, #15`.
    pub fn sxth(&mut self, rd: Reg, rn: Reg) -> Result<(), EncodeError> {
        expect_width("sxth", Width::W, rn)?;
        self.bitfield_word(BitfieldOp::Sbfm, rd, rn, 0, 15)
    }

    /// `SXTW Xd, Wn`: `SBFM Xd, Xn, #0, #31`.
    pub fn sxtw(&mut self, rd: Reg, rn: Reg) -> Result<(), EncodeError> {
        expect_width("sxtw", Width::X, rd)?;
        expect_width("sxtw", Width::W, rn)?;
        self.bitfield_word(BitfieldOp::Sbfm, rd, rn, 0, 31)
    }

    /// `UXTB Wd, Wn`: `UBFM Wd, Wn, #0, #7`.
    pub fn uxtb(&mut self, rd: Reg, rn: Reg) -> Result<(), EncodeError> {
        expect_width("uxtb", Width::W, rd)?;
        self.bitfield(BitfieldOp::Ubfm, rd, rn, 0, 7)
    }

    /// `UXTH Wd, Wn`: `UBFM Wd, Wn, #0, #15`.
    pub fn uxth(&mut self, rd: Reg, rn: Reg) -> Result<(), EncodeError> {
        expect_width("uxth", Width::W, rd)?;
        self.bitfield(BitfieldOp::Ubfm, rd, rn, 0, 15)
    }

    /// `EXTR Rd, Rn, Rm, #lsb`
    pub fn extr(&mut self, rd: Reg, rn: Reg, rm: Reg, lsb: u32) -> Result<(), EncodeError> {
        let form = "extr";
        expect_width(form, rd.width, rn)?;
        expect_width(form, rd.width, rm)?;
        check_range("lsb", lsb as i64, 0, rd.width.bits() as i64 - 1)?;
        let sf = rd.width.sf();
        let inst = sf << 31
            | 0x1380_0000
            | sf << 22
            | rm.gp("Rm", form)? << 16
            | lsb << 10
            | rn.gp("Rn", form)? << 5
            | rd.gp("Rd", form)?;
        self.code.push(inst);
        Ok(())
    }

    // ---- Multiply/divide ----

    fn three_source(&mut self, form: &'static str, base: u32, rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> Result<(), EncodeError> {
        for r in [rn, rm, ra] {
            expect_width(form, rd.width, r)?;
        }
        let inst = rd.width.sf() << 31
            | base
            | rm.gp("Rm", form)? << 16
            | ra.gp("Ra", form)? << 10
            | rn.gp("Rn", form)? << 5
            | rd.gp("Rd", form)?;
        self.code.push(inst);
        Ok(())
    }

    /// `MADD Rd, Rn, Rm, Ra`: `Rd = Ra + Rn * Rm`.
    pub fn madd(&mut self, rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> Result<(), EncodeError> {
        self.three_source("madd", 0x1B00_0000, rd, rn, rm, ra)
    }

    /// `MSUB Rd, Rn, Rm, Ra`: `Rd = Ra - Rn * Rm`.
    pub fn msub(&mut self, rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> Result<(), EncodeError> {
        self.three_source("msub", 0x1B00_8000, rd, rn, rm, ra)
    }

    /// `MUL Rd, Rn, Rm`: `MADD Rd, Rn, Rm, ZR`.
    pub fn mul(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.madd(rd, rn, rm, Reg::zr(rd.width))
    }

    fn divide(&mut self, form: &'static str, base: u32, rd: Reg, rn: Reg, rm: Reg) -> Result<(), EncodeError> {
        expect_width(form, rd.width, rn)?;
        expect_width(form, rd.width, rm)?;
        let inst = rd.width.sf() << 31
            | base
            | rm.gp("Rm", form)? << 16
            | rn.gp("Rn", form)? << 5
            | rd.gp("Rd", form)?;
        self.code.push(inst);
        Ok(())
    }

    pub fn sdiv(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.divide("sdiv", 0x1AC0_0C00, rd, rn, rm)
    }

    pub fn udiv(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.divide("udiv", 0x1AC0_0800, rd, rn, rm)
    }

    // ---- Conditional select ----

    /// `CSEL/CSINC/CSINV/CSNEG Rd, Rn, Rm, cond`
    pub fn cond_select(&mut self, op: CondSelectOp, rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> Result<(), EncodeError> {
        let form = "conditional select";
        expect_width(form, rd.width, rn)?;
        expect_width(form, rd.width, rm)?;
        let inst = rd.width.sf() << 31
            | op.base()
            | rm.gp("Rm", form)? << 16
            | cond.bits() << 12
            | rn.gp("Rn", form)? << 5
            | rd.gp("Rd", form)?;
        self.code.push(inst);
        Ok(())
    }

    pub fn csel(&mut self, rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> Result<(), EncodeError> {
        self.cond_select(CondSelectOp::Csel, rd, rn, rm, cond)
    }

    /// `CSET Rd, cond`: `CSINC Rd, ZR, ZR, invert(cond)`.
    pub fn cset(&mut self, rd: Reg, cond: Cond) -> Result<(), EncodeError> {
        let inverted = cond
            .invert()
            .ok_or(EncodeError::InvalidCondition { cond, form: "cset" })?;
        let zr = Reg::zr(rd.width);
        self.cond_select(CondSelectOp::Csinc, rd, zr, zr, inverted)
    }

    /// `CSETM Rd, cond`: `CSINV Rd, ZR, ZR, invert(cond)`.
    pub fn csetm(&mut self, rd: Reg, cond: Cond) -> Result<(), EncodeError> {
        let inverted = cond
            .invert()
            .ok_or(EncodeError::InvalidCondition { cond, form: "csetm" })?;
        let zr = Reg::zr(rd.width);
        self.cond_select(CondSelectOp::Csinv, rd, zr, zr, inverted)
    }

    // ---- Loads and stores ----

    /// `LDR/STR/LDRB/STRB/LDRH/STRH Rt, <address>`.
    ///
    /// A plain offset uses the scaled unsigned form when it can and falls
    /// back to the unscaled `LDUR`/`STUR` form for small negative or
    /// unaligned offsets.
    pub fn load_store(&mut self, op: MemOp, rt: Reg, addr: Address) -> Result<(), EncodeError> {
        let form = op.name();
        let size: u32 = match op {
            MemOp::Ldrb | MemOp::Strb => 0,
            MemOp::Ldrh | MemOp::Strh => 1,
            MemOp::Ldr | MemOp::Str => match rt.width {
                Width::W => 2,
                Width::X => 3,
            },
        };
        if size < 2 {
            expect_width(form, Width::W, rt)?;
        }
        let scale = 1i64 << size;
        let head = size << 30 | u32::from(op.is_load()) << 22;
        let rt = rt.gp("Rt", form)?;

        let inst = match addr {
            Address::Offset(base, offset) => {
                let rn = base_field(base, form)?;
                if offset >= 0 && offset % scale == 0 && offset / scale <= 0xFFF {
                    head | 0x3900_0000 | ((offset / scale) as u32) << 10 | rn << 5 | rt
                } else if (-256..=255).contains(&offset) {
                    head | 0x3800_0000 | simm9(offset) << 12 | rn << 5 | rt
                } else if offset > 0 && offset % scale != 0 {
                    return Err(EncodeError::MisalignedOffset { form, offset, align: scale });
                } else {
                    return Err(EncodeError::out_of_range("offset", offset, -256, 0xFFF * scale));
                }
            }
            Address::PreIndex(base, offset) => {
                check_range("offset", offset, -256, 255)?;
                head | 0x3800_0C00 | simm9(offset) << 12 | base_field(base, form)? << 5 | rt
            }
            Address::PostIndex(base, offset) => {
                check_range("offset", offset, -256, 255)?;
                head | 0x3800_0400 | simm9(offset) << 12 | base_field(base, form)? << 5 | rt
            }
            Address::Indexed {
                base,
                index,
                extend,
                scaled,
            } => {
                expect_width(form, extend.index_width(), index)?;
                head | 0x3820_0800
                    | index.gp("Rm", form)? << 16
                    | extend.option() << 13
                    | u32::from(scaled) << 12
                    | base_field(base, form)? << 5
                    | rt
            }
        };
        self.code.push(inst);
        Ok(())
    }

    /// `LDR Rt, <address>`
    pub fn ldr(&mut self, rt: Reg, addr: Address) -> Result<(), EncodeError> {
        self.load_store(MemOp::Ldr, rt, addr)
    }

    /// `STR Rt, <address>`
    pub fn str(&mut self, rt: Reg, addr: Address) -> Result<(), EncodeError> {
        self.load_store(MemOp::Str, rt, addr)
    }

    pub fn ldrb(&mut self, rt: Reg, addr: Address) -> Result<(), EncodeError> {
        self.load_store(MemOp::Ldrb, rt, addr)
    }

    pub fn strb(&mut self, rt: Reg, addr: Address) -> Result<(), EncodeError> {
        self.load_store(MemOp::Strb, rt, addr)
    }

    pub fn ldrh(&mut self, rt: Reg, addr: Address) -> Result<(), EncodeError> {
        self.load_store(MemOp::Ldrh, rt, addr)
    }

    pub fn strh(&mut self, rt: Reg, addr: Address) -> Result<(), EncodeError> {
        self.load_store(MemOp::Strh, rt, addr)
    }

    /// `LDR Rt, <label>`: PC-relative literal load.
    pub fn ldr_literal(&mut self, rt: Reg, label: Label) -> Result<(), EncodeError> {
        let base = match rt.width {
            Width::W => 0x1800_0000,
            Width::X => 0x5800_0000,
        };
        let inst = base | rt.gp("Rt", "ldr literal")?;
        self.emit_ref(inst, label, FixupKind::A64Imm19)
    }

    /// `LDP/STP Rt1, Rt2, <address>`. Register-offset addressing has no
    /// pair form.
    pub fn pair(&mut self, op: PairOp, rt1: Reg, rt2: Reg, addr: Address) -> Result<(), EncodeError> {
        let form = match op {
            PairOp::Ldp => "ldp",
            PairOp::Stp => "stp",
        };
        let width = rt1.width;
        expect_width(form, width, rt2)?;
        let scale = (width.bits() / 8) as i64;
        let (mode, base, offset) = match addr {
            Address::PostIndex(base, offset) => (0b01, base, offset),
            Address::Offset(base, offset) => (0b10, base, offset),
            Address::PreIndex(base, offset) => (0b11, base, offset),
            Address::Indexed { base, .. } => {
                return Err(EncodeError::InvalidRegister {
                    reg: base.to_string(),
                    role: "register-offset base",
                    form,
                });
            }
        };
        if offset % scale != 0 {
            return Err(EncodeError::MisalignedOffset { form, offset, align: scale });
        }
        let imm7 = offset / scale;
        check_range("pair offset", imm7, -64, 63)?;

        let opc = match width {
            Width::W => 0b00,
            Width::X => 0b10,
        };
        let inst = opc << 30
            | 0x2800_0000
            | mode << 23
            | u32::from(op == PairOp::Ldp) << 22
            | ((imm7 as u32) & 0x7F) << 15
            | rt2.gp("Rt2", form)? << 10
            | base_field(base, form)? << 5
            | rt1.gp("Rt", form)?;
        self.code.push(inst);
        Ok(())
    }

    pub fn stp(&mut self, rt1: Reg, rt2: Reg, addr: Address) -> Result<(), EncodeError> {
        self.pair(PairOp::Stp, rt1, rt2, addr)
    }

    pub fn ldp(&mut self, rt1: Reg, rt2: Reg, addr: Address) -> Result<(), EncodeError> {
        self.pair(PairOp::Ldp, rt1, rt2, addr)
    }

    // ---- Branches ----

    /// `B <label>`: unconditional branch.
    pub fn b(&mut self, label: Label) -> Result<(), EncodeError> {
        self.emit_ref(0x1400_0000, label, FixupKind::A64Branch26)
    }

    /// `BL <label>`: branch with link (call).
    pub fn bl(&mut self, label: Label) -> Result<(), EncodeError> {
        self.emit_ref(0x9400_0000, label, FixupKind::A64Branch26)
    }

    /// `B.cond <label>`
    pub fn b_cond(&mut self, cond: Cond, label: Label) -> Result<(), EncodeError> {
        self.emit_ref(0x5400_0000 | cond.bits(), label, FixupKind::A64Imm19)
    }

    /// `CBZ Rt, <label>`: compare and branch if zero.
    pub fn cbz(&mut self, rt: Reg, label: Label) -> Result<(), EncodeError> {
        let inst = rt.width.sf() << 31 | 0x3400_0000 | rt.gp("Rt", "cbz")?;
        self.emit_ref(inst, label, FixupKind::A64Imm19)
    }

    /// `CBNZ Rt, <label>`: compare and branch if nonzero.
    pub fn cbnz(&mut self, rt: Reg, label: Label) -> Result<(), EncodeError> {
        let inst = rt.width.sf() << 31 | 0x3500_0000 | rt.gp("Rt", "cbnz")?;
        self.emit_ref(inst, label, FixupKind::A64Imm19)
    }

    /// `TBZ Rt, #bit, <label>`: test bit and branch if zero.
    pub fn tbz(&mut self, rt: Reg, bit: u32, label: Label) -> Result<(), EncodeError> {
        self.test_branch(0x3600_0000, "tbz", rt, bit, label)
    }

    /// `TBNZ Rt, #bit, <label>`: test bit and branch if nonzero.
    pub fn tbnz(&mut self, rt: Reg, bit: u32, label: Label) -> Result<(), EncodeError> {
        self.test_branch(0x3700_0000, "tbnz", rt, bit, label)
    }

    fn test_branch(&mut self, base: u32, form: &'static str, rt: Reg, bit: u32, label: Label) -> Result<(), EncodeError> {
        check_range("bit", bit as i64, 0, rt.width.bits() as i64 - 1)?;
        let inst = (bit >> 5) << 31 | base | (bit & 0x1F) << 19 | rt.gp("Rt", form)?;
        self.emit_ref(inst, label, FixupKind::A64Imm14)
    }

    /// `BR Xn`: indirect branch.
    pub fn br(&mut self, rn: Reg) -> Result<(), EncodeError> {
        self.branch_reg(0xD61F_0000, "br", rn)
    }

    /// `BLR Xn`: branch with link to register (indirect call).
    pub fn blr(&mut self, rn: Reg) -> Result<(), EncodeError> {
        self.branch_reg(0xD63F_0000, "blr", rn)
    }

    /// `RET Xn`
    pub fn ret_to(&mut self, rn: Reg) -> Result<(), EncodeError> {
        self.branch_reg(0xD65F_0000, "ret", rn)
    }

    fn branch_reg(&mut self, base: u32, form: &'static str, rn: Reg) -> Result<(), EncodeError> {
        expect_width(form, Width::X, rn)?;
        let inst = base | rn.gp("Rn", form)? << 5;
        self.code.push(inst);
        Ok(())
    }

    /// `RET`: return (branch to X30).
    pub fn ret(&mut self) {
        self.code.push(0xD65F_03C0);
    }

    pub fn nop(&mut self) {
        self.code.push(0xD503_201F);
    }

    /// `BRK #imm16`: breakpoint.
    pub fn brk(&mut self, imm16: u16) {
        self.code.push(0xD420_0000 | (imm16 as u32) << 5);
    }
}

/// Base register of an address: X width, SP allowed, ZR not.
fn base_field(base: Reg, form: &'static str) -> Result<u32, EncodeError> {
    expect_width(form, Width::X, base)?;
    base.gp_or_sp("Rn", form)
}

fn simm9(offset: i64) -> u32 {
    (offset as u32) & 0x1FF
}

/// `immr`/`imms` of an `lsb`/`width` bitfield extract.
fn extract_fields(size: Width, lsb: u32, width: u32) -> Result<(u32, u32), EncodeError> {
    let bits = size.bits() as i64;
    check_range("lsb", lsb as i64, 0, bits - 1)?;
    check_range("width", width as i64, 1, bits - lsb as i64)?;
    Ok((lsb, lsb + width - 1))
}
