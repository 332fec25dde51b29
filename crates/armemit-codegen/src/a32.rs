use std::fmt;

use crate::cond::{Cond, Shift};
use crate::emit::{Arm, Emitter};
use crate::error::{EncodeError, check_range};
use crate::imm::{a32_imm_chunks, encode_a32_imm};
use crate::label::{FixupKind, Label};

/// ARM (A32) core register r0–r15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Reg(pub u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R1: Reg = Reg(1);
    pub const R2: Reg = Reg(2);
    pub const R3: Reg = Reg(3);
    pub const R4: Reg = Reg(4);
    pub const R5: Reg = Reg(5);
    pub const R6: Reg = Reg(6);
    pub const R7: Reg = Reg(7);
    pub const R8: Reg = Reg(8);
    pub const R9: Reg = Reg(9);
    pub const R10: Reg = Reg(10);
    pub const R11: Reg = Reg(11);
    pub const R12: Reg = Reg(12);

    // APCS names.
    pub const A1: Reg = Reg(0);
    pub const A2: Reg = Reg(1);
    pub const A3: Reg = Reg(2);
    pub const A4: Reg = Reg(3);
    pub const V1: Reg = Reg(4);
    pub const V2: Reg = Reg(5);
    pub const V3: Reg = Reg(6);
    pub const V4: Reg = Reg(7);
    pub const V5: Reg = Reg(8);
    pub const V6: Reg = Reg(9);
    pub const V7: Reg = Reg(10);
    pub const V8: Reg = Reg(11);
    pub const IP: Reg = Reg(12);
    pub const SP: Reg = Reg(13);
    pub const LR: Reg = Reg(14);
    pub const PC: Reg = Reg(15);

    /// 4-bit register field, or `InvalidRegister` past r15.
    fn field(self, role: &'static str, form: &'static str) -> Result<u32, EncodeError> {
        if self.0 > 15 {
            return Err(EncodeError::InvalidRegister {
                reg: self.to_string(),
                role,
                form,
            });
        }
        Ok(self.0 as u32)
    }

    /// Like `field`, but PC is UNPREDICTABLE in this position.
    fn field_no_pc(self, role: &'static str, form: &'static str) -> Result<u32, EncodeError> {
        if self == Reg::PC {
            return Err(EncodeError::InvalidRegister {
                reg: self.to_string(),
                role,
                form,
            });
        }
        self.field(role, form)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            13 => f.write_str("sp"),
            14 => f.write_str("lr"),
            15 => f.write_str("pc"),
            n => write!(f, "r{n}"),
        }
    }
}

/// Data-processing opcode (bits 24:21).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DpOp {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl DpOp {
    /// Compare forms: always set flags, write no register.
    pub fn is_compare(self) -> bool {
        matches!(self, DpOp::Tst | DpOp::Teq | DpOp::Cmp | DpOp::Cmn)
    }

    /// Move forms take no first operand.
    pub fn is_move(self) -> bool {
        matches!(self, DpOp::Mov | DpOp::Mvn)
    }

    pub fn name(self) -> &'static str {
        match self {
            DpOp::And => "and",
            DpOp::Eor => "eor",
            DpOp::Sub => "sub",
            DpOp::Rsb => "rsb",
            DpOp::Add => "add",
            DpOp::Adc => "adc",
            DpOp::Sbc => "sbc",
            DpOp::Rsc => "rsc",
            DpOp::Tst => "tst",
            DpOp::Teq => "teq",
            DpOp::Cmp => "cmp",
            DpOp::Cmn => "cmn",
            DpOp::Orr => "orr",
            DpOp::Mov => "mov",
            DpOp::Bic => "bic",
            DpOp::Mvn => "mvn",
        }
    }

    pub(crate) fn from_bits(bits: u32) -> DpOp {
        const OPS: [DpOp; 16] = [
            DpOp::And,
            DpOp::Eor,
            DpOp::Sub,
            DpOp::Rsb,
            DpOp::Add,
            DpOp::Adc,
            DpOp::Sbc,
            DpOp::Rsc,
            DpOp::Tst,
            DpOp::Teq,
            DpOp::Cmp,
            DpOp::Cmn,
            DpOp::Orr,
            DpOp::Mov,
            DpOp::Bic,
            DpOp::Mvn,
        ];
        OPS[(bits & 0xF) as usize]
    }
}

/// The flexible second operand of a data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand2 {
    /// 8-bit value rotated right by an even amount.
    Imm(u32),
    Reg(Reg),
    /// `Rm, <shift> #amount`. LSL 0–31, LSR/ASR 1–32, ROR 1–31.
    ShiftImm { rm: Reg, shift: Shift, amount: u32 },
    /// `Rm, <shift> Rs`.
    ShiftReg { rm: Reg, shift: Shift, rs: Reg },
    /// `Rm, RRX`: rotate right by one through carry.
    Rrx(Reg),
}

impl From<Reg> for Operand2 {
    fn from(rm: Reg) -> Self {
        Operand2::Reg(rm)
    }
}

impl Operand2 {
    /// Bits 25 and 11:0 of the instruction.
    fn encode(self, form: &'static str) -> Result<u32, EncodeError> {
        match self {
            Operand2::Imm(value) => encode_a32_imm(value)
                .map(|field| 1 << 25 | field)
                .ok_or(EncodeError::UnencodableImmediate {
                    form: "rotated immediate",
                    value: value as u64,
                }),
            Operand2::Reg(rm) => rm.field("Rm", form),
            Operand2::ShiftImm { rm, shift, amount } => {
                let (min, max) = match shift {
                    Shift::Lsl => (0, 31),
                    Shift::Lsr | Shift::Asr => (1, 32),
                    Shift::Ror => (1, 31),
                };
                check_range("shift amount", amount as i64, min, max)?;
                // LSR/ASR #32 are encoded as #0.
                let imm5 = amount & 0x1F;
                Ok(imm5 << 7 | shift.bits() << 5 | rm.field("Rm", form)?)
            }
            Operand2::ShiftReg { rm, shift, rs } => Ok(rs.field_no_pc("Rs", form)? << 8
                | shift.bits() << 5
                | 1 << 4
                | rm.field_no_pc("Rm", form)?),
            Operand2::Rrx(rm) => Ok(Shift::Ror.bits() << 5 | rm.field("Rm", form)?),
        }
    }
}

/// Parallel add/subtract operation (`op2`, bits 7:5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParallelOp {
    Add16,
    AddSubX,
    SubAddX,
    Sub16,
    Add8,
    Sub8,
}

impl ParallelOp {
    fn bits(self) -> u32 {
        match self {
            ParallelOp::Add16 => 0b000,
            ParallelOp::AddSubX => 0b001,
            ParallelOp::SubAddX => 0b010,
            ParallelOp::Sub16 => 0b011,
            ParallelOp::Add8 => 0b100,
            ParallelOp::Sub8 => 0b111,
        }
    }
}

/// Parallel add/subtract prefix (`op1`, bits 22:20): `S`, `Q`, `SH`, `U`,
/// `UQ`, `UH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParallelMode {
    Signed,
    Saturating,
    SignedHalving,
    Unsigned,
    UnsignedSaturating,
    UnsignedHalving,
}

impl ParallelMode {
    fn bits(self) -> u32 {
        match self {
            ParallelMode::Signed => 0b001,
            ParallelMode::Saturating => 0b010,
            ParallelMode::SignedHalving => 0b011,
            ParallelMode::Unsigned => 0b101,
            ParallelMode::UnsignedSaturating => 0b110,
            ParallelMode::UnsignedHalving => 0b111,
        }
    }
}

/// Saturating word arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SatArith {
    Qadd,
    Qsub,
    Qdadd,
    Qdsub,
}

/// Byte/halfword extension (bits 22:20 of the extend group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendOp {
    Sxtb16,
    Sxtb,
    Sxth,
    Uxtb16,
    Uxtb,
    Uxth,
}

impl ExtendOp {
    fn bits(self) -> u32 {
        match self {
            ExtendOp::Sxtb16 => 0b000,
            ExtendOp::Sxtb => 0b010,
            ExtendOp::Sxth => 0b011,
            ExtendOp::Uxtb16 => 0b100,
            ExtendOp::Uxtb => 0b110,
            ExtendOp::Uxth => 0b111,
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

const FORM_PAR: &str = "parallel add/sub";
const FORM_EXT: &str = "extend";
const FORM_PKH: &str = "pack halfword";
const FORM_SAT: &str = "saturate";
const FORM_REV: &str = "reverse";

impl Emitter<Arm> {
    // ---- Data processing ----

    /// Any data-processing instruction. Compare forms ignore `s` and `rd`
    /// (S=1, Rd=0); move forms ignore `rn`.
    pub fn dp(
        &mut self,
        cond: Cond,
        op: DpOp,
        s: bool,
        rd: Reg,
        rn: Reg,
        op2: impl Into<Operand2>,
    ) -> Result<(), EncodeError> {
        let op2 = op2.into();
        let form = op.name();
        let reg_shifted = matches!(op2, Operand2::ShiftReg { .. });
        let field = |r: Reg, role| {
            if reg_shifted {
                r.field_no_pc(role, form)
            } else {
                r.field(role, form)
            }
        };

        let (s, rd) = if op.is_compare() {
            (true, 0)
        } else {
            (s, field(rd, "Rd")?)
        };
        let rn = if op.is_move() { 0 } else { field(rn, "Rn")? };
        let inst = cond.bits() << 28
            | (op as u32) << 21
            | u32::from(s) << 20
            | rn << 16
            | rd << 12
            | op2.encode(form)?;
        self.code.push(inst);
        Ok(())
    }

    /// `AND Rd, Rn, <op2>`
    pub fn and(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::And, false, rd, rn, op2)
    }

    /// `EOR Rd, Rn, <op2>`
    pub fn eor(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Eor, false, rd, rn, op2)
    }

    /// `SUB Rd, Rn, <op2>`
    pub fn sub(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Sub, false, rd, rn, op2)
    }

    /// `RSB Rd, Rn, <op2>`
    pub fn rsb(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Rsb, false, rd, rn, op2)
    }

    /// `ADD Rd, Rn, <op2>`
    pub fn add(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Add, false, rd, rn, op2)
    }

    pub fn adc(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Adc, false, rd, rn, op2)
    }

    pub fn sbc(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Sbc, false, rd, rn, op2)
    }

    pub fn rsc(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Rsc, false, rd, rn, op2)
    }

    /// `ORR Rd, Rn, <op2>`
    pub fn orr(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Orr, false, rd, rn, op2)
    }

    /// `BIC Rd, Rn, <op2>`
    pub fn bic(&mut self, rd: Reg, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Bic, false, rd, rn, op2)
    }

    /// `TST Rn, <op2>`
    pub fn tst(&mut self, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Tst, true, Reg::R0, rn, op2)
    }

    pub fn teq(&mut self, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Teq, true, Reg::R0, rn, op2)
    }

    /// `CMP Rn, <op2>`
    pub fn cmp(&mut self, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Cmp, true, Reg::R0, rn, op2)
    }

    pub fn cmn(&mut self, rn: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Cmn, true, Reg::R0, rn, op2)
    }

    /// `MOV Rd, <op2>`
    pub fn mov(&mut self, rd: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Mov, false, rd, Reg::R0, op2)
    }

    /// `MVN Rd, <op2>`
    pub fn mvn(&mut self, rd: Reg, op2: impl Into<Operand2>) -> Result<(), EncodeError> {
        self.dp(Cond::AL, DpOp::Mvn, false, rd, Reg::R0, op2)
    }

    /// `MOV Rd, Rm, LSL #amount` (0–31).
    pub fn lsl_imm(&mut self, rd: Reg, rm: Reg, amount: u32) -> Result<(), EncodeError> {
        self.mov(rd, Operand2::ShiftImm { rm, shift: Shift::Lsl, amount })
    }

    /// `MOV Rd, Rm, ASR #amount` (1–32).
    pub fn asr_imm(&mut self, rd: Reg, rm: Reg, amount: u32) -> Result<(), EncodeError> {
        self.mov(rd, Operand2::ShiftImm { rm, shift: Shift::Asr, amount })
    }

    // ---- Constant helpers ----

    /// Put `value` in `rd`: `MOV` or `MVN` of a rotated immediate when one
    /// exists, otherwise a PC-relative `LDR` from the literal pool placed at
    /// the end of the session.
    pub fn load_imm(&mut self, rd: Reg, value: u32) -> Result<(), EncodeError> {
        if encode_a32_imm(value).is_some() {
            return self.mov(rd, Operand2::Imm(value));
        }
        if encode_a32_imm(!value).is_some() {
            return self.mvn(rd, Operand2::Imm(!value));
        }
        let rt = rd.field("Rt", "ldr")?;
        let label = self.literal(value);
        // LDR Rt, [PC, #imm12]
        let inst = Cond::AL.bits() << 28 | 0x059F_0000 | rt << 12;
        self.emit_ref(inst, label, FixupKind::A32Literal12)
    }

    /// `Rd = Rn + value`, split into as many rotated-immediate `ADD`s (or
    /// `SUB`s for a negative value) as needed.
    pub fn add_imm(&mut self, rd: Reg, rn: Reg, value: i32) -> Result<(), EncodeError> {
        let op = if value < 0 { DpOp::Sub } else { DpOp::Add };
        self.imm_chain(op, false, rd, rn, value.unsigned_abs())
    }

    /// `Rd = Rn - value`. With `set_flags` only the last instruction of the
    /// chain sets flags, so N and Z describe the final result.
    pub fn sub_imm(&mut self, rd: Reg, rn: Reg, value: i32, set_flags: bool) -> Result<(), EncodeError> {
        let op = if value < 0 { DpOp::Add } else { DpOp::Sub };
        self.imm_chain(op, set_flags, rd, rn, value.unsigned_abs())
    }

    fn imm_chain(&mut self, op: DpOp, s: bool, rd: Reg, rn: Reg, magnitude: u32) -> Result<(), EncodeError> {
        let chunks = a32_imm_chunks(magnitude);
        if chunks.is_empty() {
            return self.dp(Cond::AL, op, s, rd, rn, Operand2::Imm(0));
        }
        let last = chunks.len() - 1;
        let mut src = rn;
        for (i, chunk) in chunks.into_iter().enumerate() {
            self.dp(Cond::AL, op, s && i == last, rd, src, Operand2::Imm(chunk))?;
            src = rd;
        }
        Ok(())
    }

    /// `AND Rd, Rn, #value`, or `BIC` with the complement.
    pub fn and_imm(&mut self, rd: Reg, rn: Reg, value: u32) -> Result<(), EncodeError> {
        if encode_a32_imm(value).is_some() {
            self.and(rd, rn, Operand2::Imm(value))
        } else if encode_a32_imm(!value).is_some() {
            self.bic(rd, rn, Operand2::Imm(!value))
        } else {
            Err(EncodeError::UnencodableImmediate {
                form: "and",
                value: value as u64,
            })
        }
    }

    /// `CMP Rn, #value`, or `CMN` with the negation.
    pub fn cmp_imm(&mut self, rn: Reg, value: i32) -> Result<(), EncodeError> {
        if encode_a32_imm(value as u32).is_some() {
            self.cmp(rn, Operand2::Imm(value as u32))
        } else if encode_a32_imm(value.wrapping_neg() as u32).is_some() {
            self.cmn(rn, Operand2::Imm(value.wrapping_neg() as u32))
        } else {
            Err(EncodeError::UnencodableImmediate {
                form: "cmp",
                value: value as u32 as u64,
            })
        }
    }

    // ---- Parallel add/subtract ----

    /// `{S,Q,SH,U,UQ,UH}{ADD16,ASX,SAX,SUB16,ADD8,SUB8} Rd, Rn, Rm`
    pub fn parallel(
        &mut self,
        cond: Cond,
        op: ParallelOp,
        mode: ParallelMode,
        rd: Reg,
        rn: Reg,
        rm: Reg,
    ) -> Result<(), EncodeError> {
        let inst = cond.bits() << 28
            | 0x0600_0F10
            | mode.bits() << 20
            | rn.field_no_pc("Rn", FORM_PAR)? << 16
            | rd.field_no_pc("Rd", FORM_PAR)? << 12
            | op.bits() << 5
            | rm.field_no_pc("Rm", FORM_PAR)?;
        self.code.push(inst);
        Ok(())
    }

    /// `SEL Rd, Rn, Rm`: pick bytes by the GE flags.
    pub fn sel(&mut self, cond: Cond, rd: Reg, rn: Reg, rm: Reg) -> Result<(), EncodeError> {
        let inst = cond.bits() << 28
            | 0x0680_0FB0
            | rn.field_no_pc("Rn", "sel")? << 16
            | rd.field_no_pc("Rd", "sel")? << 12
            | rm.field_no_pc("Rm", "sel")?;
        self.code.push(inst);
        Ok(())
    }

    /// `QADD/QSUB/QDADD/QDSUB Rd, Rm, Rn`
    pub fn sat_arith(&mut self, cond: Cond, op: SatArith, rd: Reg, rm: Reg, rn: Reg) -> Result<(), EncodeError> {
        let base = match op {
            SatArith::Qadd => 0x0100_0050,
            SatArith::Qsub => 0x0120_0050,
            SatArith::Qdadd => 0x0140_0050,
            SatArith::Qdsub => 0x0160_0050,
        };
        let inst = cond.bits() << 28
            | base
            | rn.field_no_pc("Rn", FORM_SAT)? << 16
            | rd.field_no_pc("Rd", FORM_SAT)? << 12
            | rm.field_no_pc("Rm", FORM_SAT)?;
        self.code.push(inst);
        Ok(())
    }

    // ---- Extend ----

    /// `SXTB/SXTH/UXTB/... Rd, Rm, ROR #rotation`
    pub fn extend(&mut self, cond: Cond, op: ExtendOp, rd: Reg, rm: Reg, rotation: u32) -> Result<(), EncodeError> {
        self.extend_word(cond, op, rd, 15, rm, rotation)
    }

    /// `SXTAB/SXTAH/UXTAB/... Rd, Rn, Rm, ROR #rotation`
    pub fn extend_add(
        &mut self,
        cond: Cond,
        op: ExtendOp,
        rd: Reg,
        rn: Reg,
        rm: Reg,
        rotation: u32,
    ) -> Result<(), EncodeError> {
        // Rn = PC selects the non-accumulating form.
        let rn = rn.field_no_pc("Rn", FORM_EXT)?;
        self.extend_word(cond, op, rd, rn, rm, rotation)
    }

    fn extend_word(&mut self, cond: Cond, op: ExtendOp, rd: Reg, rn: u32, rm: Reg, rotation: u32) -> Result<(), EncodeError> {
        if !matches!(rotation, 0 | 8 | 16 | 24) {
            return Err(EncodeError::UnencodableImmediate {
                form: "extend rotation",
                value: rotation as u64,
            });
        }
        let inst = cond.bits() << 28
            | 0x0680_0070
            | op.bits() << 20
            | rn << 16
            | rd.field_no_pc("Rd", FORM_EXT)? << 12
            | (rotation / 8) << 10
            | rm.field_no_pc("Rm", FORM_EXT)?;
        self.code.push(inst);
        Ok(())
    }

    pub fn sxtb(&mut self, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.extend(Cond::AL, ExtendOp::Sxtb, rd, rm, 0)
    }

    pub fn sxth(&mut self, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.extend(Cond::AL, ExtendOp::Sxth, rd, rm, 0)
    }

    pub fn uxtb(&mut self, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.extend(Cond::AL, ExtendOp::Uxtb, rd, rm, 0)
    }

    pub fn uxth(&mut self, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.extend(Cond::AL, ExtendOp::Uxth, rd, rm, 0)
    }

    // ---- Pack ----

    /// `PKHBT Rd, Rn, Rm, LSL #lsl` (0–31): bottom half from Rn, top from
    /// the shifted Rm.
    pub fn pkhbt(&mut self, cond: Cond, rd: Reg, rn: Reg, rm: Reg, lsl: u32) -> Result<(), EncodeError> {
        check_range("pkhbt shift", lsl as i64, 0, 31)?;
        self.pkh_word(cond, false, rd, rn, rm, lsl)
    }

    /// `PKHTB Rd, Rn, Rm, ASR #asr` (0–32). `ASR #0` is not encodable and
    /// is emitted as the equivalent `PKHBT Rd, Rm, Rn`.
    pub fn pkhtb(&mut self, cond: Cond, rd: Reg, rn: Reg, rm: Reg, asr: u32) -> Result<(), EncodeError> {
        check_range("pkhtb shift", asr as i64, 0, 32)?;
        if asr == 0 {
            return self.pkh_word(cond, false, rd, rm, rn, 0);
        }
        self.pkh_word(cond, true, rd, rn, rm, asr & 0x1F)
    }

    fn pkh_word(&mut self, cond: Cond, tb: bool, rd: Reg, rn: Reg, rm: Reg, imm5: u32) -> Result<(), EncodeError> {
        let inst = cond.bits() << 28
            | 0x0680_0010
            | rn.field_no_pc("Rn", FORM_PKH)? << 16
            | rd.field_no_pc("Rd", FORM_PKH)? << 12
            | imm5 << 7
            | u32::from(tb) << 6
            | rm.field_no_pc("Rm", FORM_PKH)?;
        self.code.push(inst);
        Ok(())
    }

    // ---- Saturate ----

    /// `SSAT Rd, #sat, Rn{, LSL|ASR #amount}`, saturating to a signed
    /// `sat`-bit range (1–32).
    pub fn ssat(&mut self, cond: Cond, rd: Reg, sat: u32, rn: Reg, shift: Shift, amount: u32) -> Result<(), EncodeError> {
        check_range("ssat width", sat as i64, 1, 32)?;
        self.sat_word(cond, 0x06A0_0010, rd, sat - 1, rn, shift, amount)
    }

    /// `USAT Rd, #sat, Rn{, LSL|ASR #amount}`, saturating to an unsigned
    /// `sat`-bit range (0–31).
    pub fn usat(&mut self, cond: Cond, rd: Reg, sat: u32, rn: Reg, shift: Shift, amount: u32) -> Result<(), EncodeError> {
        check_range("usat width", sat as i64, 0, 31)?;
        self.sat_word(cond, 0x06E0_0010, rd, sat, rn, shift, amount)
    }

    #[allow(clippy::too_many_arguments)]
    fn sat_word(
        &mut self,
        cond: Cond,
        base: u32,
        rd: Reg,
        sat_field: u32,
        rn: Reg,
        shift: Shift,
        amount: u32,
    ) -> Result<(), EncodeError> {
        let (sh, imm5) = match shift {
            Shift::Lsl => {
                check_range("saturate shift", amount as i64, 0, 31)?;
                (0, amount)
            }
            Shift::Asr => {
                check_range("saturate shift", amount as i64, 1, 32)?;
                (1, amount & 0x1F)
            }
            other => {
                return Err(EncodeError::InvalidShift {
                    form: FORM_SAT,
                    shift: other.name(),
                });
            }
        };
        let inst = cond.bits() << 28
            | base
            | sat_field << 16
            | rd.field_no_pc("Rd", FORM_SAT)? << 12
            | imm5 << 7
            | sh << 6
            | rn.field_no_pc("Rn", FORM_SAT)?;
        self.code.push(inst);
        Ok(())
    }

    /// `SSAT16 Rd, #sat, Rn` (1–16).
    pub fn ssat16(&mut self, cond: Cond, rd: Reg, sat: u32, rn: Reg) -> Result<(), EncodeError> {
        check_range("ssat16 width", sat as i64, 1, 16)?;
        self.sat16_word(cond, 0x06A0_0F30, rd, sat - 1, rn)
    }

    /// `USAT16 Rd, #sat, Rn` (0–15).
    pub fn usat16(&mut self, cond: Cond, rd: Reg, sat: u32, rn: Reg) -> Result<(), EncodeError> {
        check_range("usat16 width", sat as i64, 0, 15)?;
        self.sat16_word(cond, 0x06E0_0F30, rd, sat, rn)
    }

    fn sat16_word(&mut self, cond: Cond, base: u32, rd: Reg, sat_field: u32, rn: Reg) -> Result<(), EncodeError> {
        let inst = cond.bits() << 28
            | base
            | sat_field << 16
            | rd.field_no_pc("Rd", FORM_SAT)? << 12
            | rn.field_no_pc("Rn", FORM_SAT)?;
        self.code.push(inst);
        Ok(())
    }

    // ---- Reverse ----

    /// `REV Rd, Rm`: byte-reverse a word.
    pub fn rev(&mut self, cond: Cond, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.rev_word(cond, 0x06BF_0F30, rd, rm)
    }

    /// `REV16 Rd, Rm`: byte-reverse each halfword.
    pub fn rev16(&mut self, cond: Cond, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        self.rev_word(cond, 0x06BF_0FB0, rd, rm)
    }

    fn rev_word(&mut self, cond: Cond, base: u32, rd: Reg, rm: Reg) -> Result<(), EncodeError> {
        let inst = cond.bits() << 28
            | base
            | rd.field_no_pc("Rd", FORM_REV)? << 12
            | rm.field_no_pc("Rm", FORM_REV)?;
        self.code.push(inst);
        Ok(())
    }

    // ---- Load/store ----

    /// `LDR/STR{B,H} Rt, [Rn, #offset]`. Word and byte forms take ±4095,
    /// halfword forms ±255.
    pub fn load_store(&mut self, cond: Cond, op: MemOp, rt: Reg, rn: Reg, offset: i32) -> Result<(), EncodeError> {
        let form = match op {
            MemOp::Ldr => "ldr",
            MemOp::Str => "str",
            MemOp::Ldrb => "ldrb",
            MemOp::Strb => "strb",
            MemOp::Ldrh => "ldrh",
            MemOp::Strh => "strh",
        };
        let up = u32::from(offset >= 0);
        let magnitude = offset.unsigned_abs();
        let regs = rn.field("Rn", form)? << 16 | rt.field("Rt", form)? << 12;

        let inst = match op {
            MemOp::Ldr | MemOp::Str | MemOp::Ldrb | MemOp::Strb => {
                check_range("offset", offset as i64, -4095, 4095)?;
                let base = match op {
                    MemOp::Ldr => 0x0510_0000,
                    MemOp::Str => 0x0500_0000,
                    MemOp::Ldrb => 0x0550_0000,
                    _ => 0x0540_0000,
                };
                base | up << 23 | regs | magnitude
            }
            MemOp::Ldrh | MemOp::Strh => {
                check_range("offset", offset as i64, -255, 255)?;
                let base = if op == MemOp::Ldrh { 0x0150_00B0 } else { 0x0140_00B0 };
                base | up << 23 | regs | (magnitude & 0xF0) << 4 | (magnitude & 0xF)
            }
        };
        self.code.push(cond.bits() << 28 | inst);
        Ok(())
    }

    /// `LDR Rt, [Rn, #offset]`
    pub fn ldr(&mut self, rt: Reg, rn: Reg, offset: i32) -> Result<(), EncodeError> {
        self.load_store(Cond::AL, MemOp::Ldr, rt, rn, offset)
    }

    /// `STR Rt, [Rn, #offset]`
    pub fn str(&mut self, rt: Reg, rn: Reg, offset: i32) -> Result<(), EncodeError> {
        self.load_store(Cond::AL, MemOp::Str, rt, rn, offset)
    }

    // ---- Stack ----

    /// Save core registers (`regs`, bit n = rn) and VFP d-registers
    /// (`vregs`, bit n = dn). Core registers go first; each run of
    /// consecutive d-registers becomes one `VPUSH`.
    pub fn push(&mut self, regs: u16, vregs: u32) -> Result<(), EncodeError> {
        check_reglist(regs, "push")?;
        if regs != 0 {
            self.code.push(Cond::AL.bits() << 28 | 0x092D_0000 | regs as u32);
        }
        for (first, count) in d_runs(vregs) {
            self.code.push(Cond::AL.bits() << 28 | 0x0D2D_0B00 | vfp_list(first, count));
        }
        Ok(())
    }

    /// Restore what `push` with the same arguments saved.
    pub fn pop(&mut self, regs: u16, vregs: u32) -> Result<(), EncodeError> {
        check_reglist(regs, "pop")?;
        for (first, count) in d_runs(vregs).into_iter().rev() {
            self.code.push(Cond::AL.bits() << 28 | 0x0CBD_0B00 | vfp_list(first, count));
        }
        if regs != 0 {
            self.code.push(Cond::AL.bits() << 28 | 0x08BD_0000 | regs as u32);
        }
        Ok(())
    }

    // ---- Branches ----

    /// `B<cond> <label>`
    pub fn b(&mut self, cond: Cond, label: Label) -> Result<(), EncodeError> {
        self.emit_ref(cond.bits() << 28 | 0x0A00_0000, label, FixupKind::A32Branch24)
    }

    /// `BL<cond> <label>`
    pub fn bl(&mut self, cond: Cond, label: Label) -> Result<(), EncodeError> {
        self.emit_ref(cond.bits() << 28 | 0x0B00_0000, label, FixupKind::A32Branch24)
    }

    /// `BX<cond> Rm`
    pub fn bx(&mut self, cond: Cond, rm: Reg) -> Result<(), EncodeError> {
        let inst = cond.bits() << 28 | 0x012F_FF10 | rm.field("Rm", "bx")?;
        self.code.push(inst);
        Ok(())
    }

    /// `BX LR`: return.
    pub fn bx_lr(&mut self) {
        self.code.push(0xE12F_FF1E);
    }

    /// `NOP` (as `MOV r0, r0`).
    pub fn nop(&mut self) {
        self.code.push(0xE1A0_0000);
    }
}

fn check_reglist(regs: u16, form: &'static str) -> Result<(), EncodeError> {
    if regs & (1 << 13) != 0 {
        return Err(EncodeError::InvalidRegister {
            reg: Reg::SP.to_string(),
            role: "register list",
            form,
        });
    }
    Ok(())
}

/// Runs of consecutive set bits as `(first, count)`, at most 16 long each.
fn d_runs(mask: u32) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    let mut rest = mask;
    while rest != 0 {
        let first = rest.trailing_zeros();
        let len = (rest >> first).trailing_ones().min(16);
        runs.push((first, len));
        rest &= !(((1u64 << len) - 1) << first) as u32;
    }
    runs
}

/// `D:Vd` and `imm8` fields of a VPUSH/VPOP of `count` d-registers.
fn vfp_list(first: u32, count: u32) -> u32 {
    (first >> 4) << 22 | (first & 0xF) << 12 | count * 2
}
