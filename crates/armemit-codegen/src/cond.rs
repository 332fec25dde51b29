use std::fmt;

/// Condition codes shared by A32 (every instruction) and A64 (`B.cond`,
/// conditional select).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    EQ = 0b0000,
    NE = 0b0001,
    CS = 0b0010,
    CC = 0b0011,
    MI = 0b0100,
    PL = 0b0101,
    VS = 0b0110,
    VC = 0b0111,
    HI = 0b1000,
    LS = 0b1001,
    GE = 0b1010,
    LT = 0b1011,
    GT = 0b1100,
    LE = 0b1101,
    AL = 0b1110,
}

impl Cond {
    pub const ALL: [Cond; 15] = [
        Cond::EQ,
        Cond::NE,
        Cond::CS,
        Cond::CC,
        Cond::MI,
        Cond::PL,
        Cond::VS,
        Cond::VC,
        Cond::HI,
        Cond::LS,
        Cond::GE,
        Cond::LT,
        Cond::GT,
        Cond::LE,
        Cond::AL,
    ];

    /// Unsigned higher-or-same, alias of `CS`.
    pub const HS: Cond = Cond::CS;
    /// Unsigned lower, alias of `CC`.
    pub const LO: Cond = Cond::CC;

    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Decode a 4-bit field. `0b1111` (NV) has no variant.
    pub fn from_bits(bits: u32) -> Option<Cond> {
        Cond::ALL.get((bits & 0xF) as usize).copied()
    }

    /// Invert the condition (e.g., LE → GT, EQ → NE).
    ///
    /// Returns `None` for `AL`: its inverse is the reserved NV encoding.
    pub fn invert(self) -> Option<Cond> {
        // Inverting a condition flips bit 0.
        Cond::from_bits(self.bits() ^ 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Cond::EQ => "eq",
            Cond::NE => "ne",
            Cond::CS => "cs",
            Cond::CC => "cc",
            Cond::MI => "mi",
            Cond::PL => "pl",
            Cond::VS => "vs",
            Cond::VC => "vc",
            Cond::HI => "hi",
            Cond::LS => "ls",
            Cond::GE => "ge",
            Cond::LT => "lt",
            Cond::GT => "gt",
            Cond::LE => "le",
            Cond::AL => "al",
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Barrel-shifter operation, shared by A32 operand2 and A64 shifted-register
/// forms. The discriminant is the 2-bit `shift` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Shift {
    Lsl = 0b00,
    Lsr = 0b01,
    Asr = 0b10,
    Ror = 0b11,
}

impl Shift {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_bits(bits: u32) -> Shift {
        match bits & 0b11 {
            0b00 => Shift::Lsl,
            0b01 => Shift::Lsr,
            0b10 => Shift::Asr,
            _ => Shift::Ror,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Shift::Lsl => "lsl",
            Shift::Lsr => "lsr",
            Shift::Asr => "asr",
            Shift::Ror => "ror",
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
