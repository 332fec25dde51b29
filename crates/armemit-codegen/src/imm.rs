//! Immediate encoders that are more than a range check: A32 rotated
//! immediates, A64 bitmask (logical) immediates and A64 move-wide sequences.

use crate::error::EncodeError;

// ============================================================
// A32 modified immediate
// ============================================================

/// Encode `value` as an A32 operand2 immediate: an 8-bit constant rotated
/// right by an even amount. Returns the 12-bit field `rotate:imm8`.
pub fn encode_a32_imm(value: u32) -> Option<u32> {
    for rot in 0..16u32 {
        let unrotated = value.rotate_left(rot * 2);
        if unrotated <= 0xFF {
            return Some((rot << 8) | unrotated);
        }
    }
    None
}

/// Expand a 12-bit A32 operand2 immediate field back to its value.
pub fn expand_a32_imm(field: u32) -> u32 {
    let rot = (field >> 8) & 0xF;
    (field & 0xFF).rotate_right(rot * 2)
}

/// Split `value` into pieces that are each a valid rotated immediate and
/// whose sum (and bitwise OR) is `value`. A single piece when `value` is
/// directly encodable; empty for zero.
pub fn a32_imm_chunks(value: u32) -> Vec<u32> {
    if value == 0 {
        return Vec::new();
    }
    if encode_a32_imm(value).is_some() {
        return vec![value];
    }
    let mut rest = value;
    let mut chunks = Vec::with_capacity(4);
    while rest != 0 {
        let pos = rest.trailing_zeros() & !1;
        let chunk = rest & (0xFFu32 << pos);
        chunks.push(chunk);
        rest &= !chunk;
    }
    chunks
}

// ============================================================
// A64 bitmask immediate
// ============================================================

/// The `N:immr:imms` fields of an A64 logical immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmaskImm {
    pub n: u32,
    pub immr: u32,
    pub imms: u32,
}

/// Encode `value` as an A64 bitmask immediate for a `bits`-wide register
/// (32 or 64). All-zeros and all-ones have no encoding.
pub fn encode_bitmask_imm(value: u64, bits: u32) -> Option<BitmaskImm> {
    let value = if bits == 32 {
        if value > u32::MAX as u64 {
            return None;
        }
        value | (value << 32)
    } else {
        value
    };
    if value == 0 || value == u64::MAX {
        return None;
    }

    // Smallest repeating element.
    let mut size = 64u32;
    while size > 2 {
        let half = size / 2;
        let mask = (1u64 << half) - 1;
        if value & mask != (value >> half) & mask {
            break;
        }
        size = half;
    }

    let mask = element_mask(size);
    let elem = value & mask;
    let ones = elem.count_ones();
    let run = (1u64 << ones) - 1;

    // Find r such that rotating the element right by r leaves a run of
    // ones at the bottom; the encoded rotation is the inverse.
    let r = (0..size).find(|&r| rotate_right_within(elem, r, size) == run)?;
    let immr = (size - r) % size;
    let imms = ((!(size - 1) << 1) | (ones - 1)) & 0x3F;
    let n = u32::from(size == 64);

    if bits == 32 && n == 1 {
        return None;
    }
    Some(BitmaskImm { n, immr, imms })
}

/// Decode `N:immr:imms` to the value it denotes in a `bits`-wide register.
pub fn decode_bitmask_imm(imm: BitmaskImm, bits: u32) -> Option<u64> {
    let combined = (imm.n << 6) | (!imm.imms & 0x3F);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 || (bits == 32 && imm.n == 1) {
        return None;
    }
    let size = 1u32 << len;
    let levels = size - 1;
    let s = imm.imms & levels;
    let r = imm.immr & levels;
    if s == levels {
        return None;
    }

    let run = (1u64 << (s + 1)) - 1;
    let elem = rotate_right_within(run, r, size);
    let mut value = 0u64;
    let mut pos = 0;
    while pos < 64 {
        value |= elem << pos;
        pos += size;
    }
    if bits == 32 {
        value &= 0xFFFF_FFFF;
    }
    Some(value)
}

fn element_mask(size: u32) -> u64 {
    if size == 64 { u64::MAX } else { (1u64 << size) - 1 }
}

fn rotate_right_within(x: u64, r: u32, size: u32) -> u64 {
    if size == 64 {
        return x.rotate_right(r);
    }
    if r == 0 {
        return x;
    }
    let mask = element_mask(size);
    ((x >> r) | (x << (size - r))) & mask
}

// ============================================================
// A64 move-immediate planning
// ============================================================

/// One move-wide instruction of a constant materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveWide {
    /// `MOVZ Rd, #imm16, LSL #(hw*16)`
    Movz { hw: u32, imm16: u16 },
    /// `MOVN Rd, #imm16, LSL #(hw*16)`
    Movn { hw: u32, imm16: u16 },
    /// `MOVK Rd, #imm16, LSL #(hw*16)`
    Movk { hw: u32, imm16: u16 },
}

/// The instruction sequence chosen to put a constant in a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovImmPlan {
    /// `ORR Rd, ZR, #bitmask`
    Orr(BitmaskImm),
    Wide(Vec<MoveWide>),
}

impl MovImmPlan {
    pub fn len(&self) -> usize {
        match self {
            MovImmPlan::Orr(_) => 1,
            MovImmPlan::Wide(seq) => seq.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Choose the shortest sequence that leaves exactly `value` in a `bits`-wide
/// register. Ties prefer `MOVZ` over `MOVN` over `ORR`.
pub fn plan_mov_imm(value: u64, bits: u32) -> Result<MovImmPlan, EncodeError> {
    if bits == 32 && value > u32::MAX as u64 {
        return Err(EncodeError::UnencodableImmediate {
            form: "32-bit move",
            value,
        });
    }

    let seq = plan_mov_wide(value, bits);
    if seq.len() > 1 {
        if let Some(imm) = encode_bitmask_imm(value, bits) {
            return Ok(MovImmPlan::Orr(imm));
        }
    }
    Ok(MovImmPlan::Wide(seq))
}

/// `MOVZ`/`MOVN` plus `MOVK`s for `value`, which must fit in `bits`.
pub(crate) fn plan_mov_wide(value: u64, bits: u32) -> Vec<MoveWide> {
    let lanes = (bits / 16) as usize;
    let halves: Vec<u16> = (0..lanes).map(|i| (value >> (i * 16)) as u16).collect();

    let movz_len = halves.iter().filter(|&&h| h != 0).count().max(1);
    let movn_len = halves.iter().filter(|&&h| h != 0xFFFF).count().max(1);
    let wide_len = movz_len.min(movn_len);

    let inverted = movn_len < movz_len;
    let skip = if inverted { 0xFFFF } else { 0 };
    let mut seq = Vec::with_capacity(wide_len);
    for (hw, &half) in halves.iter().enumerate() {
        if half == skip {
            continue;
        }
        let hw = hw as u32;
        let insn = if seq.is_empty() {
            if inverted {
                MoveWide::Movn { hw, imm16: !half }
            } else {
                MoveWide::Movz { hw, imm16: half }
            }
        } else {
            MoveWide::Movk { hw, imm16: half }
        };
        seq.push(insn);
    }
    if seq.is_empty() {
        // All lanes equal the skipped pattern: 0 or all-ones.
        seq.push(if inverted {
            MoveWide::Movn { hw: 0, imm16: 0 }
        } else {
            MoveWide::Movz { hw: 0, imm16: 0 }
        });
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a32_rotated_immediates() {
        assert_eq!(encode_a32_imm(0xFF), Some(0x0FF));
        assert_eq!(encode_a32_imm(0x3FC), Some(0xFFF)); // 0xFF ror 30
        assert_eq!(encode_a32_imm(0xFF00_0000), Some(0x4FF));
        assert_eq!(encode_a32_imm(0xF000_000F), Some(0x2FF));
        assert_eq!(encode_a32_imm(0x101), None);
        assert_eq!(encode_a32_imm(0x1FC), Some(0xF7F)); // 0x7F ror 30
        assert_eq!(encode_a32_imm(0x1FE), None); // odd rotation
        assert_eq!(expand_a32_imm(0x4FF), 0xFF00_0000);
    }

    #[test]
    fn a32_chunks_cover_value() {
        for value in [0x1234_5678u32, 0x0001_0001, 0xFFFF_FFFF, 0x8000_0001, 0x101] {
            let chunks = a32_imm_chunks(value);
            assert_eq!(chunks.iter().fold(0u32, |acc, c| acc | c), value);
            assert_eq!(chunks.iter().fold(0u32, |acc, c| acc.wrapping_add(*c)), value);
            for c in chunks {
                assert!(encode_a32_imm(c).is_some(), "{c:#x}");
            }
        }
        assert!(a32_imm_chunks(0).is_empty());
        assert_eq!(a32_imm_chunks(0xFF0), vec![0xFF0]);
    }

    #[test]
    fn bitmask_known_vectors() {
        // 0x5555...: element 2, one bit set.
        assert_eq!(
            encode_bitmask_imm(0x5555_5555_5555_5555, 64),
            Some(BitmaskImm { n: 0, immr: 0, imms: 0b111100 })
        );
        // 0xFF: 64-bit element, eight ones.
        assert_eq!(
            encode_bitmask_imm(0xFF, 64),
            Some(BitmaskImm { n: 1, immr: 0, imms: 7 })
        );
        // 0xFFFF0000 in a W register: element 32, sixteen ones rotated by 16.
        assert_eq!(
            encode_bitmask_imm(0xFFFF_0000, 32),
            Some(BitmaskImm { n: 0, immr: 16, imms: 15 })
        );
        assert_eq!(encode_bitmask_imm(0, 64), None);
        assert_eq!(encode_bitmask_imm(u64::MAX, 64), None);
        assert_eq!(encode_bitmask_imm(0xFFFF_FFFF, 32), None);
        assert_eq!(encode_bitmask_imm(0x1234, 64), None);
    }

    #[test]
    fn bitmask_decode_inverts_encode() {
        for (value, bits) in [
            (0x0F0F_0F0F_0F0F_0F0Fu64, 64),
            (0x8000_0000_0000_0001, 64),
            (0x0000_FFFF_0000_FFFF, 64),
            (0x7FFF_FFFE, 32),
            (0x8000_0000, 32),
        ] {
            let imm = encode_bitmask_imm(value, bits).unwrap();
            assert_eq!(decode_bitmask_imm(imm, bits), Some(value), "{value:#x}");
        }
    }

    #[test]
    fn mov_plan_four_lanes() {
        let plan = plan_mov_imm(0x1234_5678_9ABC_DEF0, 64).unwrap();
        assert_eq!(
            plan,
            MovImmPlan::Wide(vec![
                MoveWide::Movz { hw: 0, imm16: 0xDEF0 },
                MoveWide::Movk { hw: 1, imm16: 0x9ABC },
                MoveWide::Movk { hw: 2, imm16: 0x5678 },
                MoveWide::Movk { hw: 3, imm16: 0x1234 },
            ])
        );
    }

    #[test]
    fn mov_plan_prefers_short_forms() {
        assert_eq!(
            plan_mov_imm(0, 64).unwrap(),
            MovImmPlan::Wide(vec![MoveWide::Movz { hw: 0, imm16: 0 }])
        );
        assert_eq!(
            plan_mov_imm(u64::MAX, 64).unwrap(),
            MovImmPlan::Wide(vec![MoveWide::Movn { hw: 0, imm16: 0 }])
        );
        assert_eq!(
            plan_mov_imm(0xFFFF_FFFF_FFFF_1234, 64).unwrap(),
            MovImmPlan::Wide(vec![MoveWide::Movn { hw: 0, imm16: !0x1234 }])
        );
        assert_eq!(
            plan_mov_imm(0x0000_0042_0000_0000, 64).unwrap(),
            MovImmPlan::Wide(vec![MoveWide::Movz { hw: 2, imm16: 0x42 }])
        );
        // Two wide instructions would be needed; a bitmask does it in one.
        assert!(matches!(
            plan_mov_imm(0x00FF_00FF_00FF_00FF, 64).unwrap(),
            MovImmPlan::Orr(_)
        ));
    }

    #[test]
    fn mov_plan_rejects_wide_value_for_w() {
        assert!(plan_mov_imm(0x1_0000_0000, 32).is_err());
        assert_eq!(plan_mov_imm(0xFFFF_FFFF, 32).unwrap().len(), 1);
    }
}
