use std::fmt;

use crate::error::EncodeError;

/// A placeholder for a code offset that may not be known yet.
///
/// Labels are handed out by one emitter and are only meaningful to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// How a PC-relative field is laid out inside the word that refers to a
/// label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixupKind {
    /// A32 `B`/`BL`: signed imm24 words, PC reads 8 ahead.
    A32Branch24,
    /// A32 literal `LDR`: imm12 bytes with the U (add) bit, PC reads 8 ahead.
    A32Literal12,
    /// A64 `B`/`BL`: signed imm26 words at bit 0.
    A64Branch26,
    /// A64 `B.cond`, `CBZ`/`CBNZ`, `LDR` literal: signed imm19 words at bit 5.
    A64Imm19,
    /// A64 `TBZ`/`TBNZ`: signed imm14 words at bit 5.
    A64Imm14,
}

impl FixupKind {
    /// Inclusive range of the encoded displacement, in field units.
    pub fn range(self) -> (i64, i64) {
        match self {
            FixupKind::A32Branch24 => (-(1 << 23), (1 << 23) - 1),
            FixupKind::A32Literal12 => (-4095, 4095),
            FixupKind::A64Branch26 => (-(1 << 25), (1 << 25) - 1),
            FixupKind::A64Imm19 => (-(1 << 18), (1 << 18) - 1),
            FixupKind::A64Imm14 => (-(1 << 13), (1 << 13) - 1),
        }
    }

    /// Displacement from `site` to `target` (both byte offsets) in the units
    /// the field stores.
    pub fn displacement(self, site: usize, target: usize) -> i64 {
        let delta = target as i64 - site as i64;
        match self {
            FixupKind::A32Branch24 => (delta - 8) >> 2,
            FixupKind::A32Literal12 => delta - 8,
            FixupKind::A64Branch26 | FixupKind::A64Imm19 | FixupKind::A64Imm14 => delta >> 2,
        }
    }

    /// Rewrite the displacement field of `word` so it refers to `target`.
    /// On overflow returns the displacement that did not fit.
    pub fn apply(self, word: u32, site: usize, target: usize) -> Result<u32, i64> {
        let disp = self.displacement(site, target);
        let (min, max) = self.range();
        if disp < min || disp > max {
            return Err(disp);
        }
        let field = disp as u32;
        Ok(match self {
            FixupKind::A32Branch24 => (word & 0xFF00_0000) | (field & 0x00FF_FFFF),
            FixupKind::A32Literal12 => {
                let up = u32::from(disp >= 0);
                (word & !(1 << 23 | 0xFFF)) | (up << 23) | disp.unsigned_abs() as u32
            }
            FixupKind::A64Branch26 => (word & 0xFC00_0000) | (field & 0x03FF_FFFF),
            FixupKind::A64Imm19 => (word & !(0x7FFFF << 5)) | ((field & 0x7FFFF) << 5),
            FixupKind::A64Imm14 => (word & !(0x3FFF << 5)) | ((field & 0x3FFF) << 5),
        })
    }

    /// Read the displacement back out of an encoded word and return the byte
    /// offset it targets.
    pub fn target(self, word: u32, site: usize) -> usize {
        let delta = match self {
            FixupKind::A32Branch24 => (sign_extend(word & 0x00FF_FFFF, 24) << 2) + 8,
            FixupKind::A32Literal12 => {
                let imm = (word & 0xFFF) as i64;
                if word & (1 << 23) != 0 { imm + 8 } else { 8 - imm }
            }
            FixupKind::A64Branch26 => sign_extend(word & 0x03FF_FFFF, 26) << 2,
            FixupKind::A64Imm19 => sign_extend((word >> 5) & 0x7FFFF, 19) << 2,
            FixupKind::A64Imm14 => sign_extend((word >> 5) & 0x3FFF, 14) << 2,
        };
        (site as i64 + delta) as usize
    }
}

pub(crate) fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value as i64) << shift) >> shift
}

/// A word waiting for its label to be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub label: Label,
    /// Byte offset of the word to patch.
    pub site: usize,
    pub kind: FixupKind,
}

/// Bound offsets and pending references for one emitter.
#[derive(Debug, Default)]
pub(crate) struct LabelTable {
    bound: Vec<Option<usize>>,
    pending: Vec<Fixup>,
}

impl LabelTable {
    pub(crate) fn new_label(&mut self) -> Label {
        let label = Label(self.bound.len() as u32);
        self.bound.push(None);
        label
    }

    /// Byte offset of `label`, or `None` while it is unbound.
    pub(crate) fn offset(&self, label: Label) -> Result<Option<usize>, EncodeError> {
        self.bound
            .get(label.0 as usize)
            .copied()
            .ok_or(EncodeError::UnknownLabel(label))
    }

    /// Bind `label` to `offset` and hand back the fixups that were waiting
    /// on it. They are removed from the table and will not be seen again.
    pub(crate) fn bind(&mut self, label: Label, offset: usize) -> Result<Vec<Fixup>, EncodeError> {
        let slot = self
            .bound
            .get_mut(label.0 as usize)
            .ok_or(EncodeError::UnknownLabel(label))?;
        if slot.is_some() {
            return Err(EncodeError::LabelAlreadyBound(label));
        }
        *slot = Some(offset);

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|f| f.label == label);
        self.pending = waiting;
        Ok(ready)
    }

    pub(crate) fn defer(&mut self, fixup: Fixup) {
        self.pending.push(fixup);
    }

    /// First label that still has a reference waiting on it.
    pub(crate) fn first_unresolved(&self) -> Option<Label> {
        self.pending.iter().map(|f| f.label).min()
    }

    pub(crate) fn pending(&self) -> &[Fixup] {
        &self.pending
    }

    pub(crate) fn bound_offsets(&self) -> Vec<(Label, usize)> {
        self.bound
            .iter()
            .enumerate()
            .filter_map(|(i, off)| off.map(|off| (Label(i as u32), off)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a32_branch_displacement_counts_from_pc_plus_8() {
        // B . (branch to self) encodes imm24 = -2.
        let word = FixupKind::A32Branch24.apply(0xEA00_0000, 16, 16).unwrap();
        assert_eq!(word, 0xEAFF_FFFE);
        assert_eq!(FixupKind::A32Branch24.target(word, 16), 16);
    }

    #[test]
    fn a32_literal_sets_up_bit() {
        let fwd = FixupKind::A32Literal12.apply(0xE590_0000, 0, 20).unwrap();
        assert_eq!(fwd, 0xE590_000C);
        let back = FixupKind::A32Literal12.apply(0xE590_0000, 100, 0).unwrap();
        assert_eq!(back, 0xE510_006C);
        assert_eq!(FixupKind::A32Literal12.target(back, 100), 0);
    }

    #[test]
    fn a64_imm19_preserves_other_fields() {
        // B.NE with imm19 = 3
        let word = FixupKind::A64Imm19.apply(0x5400_0001, 0, 12).unwrap();
        assert_eq!(word, 0x5400_0061);
        // CBZ X7 backwards by one word keeps Rt.
        let word = FixupKind::A64Imm19.apply(0xB400_0007, 8, 4).unwrap();
        assert_eq!(word & 0x1F, 7);
        assert_eq!(FixupKind::A64Imm19.target(word, 8), 4);
    }

    #[test]
    fn out_of_range_reports_displacement() {
        let err = FixupKind::A64Imm14.apply(0x3600_0000, 0, 4 << 13).unwrap_err();
        assert_eq!(err, 1 << 13);
        assert!(FixupKind::A64Imm14.apply(0x3600_0000, 0, (4 << 13) - 4).is_ok());
        assert!(FixupKind::A64Imm14.apply(0x3600_0000, 4 << 13, 0).is_ok());
    }

    #[test]
    fn table_hands_out_fixups_once() {
        let mut table = LabelTable::default();
        let a = table.new_label();
        let b = table.new_label();
        table.defer(Fixup { label: a, site: 0, kind: FixupKind::A64Branch26 });
        table.defer(Fixup { label: b, site: 4, kind: FixupKind::A64Branch26 });
        table.defer(Fixup { label: a, site: 8, kind: FixupKind::A64Imm19 });

        let ready = table.bind(a, 12).unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(table.pending().len(), 1);
        assert_eq!(table.first_unresolved(), Some(b));
        assert_eq!(table.bind(a, 16), Err(EncodeError::LabelAlreadyBound(a)));
        assert_eq!(table.offset(Label(9)), Err(EncodeError::UnknownLabel(Label(9))));
    }
}
