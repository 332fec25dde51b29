use std::fmt;
use std::marker::PhantomData;

use tracing::{debug, trace};

use crate::error::EncodeError;
use crate::label::{Fixup, FixupKind, Label, LabelTable};

/// Instruction set a session emits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isa {
    /// 32-bit ARM (A32) encoding.
    A32,
    /// AArch64 (A64) encoding.
    A64,
}

impl Isa {
    /// The ISA of the machine this process runs on, if it is one of ours.
    pub fn host() -> Option<Isa> {
        if cfg!(target_arch = "aarch64") {
            Some(Isa::A64)
        } else if cfg!(target_arch = "arm") {
            Some(Isa::A32)
        } else {
            None
        }
    }

    /// Filler word used for alignment padding.
    pub fn nop(self) -> u32 {
        match self {
            // MOV r0, r0
            Isa::A32 => 0xE1A0_0000,
            Isa::A64 => 0xD503_201F,
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Isa::A32 => "arm",
            Isa::A64 => "aarch64",
        })
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Arm {}
    impl Sealed for super::Arm64 {}
}

/// Marker for the instruction set an [`Emitter`] encodes. Each target gets
/// its own inherent `impl Emitter<T>` with the instruction methods.
pub trait Target: sealed::Sealed {
    const ISA: Isa;
}

/// 32-bit ARM.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arm;

/// AArch64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arm64;

impl Target for Arm {
    const ISA: Isa = Isa::A32;
}

impl Target for Arm64 {
    const ISA: Isa = Isa::A64;
}

/// One code-generation session.
///
/// Appends u32 instruction words to an internal buffer and owns the labels
/// and pending fixups that refer into it. The caller decides *what* to emit;
/// the per-ISA impls in `a32` and `a64` know *how* to encode each form.
pub struct Emitter<T: Target> {
    pub(crate) code: Vec<u32>,
    /// Byte offsets recorded by `mark()`.
    pub(crate) markers: Vec<usize>,
    labels: LabelTable,
    /// Constants referenced by PC-relative loads, placed at `finish()`.
    literals: Vec<(Label, u32)>,
    _target: PhantomData<T>,
}

impl<T: Target> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Target> Emitter<T> {
    pub fn new() -> Self {
        Emitter {
            code: Vec::with_capacity(256),
            markers: Vec::new(),
            labels: LabelTable::default(),
            literals: Vec::new(),
            _target: PhantomData,
        }
    }

    pub fn isa(&self) -> Isa {
        T::ISA
    }

    /// Current offset in bytes from the start of the buffer.
    pub fn offset(&self) -> usize {
        self.code.len() * 4
    }

    /// Access the emitted instruction stream.
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    /// Record the current byte offset as a boundary marker.
    pub fn mark(&mut self) {
        self.markers.push(self.offset());
    }

    pub fn markers(&self) -> &[usize] {
        &self.markers
    }

    /// Append a raw word (data or a hand-encoded instruction).
    pub fn emit(&mut self, word: u32) {
        self.code.push(word);
    }

    /// Pad with NOPs until the offset is a multiple of `align` bytes.
    pub fn align(&mut self, align: usize) -> Result<(), EncodeError> {
        if align < 4 || !align.is_power_of_two() {
            return Err(EncodeError::UnencodableImmediate {
                form: "align",
                value: align as u64,
            });
        }
        while self.offset() % align != 0 {
            self.code.push(T::ISA.nop());
        }
        Ok(())
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.new_label()
    }

    /// Byte offset `label` is bound to, or `None` while it is unbound.
    pub fn label_offset(&self, label: Label) -> Result<Option<usize>, EncodeError> {
        self.labels.offset(label)
    }

    /// Bind `label` to the current offset and patch every reference that
    /// was waiting on it.
    pub fn bind(&mut self, label: Label) -> Result<(), EncodeError> {
        let target = self.offset();
        let ready = self.labels.bind(label, target)?;
        debug!(%label, target, fixups = ready.len(), "bind label");
        for fixup in ready {
            self.resolve(fixup, target)?;
        }
        Ok(())
    }

    /// Number of references still waiting for a label.
    pub fn pending_fixups(&self) -> usize {
        self.labels.pending().len()
    }

    /// Append `word`, whose `kind` field refers to `label`. Encoded right
    /// away when the label is bound, otherwise patched at `bind()`.
    pub(crate) fn emit_ref(
        &mut self,
        word: u32,
        label: Label,
        kind: FixupKind,
    ) -> Result<(), EncodeError> {
        let bound = self.labels.offset(label)?;
        let site = self.offset();
        let fixup = Fixup { label, site, kind };
        self.code.push(word);
        match bound {
            Some(target) => self.resolve(fixup, target),
            None => {
                self.labels.defer(fixup);
                Ok(())
            }
        }
    }

    fn resolve(&mut self, fixup: Fixup, target: usize) -> Result<(), EncodeError> {
        let index = fixup.site / 4;
        let word = self.code[index];
        let patched = fixup
            .kind
            .apply(word, fixup.site, target)
            .map_err(|displacement| EncodeError::DisplacementOutOfRange {
                label: fixup.label,
                site: fixup.site,
                displacement,
                kind: fixup.kind,
            })?;
        trace!(
            label = %fixup.label,
            site = fixup.site,
            target,
            kind = ?fixup.kind,
            "resolve fixup {word:#010x} -> {patched:#010x}"
        );
        self.code[index] = patched;
        Ok(())
    }

    /// Label for a pooled constant, shared between loads of the same value.
    pub(crate) fn literal(&mut self, value: u32) -> Label {
        if let Some(&(label, _)) = self.literals.iter().find(|(_, v)| *v == value) {
            return label;
        }
        let label = self.labels.new_label();
        self.literals.push((label, value));
        label
    }

    /// Close the session: place the literal pool, check that every
    /// referenced label was bound, and hand back the finished code.
    pub fn finish(mut self) -> Result<Code, EncodeError> {
        let literals = std::mem::take(&mut self.literals);
        if !literals.is_empty() {
            debug!(count = literals.len(), at = self.offset(), "place literal pool");
        }
        for (label, value) in literals {
            self.bind(label)?;
            self.code.push(value);
        }

        if let Some(label) = self.labels.first_unresolved() {
            return Err(EncodeError::UnboundLabel(label));
        }

        debug!(isa = %T::ISA, bytes = self.offset(), "finish session");
        Ok(Code {
            isa: T::ISA,
            labels: self.labels.bound_offsets(),
            words: self.code,
            markers: self.markers,
        })
    }
}

/// The output of a finished session: fully resolved words ready to be
/// copied into executable memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub isa: Isa,
    pub words: Vec<u32>,
    /// Bound labels and their byte offsets.
    pub labels: Vec<(Label, usize)>,
    pub markers: Vec<usize>,
}

impl Code {
    pub fn len_bytes(&self) -> usize {
        self.words.len() * 4
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels
            .iter()
            .find(|(l, _)| *l == label)
            .map(|&(_, off)| off)
    }

    /// Little-endian byte image, the order both ISAs fetch instructions in.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}
