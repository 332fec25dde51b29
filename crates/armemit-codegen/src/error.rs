use thiserror::Error;

use crate::cond::Cond;
use crate::label::{FixupKind, Label};

/// Reasons an instruction or a session cannot be encoded.
///
/// Every variant aborts the current session. None of them are produced by
/// silently truncating a field: a truncated encoding is a different
/// instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{field} value {value} out of range {min}..={max}")]
    ImmediateOutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("immediate {value:#x} has no {form} encoding")]
    UnencodableImmediate { form: &'static str, value: u64 },

    #[error("register {reg} is not valid as {role} of {form}")]
    InvalidRegister {
        reg: String,
        role: &'static str,
        form: &'static str,
    },

    #[error("{form} mixes register widths: {reg} is not {expected}-bit")]
    WidthMismatch {
        form: &'static str,
        reg: String,
        expected: u32,
    },

    #[error("condition {cond} is not valid for {form}")]
    InvalidCondition { cond: Cond, form: &'static str },

    #[error("shift {shift} is not allowed in {form}")]
    InvalidShift { form: &'static str, shift: &'static str },

    #[error("{form} offset {offset} is not a multiple of {align}")]
    MisalignedOffset {
        form: &'static str,
        offset: i64,
        align: i64,
    },

    #[error("label {0} is already bound")]
    LabelAlreadyBound(Label),

    #[error("label {0} was referenced but never bound")]
    UnboundLabel(Label),

    #[error("label {0} does not belong to this emitter")]
    UnknownLabel(Label),

    #[error(
        "branch at {site:#x} to {label} needs displacement {displacement}, \
         which does not fit {kind:?}"
    )]
    DisplacementOutOfRange {
        label: Label,
        site: usize,
        displacement: i64,
        kind: FixupKind,
    },
}

impl EncodeError {
    pub(crate) fn out_of_range(field: &'static str, value: i64, min: i64, max: i64) -> Self {
        EncodeError::ImmediateOutOfRange {
            field,
            value,
            min,
            max,
        }
    }
}

/// Fail with `ImmediateOutOfRange` unless `min <= value <= max`.
pub(crate) fn check_range(
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
) -> Result<(), EncodeError> {
    if value < min || value > max {
        return Err(EncodeError::out_of_range(field, value, min, max));
    }
    Ok(())
}
