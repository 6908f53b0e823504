//! Error taxonomy, one enum per phase.
//!
//! Resolution errors are fatal to the whole compilation job. Encode and
//! decode errors are fatal to the single call that raised them; wire-type
//! mismatches and unknown field numbers are never errors.
use thiserror::Error;

// ————————————————————————————————————————————————————————————————————————————
// RESOLUTION
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("name not found: `{type_name}` (field `{field}` in `{message}`)")]
    NameNotFound {
        message: String,
        field: String,
        type_name: String,
    },

    #[error("invalid packed field `{field}` in `{message}`: {reason}")]
    InvalidPackedField {
        message: String,
        field: String,
        reason: PackedViolation,
    },

    #[error("field `{field}` in `{message}` is message-typed and cannot carry a default")]
    UnsupportedDefault { message: String, field: String },

    #[error("invalid default `{literal}` for field `{field}` in `{message}`: {reason}")]
    InvalidDefault {
        message: String,
        field: String,
        literal: String,
        reason: String,
    },

    #[error("enum `{enum_name}` has no member `{member}` (default of `{message}.{field}`)")]
    UnknownEnumMember {
        message: String,
        field: String,
        enum_name: String,
        member: String,
    },

    #[error("enum `{0}` declares no members")]
    EmptyEnum(String),

    #[error("field number {number} used twice in `{message}`")]
    DuplicateFieldNumber { message: String, number: u32 },

    #[error(
        "field number {number} of `{message}.{field}` is out of range (1..={max})",
        max = crate::wire::MAX_FIELD_NUMBER
    )]
    InvalidFieldNumber {
        message: String,
        field: String,
        number: u32,
    },

    #[error("invalid identifier `{0}`")]
    InvalidName(String),

    #[error("struct `{0}` contains itself through non-repeated fields")]
    RecursiveStruct(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedViolation {
    /// `packed` on a required or optional field.
    NotRepeated,
    /// `packed` on string, bytes or message elements.
    LengthDelimitedElement,
}

impl std::fmt::Display for PackedViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackedViolation::NotRepeated => write!(f, "only repeated fields can be packed"),
            PackedViolation::LengthDelimitedElement => {
                write!(f, "packed field not allowed for length delimited types")
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ENCODE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("required field `{field}` of `{message}` is not set")]
    RequiredFieldMissing { message: String, field: String },

    #[error("field `{field}` of `{message}`: expected {expected}, got {got}")]
    TypeMismatch {
        message: String,
        field: String,
        expected: String,
        got: String,
    },

    #[error("no codec assembled for message `{0}`")]
    UnknownMessage(String),
}

// ————————————————————————————————————————————————————————————————————————————
// DECODE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("corrupt stream at byte {position}: invalid field number")]
    CorruptStream { position: usize },

    #[error("read past limit: position {position} > limit {limit}")]
    LimitExceeded { position: usize, limit: usize },

    #[error("packed field {field}: declared {declared} bytes, consumed {consumed}")]
    PackedLengthMismatch {
        field: u32,
        declared: usize,
        consumed: usize,
    },

    #[error("unsupported operation on `{message}.{field}`: {reason}")]
    UnsupportedOperation {
        message: String,
        field: String,
        reason: &'static str,
    },

    #[error("unexpected end of stream at byte {position} (needed {needed} more)")]
    UnexpectedEof { position: usize, needed: usize },

    #[error("varint longer than 10 bytes at byte {position}")]
    VarintOverflow { position: usize },

    #[error("invalid wire type {code} at byte {position}")]
    InvalidWireType { code: u8, position: usize },

    #[error("invalid UTF-8 in string at byte {position}")]
    InvalidUtf8 { position: usize },

    #[error(
        "message nesting deeper than {max} levels at byte {position}",
        max = crate::codec::RECURSION_LIMIT
    )]
    RecursionLimit { position: usize },

    #[error("no codec assembled for message `{0}`")]
    UnknownMessage(String),
}
