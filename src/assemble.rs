//! Message codec assembly: per-message encode and decode procedures built
//! from the field plans.
use std::collections::HashMap;

use tracing::debug;

use crate::plan::{plan, CodecPlan};
use crate::raw::{MessageKind, Rule};
use crate::schema::{FieldKind, MessageId, Schema};
use crate::value::{FieldValue, MessageValue, Value};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Consume until the input is exhausted.
    #[default]
    Unbounded,
    /// A varint length prefix gives the limit.
    LengthDelimited,
    /// The caller gives the limit.
    ExplicitLength(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPolicy {
    Capture,
    Discard,
}

/// One pre-population step run on a fresh instance before decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum InitStep {
    EmptyList { number: u32 },
    Default { number: u32, value: Value },
    /// Nested value-type message, itself fully initialized.
    Instance { number: u32, message: MessageId },
}

#[derive(Debug, Clone)]
pub struct EncodeProcedure {
    pub message: MessageId,
    pub name: String,
    /// Declaration order.
    pub plans: Vec<CodecPlan>,
    /// Re-emit captured unknown fields after the known ones.
    pub write_unknown: bool,
}

#[derive(Debug, Clone)]
pub struct DecodeProcedure {
    pub message: MessageId,
    pub name: String,
    pub framing: FramingMode,
    pub init: Vec<InitStep>,
    pub dispatch: HashMap<u32, CodecPlan>,
    pub unknown: UnknownPolicy,
}

// ————————————————————————————————————————————————————————————————————————————
// ASSEMBLY
// ————————————————————————————————————————————————————————————————————————————

pub fn assemble_encoder(schema: &Schema, message: MessageId) -> EncodeProcedure {
    let m = schema.message(message);
    let plans = m.fields.values().map(|f| plan(schema, f, m)).collect::<Vec<_>>();
    debug!(
        name = %m.full_name,
        fields = plans.len(),
        unknown = m.options.preserve_unknown,
        "assembled encoder"
    );
    EncodeProcedure {
        message,
        name: m.full_name.clone(),
        plans,
        write_unknown: m.options.preserve_unknown,
    }
}

pub fn assemble_decoder(
    schema: &Schema,
    message: MessageId,
    framing: FramingMode,
) -> DecodeProcedure {
    let m = schema.message(message);
    let dispatch = m
        .fields
        .values()
        .map(|f| (f.number, plan(schema, f, m)))
        .collect::<HashMap<_, _>>();
    let unknown = if m.options.preserve_unknown {
        UnknownPolicy::Capture
    } else {
        UnknownPolicy::Discard
    };
    debug!(name = %m.full_name, fields = dispatch.len(), ?framing, ?unknown, "assembled decoder");
    DecodeProcedure {
        message,
        name: m.full_name.clone(),
        framing,
        init: init_steps(schema, message),
        dispatch,
        unknown,
    }
}

/// Pre-population for a fresh instance:
/// - repeated fields get an empty list
/// - fields with an explicit default get it; enums otherwise get their first member
/// - value-type messages get a nested initialized instance
/// - other value-semantics scalars get their zero value
///
/// Nullable fields (string, bytes, class and interface messages) without a
/// default stay absent.
pub fn init_steps(schema: &Schema, message: MessageId) -> Vec<InitStep> {
    let mut out = Vec::new();
    for field in schema.message(message).fields.values() {
        let number = field.number;
        if field.rule == Rule::Repeated {
            out.push(InitStep::EmptyList { number });
            continue;
        }
        if let Some(value) = schema.implicit_default(field) {
            out.push(InitStep::Default { number, value });
            continue;
        }
        match field.kind {
            FieldKind::Message(id) if schema.message(id).options.kind == MessageKind::Struct => {
                out.push(InitStep::Instance { number, message: id });
            }
            FieldKind::Scalar(kind) if !kind.is_nullable() => {
                out.push(InitStep::Default { number, value: Value::zero(kind) });
            }
            _ => {}
        }
    }
    out
}

impl InitStep {
    pub fn apply(&self, schema: &Schema, out: &mut MessageValue) {
        match self {
            InitStep::EmptyList { number } => {
                out.fields.insert(*number, FieldValue::Repeated(Vec::new()));
            }
            InitStep::Default { number, value } => out.set(*number, value.clone()),
            InitStep::Instance { number, message } => {
                out.set(*number, Value::Message(MessageValue::new(schema, *message)));
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
