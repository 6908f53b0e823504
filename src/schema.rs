//! Resolved schema graph.
//!
//! Messages and enums live in two arenas owned by [`Schema`]; nesting is
//! expressed through [`MessageId`] / [`EnumId`] handles (parent and children),
//! never through owning references. The graph is built once by
//! [`crate::resolve::resolve`] and is read-only afterwards.
use indexmap::IndexMap;

pub use crate::raw::{MessageKind, Rule};
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// HANDLES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumId(pub(crate) usize);

// ————————————————————————————————————————————————————————————————————————————
// SCALARS & WIRE TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarKind {
    /// Scalar named by a declared type, `None` for message/enum names.
    pub fn from_proto_name(name: &str) -> Option<Self> {
        let kind = match name {
            "double" => Self::Double,
            "float" => Self::Float,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "sint32" => Self::Sint32,
            "sint64" => Self::Sint64,
            "fixed32" => Self::Fixed32,
            "fixed64" => Self::Fixed64,
            "sfixed32" => Self::Sfixed32,
            "sfixed64" => Self::Sfixed64,
            "bool" => Self::Bool,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            _ => return None,
        };
        Some(kind)
    }

    pub fn proto_name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Sint32 => "sint32",
            Self::Sint64 => "sint64",
            Self::Fixed32 => "fixed32",
            Self::Fixed64 => "fixed64",
            Self::Sfixed32 => "sfixed32",
            Self::Sfixed64 => "sfixed64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }

    pub fn wire_type(self) -> WireType {
        match self {
            Self::Double | Self::Fixed64 | Self::Sfixed64 => WireType::Fixed64,
            Self::Float | Self::Fixed32 | Self::Sfixed32 => WireType::Fixed32,
            Self::Int32
            | Self::Int64
            | Self::Uint32
            | Self::Uint64
            | Self::Sint32
            | Self::Sint64
            | Self::Bool => WireType::Varint,
            Self::String | Self::Bytes => WireType::LengthDelimited,
        }
    }

    /// string and bytes are held by reference and may be absent.
    pub fn is_nullable(self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }
}

/// On-wire representation class. Groups (codes 3 and 4) are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    pub fn code(self) -> u8 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// GRAPH
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub(crate) messages: Vec<MessageType>,
    pub(crate) enums: Vec<EnumType>,
    /// Top-level messages, in declaration order.
    pub(crate) roots: Vec<MessageId>,
    /// Top-level enums, in declaration order.
    pub(crate) root_enums: Vec<EnumId>,
}

#[derive(Debug, Clone)]
pub struct MessageType {
    /// Declared name; type lookup compares against this.
    pub name: String,
    /// Canonical identifier (camel-cased display name).
    pub ident: String,
    /// Dotted path of declared names from the schema root.
    pub full_name: String,
    pub parent: Option<MessageId>,
    /// Keyed by field number, in declaration order.
    pub fields: IndexMap<u32, Field>,
    pub messages: Vec<MessageId>,
    pub enums: Vec<EnumId>,
    pub options: MessageOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOptions {
    pub preserve_unknown: bool,
    pub external: bool,
    pub kind: MessageKind,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub ident: String,
    pub full_name: String,
    pub parent: Option<MessageId>,
    /// Never empty; the first entry is the implicit default.
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub number: u32,
    /// Declared name.
    pub name: String,
    /// Display identifier; also the key used by the JSON value bridge.
    pub ident: String,
    pub rule: Rule,
    pub kind: FieldKind,
    pub packed: bool,
    /// Explicit default only. Implicit enum defaults come from [`Schema::implicit_default`].
    pub default: Option<DefaultValue>,
    /// Wire type of the field on the wire: the element wire type, or
    /// LengthDelimited for packed fields.
    pub wire_type: WireType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Enum(EnumId),
    Message(MessageId),
}

impl FieldKind {
    /// Wire type of one element (ignores packing).
    pub fn wire_type(self) -> WireType {
        match self {
            FieldKind::Scalar(s) => s.wire_type(),
            FieldKind::Enum(_) => WireType::Varint,
            FieldKind::Message(_) => WireType::LengthDelimited,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Parsed scalar literal.
    Scalar(Value),
    /// Member reference rewritten to its fully-qualified form.
    Enum {
        enum_id: EnumId,
        member: String,
        value: i32,
        qualified: String,
    },
}

impl DefaultValue {
    pub fn to_value(&self) -> Value {
        match self {
            DefaultValue::Scalar(v) => v.clone(),
            DefaultValue::Enum { value, .. } => Value::Enum(*value),
        }
    }
}

impl Schema {
    pub fn message(&self, id: MessageId) -> &MessageType {
        &self.messages[id.0]
    }

    pub fn enum_type(&self, id: EnumId) -> &EnumType {
        &self.enums[id.0]
    }

    pub fn messages(&self) -> impl Iterator<Item = (MessageId, &MessageType)> {
        self.messages.iter().enumerate().map(|(i, m)| (MessageId(i), m))
    }

    pub fn roots(&self) -> &[MessageId] {
        &self.roots
    }

    pub fn root_enums(&self) -> &[EnumId] {
        &self.root_enums
    }

    /// Look up a message by its dotted full name (declared names).
    pub fn find_message(&self, full_name: &str) -> Option<MessageId> {
        self.messages().find(|(_, m)| m.full_name == full_name).map(|(id, _)| id)
    }

    /// Whether a singular field of this kind may be absent.
    pub fn is_nullable(&self, kind: FieldKind) -> bool {
        match kind {
            FieldKind::Scalar(s) => s.is_nullable(),
            FieldKind::Enum(_) => false,
            FieldKind::Message(id) => self.message(id).options.kind != MessageKind::Struct,
        }
    }

    /// The explicit default, or for enum fields the first declared member.
    pub fn implicit_default(&self, field: &Field) -> Option<Value> {
        if let Some(d) = &field.default {
            return Some(d.to_value());
        }
        match field.kind {
            FieldKind::Enum(id) => self.enum_type(id).values.first().map(|v| Value::Enum(v.value)),
            _ => None,
        }
    }

    pub fn kind_name(&self, kind: FieldKind) -> String {
        match kind {
            FieldKind::Scalar(s) => s.proto_name().to_string(),
            FieldKind::Enum(id) => self.enum_type(id).full_name.clone(),
            FieldKind::Message(id) => self.message(id).full_name.clone(),
        }
    }
}

impl EnumType {
    pub fn member_by_value(&self, value: i32) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.value == value)
    }

    pub fn member_by_name(&self, name: &str) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.name == name)
    }
}
