//! Per-field codec plans.
//!
//! A [`CodecPlan`] is a pure function of a resolved field and the message
//! that contains it: the constant key bytes, how one value is written
//! (including the presence guard), and how one value is read back.
//!
//! | rule     | packed | kind                 | write                                   |
//! |----------|--------|----------------------|-----------------------------------------|
//! | repeated | yes    | varint/fixed         | one key, one length, raw elements       |
//! | repeated | no     | any                  | key + value per element                 |
//! | required | -      | nullable             | error if absent, else key + value       |
//! | required | -      | value-semantics      | key + value                             |
//! | optional | -      | scalar/enum, default | key + value unless equal to the default |
//! | optional | -      | scalar/enum          | key + value                             |
//! | optional | -      | nullable             | key + value if present                  |
//!
//! Messages are always framed: encode into a scratch buffer, then key,
//! varint length, bytes. Lists of interface-kind messages cannot be read.
use serde_json::{json, Value as Json};

use crate::raw::{MessageKind, Rule};
use crate::schema::{Field, FieldKind, MessageId, MessageType, ScalarKind, Schema, WireType};
use crate::value::Value;
use crate::wire::Key;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub struct CodecPlan {
    pub number: u32,
    pub ident: String,
    /// Full name of the containing message, for error context.
    pub owner: String,
    pub required: bool,
    /// Key as written; its wire type is LengthDelimited for packed fields.
    pub key: Key,
    /// Encoded key, computed once.
    pub key_bytes: Vec<u8>,
    pub write: WritePlan,
    pub read: ReadPlan,
}

/// Primitive wire operation for one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Varint,
    Zigzag32,
    Zigzag64,
    Fixed32,
    Fixed64,
    /// Length-delimited raw bytes.
    Bytes,
    /// Length-delimited UTF-8 text.
    Utf8,
    /// Length-delimited nested message.
    Embedded(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueOp {
    pub primitive: Primitive,
    /// Shape of the in-memory value produced or consumed.
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteGuard {
    Always,
    /// Nullable required field: absent is an encode error.
    RequirePresent,
    /// Optional field with an explicit default: skipped when equal (or absent).
    UnlessDefault(Value),
    /// Nullable optional field: skipped when absent.
    IfPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedLength {
    /// Every element has this many bytes; the length is `width * count`.
    Fixed { width: usize },
    /// Elements are encoded into a scratch buffer first.
    Buffered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WritePlan {
    Single { guard: WriteGuard, value: ValueOp },
    Repeated { element: ValueOp },
    Packed { element: ValueOp, length: PackedLength },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadPlan {
    /// Scalar, enum, string or bytes: last value wins.
    Assign { value: ValueOp },
    /// Singular message: merge into the current value, creating one only
    /// when `instantiate` is set (interface kinds cannot be created).
    Merge { message: MessageId, instantiate: bool },
    Append { element: ValueOp },
    /// Length-delimited run of elements, read until the length is used up.
    AppendPacked { element: ValueOp },
    Unsupported { reason: &'static str },
}

// ————————————————————————————————————————————————————————————————————————————
// PLANNING
// ————————————————————————————————————————————————————————————————————————————

impl ValueOp {
    pub fn for_kind(kind: FieldKind) -> ValueOp {
        use ScalarKind as S;
        let primitive = match kind {
            FieldKind::Scalar(s) => match s {
                S::Double | S::Fixed64 | S::Sfixed64 => Primitive::Fixed64,
                S::Float | S::Fixed32 | S::Sfixed32 => Primitive::Fixed32,
                S::Int32 | S::Int64 | S::Uint32 | S::Uint64 | S::Bool => Primitive::Varint,
                S::Sint32 => Primitive::Zigzag32,
                S::Sint64 => Primitive::Zigzag64,
                S::String => Primitive::Utf8,
                S::Bytes => Primitive::Bytes,
            },
            FieldKind::Enum(_) => Primitive::Varint,
            FieldKind::Message(id) => Primitive::Embedded(id),
        };
        ValueOp { primitive, kind }
    }

    pub fn fixed_width(self) -> Option<usize> {
        match self.primitive {
            Primitive::Fixed32 => Some(4),
            Primitive::Fixed64 => Some(8),
            _ => None,
        }
    }

    pub fn wire_type(self) -> WireType {
        match self.primitive {
            Primitive::Varint | Primitive::Zigzag32 | Primitive::Zigzag64 => WireType::Varint,
            Primitive::Fixed32 => WireType::Fixed32,
            Primitive::Fixed64 => WireType::Fixed64,
            Primitive::Bytes | Primitive::Utf8 | Primitive::Embedded(_) => {
                WireType::LengthDelimited
            }
        }
    }
}

/// Derive the plan for one resolved field. Never fails: fields that cannot
/// be read get [`ReadPlan::Unsupported`], which fails when reached.
pub fn plan(schema: &Schema, field: &Field, containing: &MessageType) -> CodecPlan {
    let op = ValueOp::for_kind(field.kind);
    let nullable = schema.is_nullable(field.kind);
    let interface = matches!(
        field.kind,
        FieldKind::Message(id) if schema.message(id).options.kind == MessageKind::Interface
    );

    let write = match field.rule {
        Rule::Repeated if field.packed => WritePlan::Packed {
            element: op,
            length: match op.fixed_width() {
                Some(width) => PackedLength::Fixed { width },
                None => PackedLength::Buffered,
            },
        },
        Rule::Repeated => WritePlan::Repeated { element: op },
        Rule::Required => WritePlan::Single {
            guard: if nullable { WriteGuard::RequirePresent } else { WriteGuard::Always },
            value: op,
        },
        Rule::Optional => {
            let guard = if let Some(d) = &field.default {
                WriteGuard::UnlessDefault(d.to_value())
            } else if nullable {
                WriteGuard::IfPresent
            } else {
                WriteGuard::Always
            };
            WritePlan::Single { guard, value: op }
        }
    };

    let read = match (field.rule, field.kind) {
        (Rule::Repeated, _) if interface => ReadPlan::Unsupported {
            reason: "can't deserialize a list of interfaces",
        },
        (Rule::Repeated, _) if field.packed => ReadPlan::AppendPacked { element: op },
        (Rule::Repeated, _) => ReadPlan::Append { element: op },
        (_, FieldKind::Message(id)) => ReadPlan::Merge { message: id, instantiate: !interface },
        (_, FieldKind::Scalar(_) | FieldKind::Enum(_)) => ReadPlan::Assign { value: op },
    };

    let key = Key::new(field.number, field.wire_type);
    CodecPlan {
        number: field.number,
        ident: field.ident.clone(),
        owner: containing.full_name.clone(),
        required: field.rule == Rule::Required,
        key,
        key_bytes: key.to_bytes(),
        write,
        read,
    }
}

// ————————————————————————————————————————————————————————————————————————————
// JSON VIEW
// ————————————————————————————————————————————————————————————————————————————

/// Debug view of a plan, as printed by `protoplan plan`.
pub fn to_json(schema: &Schema, plan: &CodecPlan) -> Json {
    fn op_json(schema: &Schema, op: &ValueOp) -> Json {
        let primitive = match op.primitive {
            Primitive::Varint => "varint".to_string(),
            Primitive::Zigzag32 => "zigzag32".to_string(),
            Primitive::Zigzag64 => "zigzag64".to_string(),
            Primitive::Fixed32 => "fixed32".to_string(),
            Primitive::Fixed64 => "fixed64".to_string(),
            Primitive::Bytes => "bytes".to_string(),
            Primitive::Utf8 => "utf8".to_string(),
            Primitive::Embedded(id) => format!("message {}", schema.message(id).full_name),
        };
        json!({ "primitive": primitive, "type": schema.kind_name(op.kind) })
    }

    let write = match &plan.write {
        WritePlan::Single { guard, value } => {
            let guard = match guard {
                WriteGuard::Always => json!("always"),
                WriteGuard::RequirePresent => json!("require_present"),
                WriteGuard::IfPresent => json!("if_present"),
                WriteGuard::UnlessDefault(d) => json!({ "unless_default": format!("{d:?}") }),
            };
            json!({ "single": op_json(schema, value), "guard": guard })
        }
        WritePlan::Repeated { element } => json!({ "repeated": op_json(schema, element) }),
        WritePlan::Packed { element, length } => {
            let length = match length {
                PackedLength::Fixed { width } => json!({ "fixed_width": width }),
                PackedLength::Buffered => json!("buffered"),
            };
            json!({ "packed": op_json(schema, element), "length": length })
        }
    };
    let read = match &plan.read {
        ReadPlan::Assign { value } => json!({ "assign": op_json(schema, value) }),
        ReadPlan::Merge { message, instantiate } => {
            json!({ "merge": schema.message(*message).full_name, "instantiate": instantiate })
        }
        ReadPlan::Append { element } => json!({ "append": op_json(schema, element) }),
        ReadPlan::AppendPacked { element } => json!({ "append_packed": op_json(schema, element) }),
        ReadPlan::Unsupported { reason } => json!({ "unsupported": reason }),
    };
    json!({
        "field": plan.number,
        "ident": plan.ident,
        "required": plan.required,
        "key": plan.key.tag(),
        "key_bytes": plan.key_bytes,
        "wire_type": plan.key.wire_type.code(),
        "write": write,
        "read": read,
    })
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawSchema;

    fn schema() -> Schema {
        let raw: RawSchema = serde_json::from_value(json!({
            "messages": [
                { "name": "Shape", "options": { "type": "interface" } },
                { "name": "Point", "options": { "type": "struct" },
                  "fields": [{ "number": 1, "name": "x", "rule": "required", "type": "sint32" }] },
                { "name": "Doc",
                  "enums": [{ "name": "Kind", "values": [
                      { "name": "A", "value": 0 }, { "name": "B", "value": 1 }
                  ] }],
                  "fields": [
                    { "number": 1, "name": "ids", "rule": "repeated", "type": "uint32",
                      "packed": true },
                    { "number": 2, "name": "weights", "rule": "repeated", "type": "double",
                      "packed": true },
                    { "number": 3, "name": "tags", "rule": "repeated", "type": "string" },
                    { "number": 4, "name": "title", "rule": "required", "type": "string" },
                    { "number": 5, "name": "count", "rule": "required", "type": "int64" },
                    { "number": 6, "name": "kind", "rule": "optional", "type": "Kind",
                      "default": "B" },
                    { "number": 7, "name": "plain", "rule": "optional", "type": "Kind" },
                    { "number": 8, "name": "body", "rule": "optional", "type": "bytes" },
                    { "number": 9, "name": "origin", "rule": "optional", "type": "Point" },
                    { "number": 10, "name": "shapes", "rule": "repeated", "type": "Shape" },
                    { "number": 11, "name": "shape", "rule": "optional", "type": "Shape" },
                    { "number": 12, "name": "ratio", "rule": "optional", "type": "float",
                      "default": "0.5" },
                    { "number": 20, "name": "child", "rule": "required", "type": "Doc" }
                  ] }
            ]
        })).unwrap();
        crate::resolve::resolve(&raw).unwrap()
    }

    fn plan_of(s: &Schema, number: u32) -> CodecPlan {
        let doc = s.message(s.find_message("Doc").unwrap());
        plan(s, &doc.fields[&number], doc)
    }

    #[test]
    fn packed_plans() {
        let s = schema();
        let ids = plan_of(&s, 1);
        assert_eq!(ids.key_bytes, vec![0x0A]);
        assert!(matches!(ids.write, WritePlan::Packed { length: PackedLength::Buffered, .. }));
        assert!(matches!(ids.read, ReadPlan::AppendPacked { .. }));

        let weights = plan_of(&s, 2);
        assert!(matches!(
            weights.write,
            WritePlan::Packed { length: PackedLength::Fixed { width: 8 }, .. }
        ));
    }

    #[test]
    fn repeated_unpacked_plans() {
        let s = schema();
        let tags = plan_of(&s, 3);
        assert_eq!(tags.key, Key::new(3, WireType::LengthDelimited));
        assert!(matches!(
            tags.write,
            WritePlan::Repeated { element: ValueOp { primitive: Primitive::Utf8, .. } }
        ));
        assert!(matches!(tags.read, ReadPlan::Append { .. }));
    }

    #[test]
    fn presence_guards() {
        let s = schema();
        let guard = |n| match plan_of(&s, n).write {
            WritePlan::Single { guard, .. } => guard,
            other => panic!("single expected, got {other:?}"),
        };
        assert_eq!(guard(4), WriteGuard::RequirePresent);
        assert_eq!(guard(5), WriteGuard::Always);
        assert_eq!(guard(6), WriteGuard::UnlessDefault(Value::Enum(1)));
        assert_eq!(guard(7), WriteGuard::Always);
        assert_eq!(guard(8), WriteGuard::IfPresent);
        // struct-kind messages always hold a value
        assert_eq!(guard(9), WriteGuard::Always);
        assert_eq!(guard(11), WriteGuard::IfPresent);
        assert_eq!(guard(12), WriteGuard::UnlessDefault(Value::F32(0.5)));
        assert_eq!(guard(20), WriteGuard::RequirePresent);
    }

    #[test]
    fn interface_reads() {
        let s = schema();
        assert!(matches!(plan_of(&s, 10).read, ReadPlan::Unsupported { .. }));
        // writing a list of interfaces is still fine
        assert!(matches!(plan_of(&s, 10).write, WritePlan::Repeated { .. }));
        assert!(matches!(plan_of(&s, 11).read, ReadPlan::Merge { instantiate: false, .. }));
        assert!(matches!(plan_of(&s, 9).read, ReadPlan::Merge { instantiate: true, .. }));
    }

    #[test]
    fn primitives_per_kind() {
        let s = schema();
        let point = s.message(s.find_message("Point").unwrap());
        let x = plan(&s, &point.fields[&1], point);
        assert!(matches!(
            x.read,
            ReadPlan::Assign { value: ValueOp { primitive: Primitive::Zigzag32, .. } }
        ));
        assert_eq!(plan_of(&s, 20).key_bytes, vec![0xA2, 0x01]);
        for (n, wt) in [
            (5, WireType::Varint),
            (6, WireType::Varint),
            (12, WireType::Fixed32),
            (8, WireType::LengthDelimited),
        ] {
            let p = plan_of(&s, n);
            assert_eq!(p.key.wire_type, wt, "field {n}");
            match p.read {
                ReadPlan::Assign { value } => assert_eq!(value.wire_type(), wt),
                other => panic!("unexpected {other:?}"),
            }
        }
        let point = s.find_message("Point").unwrap();
        assert_eq!(plan_of(&s, 9).read, ReadPlan::Merge { message: point, instantiate: true });
    }

    #[test]
    fn json_view_mentions_guard() {
        let s = schema();
        let j = to_json(&s, &plan_of(&s, 4));
        assert_eq!(j["write"]["guard"], "require_present");
        assert_eq!(j["key"], 0x22);
    }
}
