//! Schema resolution: raw declarations → arena-indexed [`Schema`].
//!
//! Two passes over the raw tree:
//! 1. declare every message and enum (names, nesting, full names), so any
//!    type is visible regardless of declaration order;
//! 2. resolve each field: bind its type name by scope search, assign the
//!    wire type, check packing, rewrite the default.
//!
//! Pure and deterministic; the same input always yields the same graph.
pub mod names;
pub mod scope;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{PackedViolation, ResolveError};
use crate::raw::{MessageKind, RawEnum, RawField, RawMessage, RawSchema, Rule};
use crate::schema::{
    DefaultValue, EnumId, EnumType, EnumValue, Field, FieldKind, MessageId, MessageOptions,
    MessageType, ScalarKind, Schema, WireType,
};
use crate::value::Value;
use scope::TypeRef;

pub fn resolve(raw: &RawSchema) -> Result<Schema, ResolveError> {
    let mut schema = Schema::default();
    let mut pending = Vec::<(MessageId, &RawMessage)>::new();

    // 1) declare
    for e in &raw.enums {
        let id = declare_enum(&mut schema, e, None)?;
        schema.root_enums.push(id);
    }
    for m in &raw.messages {
        let id = declare_message(&mut schema, m, None, &mut pending)?;
        schema.roots.push(id);
    }

    // 2) fields
    for (id, m) in &pending {
        let fields = resolve_fields(&schema, *id, m)?;
        schema.messages[id.0].fields = fields;
    }

    // 3) value types must have a finite size
    check_struct_cycles(&schema)?;

    Ok(schema)
}

// ————————————————————————————————————————————————————————————————————————————
// DECLARATION
// ————————————————————————————————————————————————————————————————————————————

fn full_name(schema: &Schema, parent: Option<MessageId>, name: &str) -> String {
    match parent {
        Some(p) => format!("{}.{}", schema.message(p).full_name, name),
        None => name.to_string(),
    }
}

fn check_name(name: &str) -> Result<(), ResolveError> {
    if names::is_identifier(name) {
        Ok(())
    } else {
        Err(ResolveError::InvalidName(name.to_string()))
    }
}

fn declare_enum(
    schema: &mut Schema,
    raw: &RawEnum,
    parent: Option<MessageId>,
) -> Result<EnumId, ResolveError> {
    check_name(&raw.name)?;
    let full_name = full_name(schema, parent, &raw.name);
    if raw.values.is_empty() {
        return Err(ResolveError::EmptyEnum(full_name));
    }
    for v in &raw.values {
        check_name(&v.name)?;
    }
    let id = EnumId(schema.enums.len());
    schema.enums.push(EnumType {
        name: raw.name.clone(),
        ident: names::camel_case(&raw.name),
        full_name,
        parent,
        values: raw
            .values
            .iter()
            .map(|v| EnumValue {
                name: v.name.clone(),
                value: v.value,
            })
            .collect(),
    });
    Ok(id)
}

fn declare_message<'r>(
    schema: &mut Schema,
    raw: &'r RawMessage,
    parent: Option<MessageId>,
    pending: &mut Vec<(MessageId, &'r RawMessage)>,
) -> Result<MessageId, ResolveError> {
    check_name(&raw.name)?;
    let id = MessageId(schema.messages.len());
    let full_name = full_name(schema, parent, &raw.name);
    schema.messages.push(MessageType {
        name: raw.name.clone(),
        ident: names::camel_case(&raw.name),
        full_name,
        parent,
        fields: IndexMap::new(),
        messages: Vec::new(),
        enums: Vec::new(),
        options: MessageOptions {
            preserve_unknown: raw.options.preserve_unknown,
            external: raw.options.external,
            kind: raw.options.kind,
        },
    });
    pending.push((id, raw));

    for e in &raw.enums {
        let eid = declare_enum(schema, e, Some(id))?;
        schema.messages[id.0].enums.push(eid);
    }
    for sub in &raw.messages {
        let sid = declare_message(schema, sub, Some(id), pending)?;
        schema.messages[id.0].messages.push(sid);
    }
    Ok(id)
}

// ————————————————————————————————————————————————————————————————————————————
// FIELDS
// ————————————————————————————————————————————————————————————————————————————

fn resolve_fields(
    schema: &Schema,
    id: MessageId,
    raw: &RawMessage,
) -> Result<IndexMap<u32, Field>, ResolveError> {
    let m = schema.message(id);
    let mut out = IndexMap::with_capacity(raw.fields.len());
    for f in &raw.fields {
        check_name(&f.name)?;
        if f.number == 0 || f.number > crate::wire::MAX_FIELD_NUMBER {
            return Err(ResolveError::InvalidFieldNumber {
                message: m.full_name.clone(),
                field: f.name.clone(),
                number: f.number,
            });
        }
        if out.contains_key(&f.number) {
            return Err(ResolveError::DuplicateFieldNumber {
                message: m.full_name.clone(),
                number: f.number,
            });
        }
        let field = resolve_field(schema, id, f)?;
        debug!(
            owner = %m.full_name,
            field = %field.ident,
            number = field.number,
            kind = %schema.kind_name(field.kind),
            wire = ?field.wire_type,
            "resolved field"
        );
        out.insert(f.number, field);
    }
    Ok(out)
}

fn resolve_field(schema: &Schema, owner: MessageId, raw: &RawField) -> Result<Field, ResolveError> {
    let m = schema.message(owner);
    let kind = match ScalarKind::from_proto_name(&raw.type_name) {
        Some(s) => FieldKind::Scalar(s),
        None => match scope::lookup(schema, owner, &raw.type_name) {
            Some(TypeRef::Enum(e)) => FieldKind::Enum(e),
            Some(TypeRef::Message(t)) => FieldKind::Message(t),
            None => {
                return Err(ResolveError::NameNotFound {
                    message: m.full_name.clone(),
                    field: raw.name.clone(),
                    type_name: raw.type_name.clone(),
                })
            }
        },
    };

    let mut wire_type = kind.wire_type();
    if raw.packed {
        let violation = if raw.rule != Rule::Repeated {
            Some(PackedViolation::NotRepeated)
        } else if wire_type == WireType::LengthDelimited {
            Some(PackedViolation::LengthDelimitedElement)
        } else {
            None
        };
        if let Some(reason) = violation {
            return Err(ResolveError::InvalidPackedField {
                message: m.full_name.clone(),
                field: raw.name.clone(),
                reason,
            });
        }
        wire_type = WireType::LengthDelimited;
    }

    let default = match &raw.default {
        Some(literal) => Some(resolve_default(schema, m, raw, kind, literal)?),
        None => None,
    };

    let sibling_enums = m.enums.iter().map(|e| schema.enum_type(*e).ident.as_str());
    Ok(Field {
        number: raw.number,
        name: raw.name.clone(),
        ident: names::field_ident(&raw.name, sibling_enums),
        rule: raw.rule,
        kind,
        packed: raw.packed,
        default,
        wire_type,
    })
}

fn resolve_default(
    schema: &Schema,
    m: &MessageType,
    raw: &RawField,
    kind: FieldKind,
    literal: &str,
) -> Result<DefaultValue, ResolveError> {
    match kind {
        FieldKind::Message(_) => Err(ResolveError::UnsupportedDefault {
            message: m.full_name.clone(),
            field: raw.name.clone(),
        }),
        FieldKind::Enum(eid) => {
            let e = schema.enum_type(eid);
            let member = e.member_by_name(literal).ok_or_else(|| ResolveError::UnknownEnumMember {
                message: m.full_name.clone(),
                field: raw.name.clone(),
                enum_name: e.full_name.clone(),
                member: literal.to_string(),
            })?;
            Ok(DefaultValue::Enum {
                enum_id: eid,
                member: member.name.clone(),
                value: member.value,
                qualified: format!("{}.{}", e.full_name, member.name),
            })
        }
        FieldKind::Scalar(s) => parse_scalar_literal(s, literal)
            .map(DefaultValue::Scalar)
            .map_err(|reason| ResolveError::InvalidDefault {
                message: m.full_name.clone(),
                field: raw.name.clone(),
                literal: literal.to_string(),
                reason,
            }),
    }
}

fn parse_scalar_literal(kind: ScalarKind, literal: &str) -> Result<Value, String> {
    fn num<T: std::str::FromStr>(s: &str) -> Result<T, String>
    where
        T::Err: std::fmt::Display,
    {
        s.trim().parse::<T>().map_err(|e| e.to_string())
    }
    let v = match kind {
        ScalarKind::Double => Value::F64(num(literal)?),
        ScalarKind::Float => Value::F32(num(literal)?),
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => Value::I32(num(literal)?),
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => Value::I64(num(literal)?),
        ScalarKind::Uint32 | ScalarKind::Fixed32 => Value::U32(num(literal)?),
        ScalarKind::Uint64 | ScalarKind::Fixed64 => Value::U64(num(literal)?),
        ScalarKind::Bool => Value::Bool(num(literal)?),
        ScalarKind::String => Value::String(literal.to_string()),
        ScalarKind::Bytes => Value::Bytes(literal.as_bytes().to_vec()),
    };
    Ok(v)
}

// ————————————————————————————————————————————————————————————————————————————
// STRUCT CYCLES
// ————————————————————————————————————————————————————————————————————————————

fn check_struct_cycles(schema: &Schema) -> Result<(), ResolveError> {
    fn struct_children(schema: &Schema, id: MessageId) -> impl Iterator<Item = MessageId> + '_ {
        schema.message(id).fields.values().filter_map(move |f| match f.kind {
            FieldKind::Message(t)
                if f.rule != Rule::Repeated
                    && schema.message(t).options.kind == MessageKind::Struct =>
            {
                Some(t)
            }
            _ => None,
        })
    }

    for (start, m) in schema.messages() {
        if m.options.kind != MessageKind::Struct {
            continue;
        }
        let mut seen = vec![false; schema.messages.len()];
        let mut stack = struct_children(schema, start).collect::<Vec<_>>();
        while let Some(id) = stack.pop() {
            if id == start {
                return Err(ResolveError::RecursiveStruct(m.full_name.clone()));
            }
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            stack.extend(struct_children(schema, id));
        }
    }
    Ok(())
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve_json(v: serde_json::Value) -> Result<Schema, ResolveError> {
        let raw: RawSchema = serde_json::from_value(v).unwrap();
        resolve(&raw)
    }

    fn one_field(field: serde_json::Value) -> Result<Schema, ResolveError> {
        resolve_json(json!({
            "messages": [{
                "name": "Outer",
                "enums": [{ "name": "Mode", "values": [
                    { "name": "FAST", "value": 3 }, { "name": "SLOW", "value": 7 }
                ]}],
                "messages": [{ "name": "Inner" }],
                "fields": [field]
            }]
        }))
    }

    #[test]
    fn nested_type_resolves_without_qualification() {
        let s = one_field(json!({
            "number": 1, "name": "inner", "rule": "optional", "type": "Inner"
        }))
        .unwrap();
        let outer = s.message(s.find_message("Outer").unwrap());
        let f = &outer.fields[&1];
        assert_eq!(f.kind, FieldKind::Message(s.find_message("Outer.Inner").unwrap()));
        assert_eq!(f.wire_type, WireType::LengthDelimited);
    }

    #[test]
    fn missing_dotted_name_fails() {
        let err = one_field(json!({
            "number": 1, "name": "x", "rule": "optional", "type": "Missing.Type"
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::NameNotFound { ref type_name, .. } if type_name == "Missing.Type"
        ));
    }

    #[test]
    fn enum_field_is_varint() {
        let s = one_field(json!({
            "number": 2, "name": "mode", "rule": "optional", "type": "Mode"
        }))
        .unwrap();
        let f = &s.message(MessageId(0)).fields[&2];
        assert!(matches!(f.kind, FieldKind::Enum(_)));
        assert_eq!(f.wire_type, WireType::Varint);
        // implicit default is the first declared member, not zero
        assert_eq!(s.implicit_default(f), Some(Value::Enum(3)));
        assert!(f.default.is_none());
    }

    #[test]
    fn packed_rules() {
        let s = one_field(json!({
            "number": 1, "name": "xs", "rule": "repeated", "type": "fixed32", "packed": true
        }))
        .unwrap();
        assert_eq!(s.message(MessageId(0)).fields[&1].wire_type, WireType::LengthDelimited);

        let err = one_field(json!({
            "number": 1, "name": "xs", "rule": "repeated", "type": "string", "packed": true
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::InvalidPackedField {
                reason: PackedViolation::LengthDelimitedElement,
                ..
            }
        ));

        let err = one_field(json!({
            "number": 1, "name": "xs", "rule": "repeated", "type": "Inner", "packed": true
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::InvalidPackedField {
                reason: PackedViolation::LengthDelimitedElement,
                ..
            }
        ));

        let err = one_field(json!({
            "number": 1, "name": "x", "rule": "optional", "type": "int32", "packed": true
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::InvalidPackedField { reason: PackedViolation::NotRepeated, .. }
        ));
    }

    #[test]
    fn defaults_are_typed_and_qualified() {
        let s = one_field(json!({
            "number": 1, "name": "mode", "rule": "optional", "type": "Mode", "default": "SLOW"
        }))
        .unwrap();
        match &s.message(MessageId(0)).fields[&1].default {
            Some(DefaultValue::Enum { qualified, value, .. }) => {
                assert_eq!(qualified, "Outer.Mode.SLOW");
                assert_eq!(*value, 7);
            }
            other => panic!("unexpected default {other:?}"),
        }

        let s = one_field(json!({
            "number": 1, "name": "n", "rule": "optional", "type": "sint64", "default": "-42"
        }))
        .unwrap();
        assert_eq!(
            s.message(MessageId(0)).fields[&1].default,
            Some(DefaultValue::Scalar(Value::I64(-42)))
        );

        let err = one_field(json!({
            "number": 1, "name": "n", "rule": "optional", "type": "uint32", "default": "-1"
        }))
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidDefault { .. }));

        let err = one_field(json!({
            "number": 1, "name": "i", "rule": "optional", "type": "Inner", "default": "x"
        }))
        .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedDefault { .. }));

        let err = one_field(json!({
            "number": 1, "name": "m", "rule": "optional", "type": "Mode", "default": "WARP"
        }))
        .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownEnumMember { .. }));
    }

    #[test]
    fn field_numbers_validated() {
        let err = one_field(json!({
            "number": 0, "name": "x", "rule": "optional", "type": "int32"
        }))
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidFieldNumber { number: 0, .. }));

        let err = resolve_json(json!({ "messages": [{ "name": "A", "fields": [
            { "number": 4, "name": "x", "rule": "optional", "type": "int32" },
            { "number": 4, "name": "y", "rule": "optional", "type": "int64" }
        ]}]})).unwrap_err();
        assert_eq!(err, ResolveError::DuplicateFieldNumber { message: "A".into(), number: 4 });
    }

    #[test]
    fn identifiers_are_camel_cased_consistently() {
        let s = resolve_json(json!({ "messages": [{
            "name": "order_line",
            "enums": [{ "name": "line_state", "values": [{ "name": "OPEN", "value": 0 }] }],
            "fields": [
                { "number": 1, "name": "unit_price", "rule": "optional", "type": "double" },
                { "number": 2, "name": "line_state", "rule": "optional", "type": "line_state" }
            ]
        }]})).unwrap();
        let m = s.message(MessageId(0));
        assert_eq!(m.ident, "OrderLine");
        assert_eq!(s.enum_type(m.enums[0]).ident, "LineState");
        assert_eq!(m.fields[&1].ident, "UnitPrice");
        // collides with the nested enum's identifier → declared name kept
        assert_eq!(m.fields[&2].ident, "line_state");
    }

    #[test]
    fn declaration_order_does_not_matter() {
        let s = resolve_json(json!({ "messages": [
            { "name": "A", "fields": [
                { "number": 1, "name": "b", "rule": "optional", "type": "B" }
            ] },
            { "name": "B" }
        ]})).unwrap();
        let b = s.find_message("B").unwrap();
        assert_eq!(s.message(MessageId(0)).fields[&1].kind, FieldKind::Message(b));
    }

    #[test]
    fn bad_input_shapes() {
        assert!(matches!(
            resolve_json(json!({ "enums": [{ "name": "E", "values": [] }] })),
            Err(ResolveError::EmptyEnum(_))
        ));
        assert!(matches!(
            resolve_json(json!({ "messages": [{ "name": "a-b" }] })),
            Err(ResolveError::InvalidName(_))
        ));
    }

    #[test]
    fn recursive_structs_rejected_but_recursive_classes_allowed() {
        let err = resolve_json(json!({ "messages": [
            { "name": "P", "options": { "type": "struct" },
              "fields": [{ "number": 1, "name": "q", "rule": "required", "type": "Q" }] },
            { "name": "Q", "options": { "type": "struct" },
              "fields": [{ "number": 1, "name": "p", "rule": "optional", "type": "P" }] }
        ]})).unwrap_err();
        assert!(matches!(err, ResolveError::RecursiveStruct(_)));

        resolve_json(json!({ "messages": [
            { "name": "Node", "fields": [
                { "number": 1, "name": "next", "rule": "optional", "type": "Node" },
                { "number": 2, "name": "kids", "rule": "repeated", "type": "Node" }
            ]}
        ]})).unwrap();
    }
}
