//! Dynamic message values handled by the runtime codec, plus a JSON bridge
//! (field identifiers as keys, enums by member name, bytes as integer arrays).
use indexmap::IndexMap;
use serde_json::{json, Map, Value as Json};
use thiserror::Error;

use crate::schema::{FieldKind, MessageId, Rule, ScalarKind, Schema};
use crate::wire::Key;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    F64(f64),
    F32(f32),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    /// Numeric member value; undeclared values are kept as-is.
    Enum(i32),
    Message(MessageValue),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Single(Value),
    Repeated(Vec<Value>),
}

/// One unrecognized field captured verbatim during decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub key: Key,
    /// Raw value bytes as they were on the wire (length prefix included).
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageValue {
    pub message: MessageId,
    /// Set fields keyed by field number. A missing entry means "absent".
    pub fields: IndexMap<u32, FieldValue>,
    /// Captured unknown fields, in capture order.
    pub unknown: Vec<UnknownField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonError {
    #[error("`{message}` has no field `{field}`")]
    UnknownField { message: String, field: String },
    #[error("`{message}.{field}`: expected {expected}")]
    Type {
        message: String,
        field: String,
        expected: String,
    },
    #[error("`{message}.{field}`: `{member}` is not a member of `{enum_name}`")]
    UnknownEnumMember {
        message: String,
        field: String,
        enum_name: String,
        member: String,
    },
    #[error("expected a JSON object for `{0}`")]
    NotAnObject(String),
}

// ————————————————————————————————————————————————————————————————————————————
// VALUES
// ————————————————————————————————————————————————————————————————————————————

impl Value {
    /// Platform zero value of a value-semantics scalar.
    pub fn zero(kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Double => Value::F64(0.0),
            ScalarKind::Float => Value::F32(0.0),
            ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => Value::I32(0),
            ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => Value::I64(0),
            ScalarKind::Uint32 | ScalarKind::Fixed32 => Value::U32(0),
            ScalarKind::Uint64 | ScalarKind::Fixed64 => Value::U64(0),
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::String => Value::String(String::new()),
            ScalarKind::Bytes => Value::Bytes(Vec::new()),
        }
    }

    /// Whether this value has the in-memory shape of `kind`.
    pub fn fits(&self, kind: FieldKind) -> bool {
        use ScalarKind as S;
        match (kind, self) {
            (FieldKind::Scalar(S::Double), Value::F64(_))
            | (FieldKind::Scalar(S::Float), Value::F32(_))
            | (FieldKind::Scalar(S::Int32 | S::Sint32 | S::Sfixed32), Value::I32(_))
            | (FieldKind::Scalar(S::Int64 | S::Sint64 | S::Sfixed64), Value::I64(_))
            | (FieldKind::Scalar(S::Uint32 | S::Fixed32), Value::U32(_))
            | (FieldKind::Scalar(S::Uint64 | S::Fixed64), Value::U64(_))
            | (FieldKind::Scalar(S::Bool), Value::Bool(_))
            | (FieldKind::Scalar(S::String), Value::String(_))
            | (FieldKind::Scalar(S::Bytes), Value::Bytes(_))
            | (FieldKind::Enum(_), Value::Enum(_)) => true,
            (FieldKind::Message(id), Value::Message(m)) => m.message == id,
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::F64(_) => "f64",
            Value::F32(_) => "f32",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Message(_) => "message",
        }
    }
}

impl MessageValue {
    /// A fully-initialized instance: empty lists, defaults, first enum members,
    /// zero values for value-semantics fields. Nullable fields start absent.
    pub fn new(schema: &Schema, message: MessageId) -> MessageValue {
        let mut out = MessageValue::empty(message);
        for step in crate::assemble::init_steps(schema, message) {
            step.apply(schema, &mut out);
        }
        out
    }

    /// No fields set at all; the decoder starts from this.
    pub fn empty(message: MessageId) -> MessageValue {
        MessageValue { message, fields: IndexMap::new(), unknown: Vec::new() }
    }

    pub fn get(&self, number: u32) -> Option<&Value> {
        match self.fields.get(&number) {
            Some(FieldValue::Single(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_repeated(&self, number: u32) -> &[Value] {
        match self.fields.get(&number) {
            Some(FieldValue::Repeated(xs)) => xs,
            _ => &[],
        }
    }

    pub fn set(&mut self, number: u32, value: Value) {
        self.fields.insert(number, FieldValue::Single(value));
    }

    pub fn clear(&mut self, number: u32) {
        self.fields.shift_remove(&number);
    }

    pub fn push(&mut self, number: u32, value: Value) {
        let slot = self.fields.entry(number).or_insert_with(|| FieldValue::Repeated(Vec::new()));
        if let FieldValue::Single(_) = slot {
            *slot = FieldValue::Repeated(Vec::new());
        }
        if let FieldValue::Repeated(xs) = slot {
            xs.push(value);
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// JSON BRIDGE
// ————————————————————————————————————————————————————————————————————————————

const UNKNOWN_KEY: &str = "$unknown";

pub fn to_json(schema: &Schema, value: &MessageValue) -> Json {
    let m = schema.message(value.message);
    let mut out = Map::new();
    for (number, field) in &m.fields {
        let Some(fv) = value.fields.get(number) else { continue };
        let j = match fv {
            FieldValue::Single(v) => value_to_json(schema, field.kind, v),
            FieldValue::Repeated(xs) => {
                Json::Array(xs.iter().map(|v| value_to_json(schema, field.kind, v)).collect())
            }
        };
        out.insert(field.ident.clone(), j);
    }
    if !value.unknown.is_empty() {
        let xs = value.unknown.iter().map(|u| json!({
            "field": u.key.field,
            "wire_type": u.key.wire_type.code(),
            "bytes": u.bytes,
        })).collect();
        out.insert(UNKNOWN_KEY.to_string(), Json::Array(xs));
    }
    Json::Object(out)
}

fn value_to_json(schema: &Schema, kind: FieldKind, v: &Value) -> Json {
    match v {
        Value::F64(x) => json!(x),
        Value::F32(x) => json!(x),
        Value::I32(x) => json!(x),
        Value::I64(x) => json!(x),
        Value::U32(x) => json!(x),
        Value::U64(x) => json!(x),
        Value::Bool(x) => json!(x),
        Value::String(s) => json!(s),
        Value::Bytes(b) => json!(b),
        Value::Enum(n) => match kind {
            FieldKind::Enum(id) => match schema.enum_type(id).member_by_value(*n) {
                Some(member) => json!(member.name),
                None => json!(n),
            },
            _ => json!(n),
        },
        Value::Message(m) => to_json(schema, m),
    }
}

pub fn from_json(
    schema: &Schema,
    message: MessageId,
    src: &Json,
) -> Result<MessageValue, JsonError> {
    let m = schema.message(message);
    let Json::Object(obj) = src else {
        return Err(JsonError::NotAnObject(m.full_name.clone()));
    };
    let mut out = MessageValue::new(schema, message);
    for (key, j) in obj {
        if key == UNKNOWN_KEY {
            out.unknown = unknown_from_json(&m.full_name, j)?;
            continue;
        }
        let Some(field) = m.fields.values().find(|f| &f.ident == key) else {
            return Err(JsonError::UnknownField {
                message: m.full_name.clone(),
                field: key.clone(),
            });
        };
        let type_err = |expected: &str| JsonError::Type {
            message: m.full_name.clone(),
            field: field.ident.clone(),
            expected: expected.to_string(),
        };
        if field.rule == Rule::Repeated {
            let Json::Array(items) = j else { return Err(type_err("array")) };
            let xs = items
                .iter()
                .map(|x| value_from_json(schema, &m.full_name, field, x))
                .collect::<Result<Vec<_>, _>>()?;
            out.fields.insert(field.number, FieldValue::Repeated(xs));
        } else if j.is_null() {
            out.clear(field.number);
        } else {
            let v = value_from_json(schema, &m.full_name, field, j)?;
            out.set(field.number, v);
        }
    }
    Ok(out)
}

fn value_from_json(
    schema: &Schema,
    message: &str,
    field: &crate::schema::Field,
    j: &Json,
) -> Result<Value, JsonError> {
    use ScalarKind as S;
    let type_err = || JsonError::Type {
        message: message.to_string(),
        field: field.ident.clone(),
        expected: schema.kind_name(field.kind),
    };
    let v = match field.kind {
        FieldKind::Scalar(kind) => match kind {
            S::Double => Value::F64(j.as_f64().ok_or_else(type_err)?),
            S::Float => Value::F32(j.as_f64().ok_or_else(type_err)? as f32),
            S::Int32 | S::Sint32 | S::Sfixed32 => {
                let n = j.as_i64().ok_or_else(type_err)?;
                Value::I32(i32::try_from(n).map_err(|_| type_err())?)
            }
            S::Int64 | S::Sint64 | S::Sfixed64 => Value::I64(j.as_i64().ok_or_else(type_err)?),
            S::Uint32 | S::Fixed32 => {
                let n = j.as_u64().ok_or_else(type_err)?;
                Value::U32(u32::try_from(n).map_err(|_| type_err())?)
            }
            S::Uint64 | S::Fixed64 => Value::U64(j.as_u64().ok_or_else(type_err)?),
            S::Bool => Value::Bool(j.as_bool().ok_or_else(type_err)?),
            S::String => Value::String(j.as_str().ok_or_else(type_err)?.to_string()),
            S::Bytes => Value::Bytes(bytes_from_json(j).ok_or_else(type_err)?),
        },
        FieldKind::Enum(id) => {
            let e = schema.enum_type(id);
            match j {
                Json::String(name) => match e.member_by_name(name) {
                    Some(member) => Value::Enum(member.value),
                    None => {
                        return Err(JsonError::UnknownEnumMember {
                            message: message.to_string(),
                            field: field.ident.clone(),
                            enum_name: e.full_name.clone(),
                            member: name.clone(),
                        })
                    }
                },
                _ => {
                    let n = j.as_i64().ok_or_else(type_err)?;
                    Value::Enum(i32::try_from(n).map_err(|_| type_err())?)
                }
            }
        }
        FieldKind::Message(id) => Value::Message(from_json(schema, id, j)?),
    };
    Ok(v)
}

fn bytes_from_json(j: &Json) -> Option<Vec<u8>> {
    j.as_array()?
        .iter()
        .map(|b| b.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn unknown_from_json(message: &str, j: &Json) -> Result<Vec<UnknownField>, JsonError> {
    let type_err = || JsonError::Type {
        message: message.to_string(),
        field: UNKNOWN_KEY.to_string(),
        expected: "[{field, wire_type, bytes}]".to_string(),
    };
    let items = j.as_array().ok_or_else(type_err)?;
    items
        .iter()
        .map(|item| {
            let field = item["field"]
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(type_err)?;
            let wire_type = item["wire_type"]
                .as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .and_then(crate::schema::WireType::from_code)
                .ok_or_else(type_err)?;
            let bytes = bytes_from_json(&item["bytes"]).ok_or_else(type_err)?;
            Ok(UnknownField { key: Key { field, wire_type }, bytes })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawSchema;

    fn schema() -> Schema {
        let raw: RawSchema = serde_json::from_value(json!({
            "messages": [{
                "name": "Order",
                "enums": [{ "name": "Side", "values": [
                    { "name": "BUY", "value": 1 }, { "name": "SELL", "value": 2 }
                ]}],
                "fields": [
                    { "number": 1, "name": "id", "rule": "required", "type": "uint64" },
                    { "number": 2, "name": "side", "rule": "optional", "type": "Side" },
                    { "number": 3, "name": "note", "rule": "optional", "type": "string" },
                    { "number": 4, "name": "qty", "rule": "repeated", "type": "sint32",
                      "packed": true },
                    { "number": 5, "name": "blob", "rule": "optional", "type": "bytes" }
                ]
            }]
        })).unwrap();
        crate::resolve::resolve(&raw).unwrap()
    }

    #[test]
    fn new_instance_is_prepopulated() {
        let s = schema();
        let id = s.find_message("Order").unwrap();
        let v = MessageValue::new(&s, id);
        assert_eq!(v.get(1), Some(&Value::U64(0)));
        assert_eq!(v.get(2), Some(&Value::Enum(1)));
        assert_eq!(v.get(3), None);
        assert!(v.get_repeated(4).is_empty());
        assert!(matches!(v.fields.get(&4), Some(FieldValue::Repeated(_))));
    }

    #[test]
    fn json_bridge_uses_identifiers_and_member_names() {
        let s = schema();
        let id = s.find_message("Order").unwrap();
        let src = json!({
            "Id": 7, "Side": "SELL", "Note": "hi", "Qty": [-1, 2], "Blob": [0, 255]
        });
        let v = from_json(&s, id, &src).unwrap();
        assert_eq!(v.get(2), Some(&Value::Enum(2)));
        assert_eq!(v.get_repeated(4), &[Value::I32(-1), Value::I32(2)]);
        assert_eq!(to_json(&s, &v), src);
    }

    #[test]
    fn json_bridge_rejects_bad_input() {
        let s = schema();
        let id = s.find_message("Order").unwrap();
        assert!(matches!(
            from_json(&s, id, &json!({ "Nope": 1 })),
            Err(JsonError::UnknownField { .. })
        ));
        assert!(matches!(
            from_json(&s, id, &json!({ "Side": "HOLD" })),
            Err(JsonError::UnknownEnumMember { .. })
        ));
        assert!(matches!(
            from_json(&s, id, &json!({ "Qty": [1.5] })),
            Err(JsonError::Type { .. })
        ));
    }
}
