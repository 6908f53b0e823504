//! Runtime codec: runs the assembled procedures against bytes.
//!
//! One [`SchemaCodec`] is built per resolved schema and is read-only
//! afterwards, so it can be shared across threads. Each encode or decode call
//! owns its own position-tracked reader or output buffer.
use std::collections::HashMap;

use bytes::BufMut;
use tracing::trace;

use crate::assemble::{
    assemble_decoder, assemble_encoder, DecodeProcedure, EncodeProcedure, FramingMode,
    UnknownPolicy,
};
use crate::error::{DecodeError, EncodeError};
use crate::plan::{CodecPlan, PackedLength, Primitive, ReadPlan, ValueOp, WriteGuard, WritePlan};
use crate::schema::{FieldKind, MessageId, ScalarKind, Schema, WireType};
use crate::value::{FieldValue, MessageValue, UnknownField, Value};
use crate::wire::{self, Key, Reader, MAX_FIELD_NUMBER};

/// Nested messages a single decode call may descend into.
pub const RECURSION_LIMIT: usize = 100;

pub struct SchemaCodec<'s> {
    schema: &'s Schema,
    encoders: HashMap<MessageId, EncodeProcedure>,
    decoders: HashMap<MessageId, DecodeProcedure>,
}

impl<'s> SchemaCodec<'s> {
    /// Assembles every message not marked `external`, with unbounded
    /// top-level framing.
    pub fn new(schema: &'s Schema) -> Self {
        Self::with_framing(schema, FramingMode::Unbounded)
    }

    /// Like [`SchemaCodec::new`], but [`SchemaCodec::decode_message`] reads
    /// top-level messages with `framing`.
    pub fn with_framing(schema: &'s Schema, framing: FramingMode) -> Self {
        let mut encoders = HashMap::new();
        let mut decoders = HashMap::new();
        for (id, m) in schema.messages() {
            if m.options.external {
                continue;
            }
            encoders.insert(id, assemble_encoder(schema, id));
            decoders.insert(id, assemble_decoder(schema, id, framing));
        }
        Self {
            schema,
            encoders,
            decoders,
        }
    }

    pub fn encoder(&self, message: MessageId) -> Option<&EncodeProcedure> {
        self.encoders.get(&message)
    }

    pub fn decoder(&self, message: MessageId) -> Option<&DecodeProcedure> {
        self.decoders.get(&message)
    }

    // ————————————————————————————————————————————————————————————————————————
    // ENCODE
    // ————————————————————————————————————————————————————————————————————————

    /// Writes `value` to `sink`. Nothing reaches the sink unless the whole
    /// message encodes.
    pub fn encode<B: BufMut>(&self, value: &MessageValue, sink: &mut B) -> Result<(), EncodeError> {
        let body = self.encode_to_vec(value)?;
        sink.put_slice(&body);
        Ok(())
    }

    pub fn encode_to_vec(&self, value: &MessageValue) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.write_message(value, &mut out)?;
        Ok(out)
    }

    /// Varint byte length, then the message.
    pub fn encode_length_delimited<B: BufMut>(
        &self,
        value: &MessageValue,
        sink: &mut B,
    ) -> Result<(), EncodeError> {
        let body = self.encode_to_vec(value)?;
        wire::encode_bytes(&body, sink);
        Ok(())
    }

    fn write_message(&self, value: &MessageValue, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let proc = self.encoders.get(&value.message).ok_or_else(|| {
            EncodeError::UnknownMessage(self.schema.message(value.message).full_name.clone())
        })?;

        // all required fields before the first byte
        for p in &proc.plans {
            if p.required && !value.fields.contains_key(&p.number) {
                return Err(EncodeError::RequiredFieldMissing {
                    message: p.owner.clone(),
                    field: p.ident.clone(),
                });
            }
        }

        for p in &proc.plans {
            self.write_field(p, value.fields.get(&p.number), out)?;
        }

        if proc.write_unknown {
            for u in &value.unknown {
                wire::encode_key(u.key, out);
                out.put_slice(&u.bytes);
            }
        }
        Ok(())
    }

    fn write_field(
        &self,
        p: &CodecPlan,
        current: Option<&FieldValue>,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        let Some(current) = current else {
            if matches!(p.write, WritePlan::Single { guard: WriteGuard::RequirePresent, .. }) {
                return Err(EncodeError::RequiredFieldMissing {
                    message: p.owner.clone(),
                    field: p.ident.clone(),
                });
            }
            return Ok(());
        };
        match (&p.write, current) {
            (WritePlan::Single { guard, value: op }, FieldValue::Single(v)) => {
                if let WriteGuard::UnlessDefault(default) = guard {
                    if v == default {
                        return Ok(());
                    }
                }
                out.put_slice(&p.key_bytes);
                self.write_value(p, *op, v, out)
            }
            (WritePlan::Repeated { element }, FieldValue::Repeated(xs)) => {
                for x in xs {
                    out.put_slice(&p.key_bytes);
                    self.write_value(p, *element, x, out)?;
                }
                Ok(())
            }
            (WritePlan::Packed { element, length }, FieldValue::Repeated(xs)) => {
                if xs.is_empty() {
                    return Ok(());
                }
                out.put_slice(&p.key_bytes);
                match length {
                    PackedLength::Fixed { width } => {
                        wire::encode_varint((width * xs.len()) as u64, out);
                        for x in xs {
                            self.write_value(p, *element, x, out)?;
                        }
                    }
                    PackedLength::Buffered => {
                        let mut payload = Vec::new();
                        for x in xs {
                            self.write_value(p, *element, x, &mut payload)?;
                        }
                        wire::encode_bytes(&payload, out);
                    }
                }
                Ok(())
            }
            (_, FieldValue::Single(v)) => Err(self.mismatch(p, "list", v.type_name())),
            (_, FieldValue::Repeated(_)) => {
                Err(self.mismatch(p, &self.schema.kind_name(field_kind(p)), "list"))
            }
        }
    }

    fn write_value(
        &self,
        p: &CodecPlan,
        op: ValueOp,
        v: &Value,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        if !v.fits(op.kind) {
            return Err(self.mismatch(p, &self.schema.kind_name(op.kind), v.type_name()));
        }
        match (op.primitive, v) {
            // negative int32 is sign-extended to ten bytes
            (Primitive::Varint, Value::I32(n)) => wire::encode_varint(i64::from(*n) as u64, out),
            (Primitive::Varint, Value::Enum(n)) => wire::encode_varint(i64::from(*n) as u64, out),
            (Primitive::Varint, Value::I64(n)) => wire::encode_varint(*n as u64, out),
            (Primitive::Varint, Value::U32(n)) => wire::encode_varint(u64::from(*n), out),
            (Primitive::Varint, Value::U64(n)) => wire::encode_varint(*n, out),
            (Primitive::Varint, Value::Bool(b)) => wire::encode_varint(u64::from(*b), out),
            (Primitive::Zigzag32, Value::I32(n)) => {
                wire::encode_varint(u64::from(wire::zigzag32(*n)), out)
            }
            (Primitive::Zigzag64, Value::I64(n)) => wire::encode_varint(wire::zigzag64(*n), out),
            (Primitive::Fixed32, Value::F32(x)) => out.put_f32_le(*x),
            (Primitive::Fixed32, Value::U32(n)) => out.put_u32_le(*n),
            (Primitive::Fixed32, Value::I32(n)) => out.put_i32_le(*n),
            (Primitive::Fixed64, Value::F64(x)) => out.put_f64_le(*x),
            (Primitive::Fixed64, Value::U64(n)) => out.put_u64_le(*n),
            (Primitive::Fixed64, Value::I64(n)) => out.put_i64_le(*n),
            (Primitive::Utf8, Value::String(s)) => wire::encode_bytes(s.as_bytes(), out),
            (Primitive::Bytes, Value::Bytes(b)) => wire::encode_bytes(b, out),
            (Primitive::Embedded(_), Value::Message(m)) => {
                let mut body = Vec::new();
                self.write_message(m, &mut body)?;
                wire::encode_bytes(&body, out);
            }
            _ => return Err(self.mismatch(p, &self.schema.kind_name(op.kind), v.type_name())),
        }
        Ok(())
    }

    fn mismatch(&self, p: &CodecPlan, expected: &str, got: &str) -> EncodeError {
        EncodeError::TypeMismatch {
            message: p.owner.clone(),
            field: p.ident.clone(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    // ————————————————————————————————————————————————————————————————————————
    // DECODE
    // ————————————————————————————————————————————————————————————————————————

    /// Decodes one message with the framing this codec was built with.
    pub fn decode_message(
        &self,
        message: MessageId,
        input: &[u8],
    ) -> Result<MessageValue, DecodeError> {
        let framing = self.procedure(message)?.framing;
        self.decode(message, input, framing)
    }

    /// Decodes one message into a pre-populated instance.
    pub fn decode(
        &self,
        message: MessageId,
        input: &[u8],
        framing: FramingMode,
    ) -> Result<MessageValue, DecodeError> {
        let mut out = self.fresh(message)?;
        let mut reader = Reader::new(input);
        self.read_message(&mut reader, framing, RECURSION_LIMIT, &mut out)?;
        Ok(out)
    }

    /// Merges one encoded message into `target`: scalars overwrite, lists
    /// append, nested messages merge.
    pub fn decode_into(
        &self,
        target: &mut MessageValue,
        input: &[u8],
        framing: FramingMode,
    ) -> Result<(), DecodeError> {
        let mut reader = Reader::new(input);
        self.read_message(&mut reader, framing, RECURSION_LIMIT, target)
    }

    /// Decodes one message from a shared reader, leaving it positioned after
    /// the message. Use with a bounded framing to read consecutive messages.
    pub fn decode_from(
        &self,
        message: MessageId,
        reader: &mut Reader<'_>,
        framing: FramingMode,
    ) -> Result<MessageValue, DecodeError> {
        let mut out = self.fresh(message)?;
        self.read_message(reader, framing, RECURSION_LIMIT, &mut out)?;
        Ok(out)
    }

    fn procedure(&self, message: MessageId) -> Result<&DecodeProcedure, DecodeError> {
        self.decoders.get(&message).ok_or_else(|| {
            DecodeError::UnknownMessage(self.schema.message(message).full_name.clone())
        })
    }

    fn fresh(&self, message: MessageId) -> Result<MessageValue, DecodeError> {
        let proc = self.procedure(message)?;
        let mut out = MessageValue::empty(message);
        for step in &proc.init {
            step.apply(self.schema, &mut out);
        }
        Ok(out)
    }

    /// `depth` is how many more nested messages may be entered below `out`.
    fn read_message(
        &self,
        reader: &mut Reader<'_>,
        framing: FramingMode,
        depth: usize,
        out: &mut MessageValue,
    ) -> Result<(), DecodeError> {
        let proc = self.procedure(out.message)?;
        let limit = match framing {
            FramingMode::Unbounded => None,
            FramingMode::LengthDelimited => {
                let len = reader.read_length()?;
                Some(reader.position().saturating_add(len))
            }
            FramingMode::ExplicitLength(len) => Some(reader.position().saturating_add(len)),
        };

        loop {
            let position = reader.position();
            match limit {
                Some(limit) if position == limit => break,
                Some(limit) if position > limit => {
                    return Err(DecodeError::LimitExceeded { position, limit });
                }
                Some(limit) if reader.is_eof() => {
                    return Err(DecodeError::UnexpectedEof {
                        position,
                        needed: limit - position,
                    });
                }
                None if reader.is_eof() => break,
                _ => {}
            }

            let raw = reader.read_key()?;
            if raw.field == 0 || raw.field > u64::from(MAX_FIELD_NUMBER) {
                return Err(DecodeError::CorruptStream { position });
            }
            let field = raw.field as u32;
            let wire_type = WireType::from_code(raw.wire_code).ok_or(DecodeError::InvalidWireType {
                code: raw.wire_code,
                position,
            })?;

            match proc.dispatch.get(&field) {
                Some(p) if p.key.wire_type == wire_type => self.read_field(p, reader, depth, out)?,
                Some(p) => {
                    trace!(
                        owner = %proc.name,
                        field,
                        expected = ?p.key.wire_type,
                        got = ?wire_type,
                        "wire type mismatch, skipping"
                    );
                    reader.skip(wire_type)?;
                }
                None => match proc.unknown {
                    UnknownPolicy::Capture => {
                        let bytes = reader.read_value_bytes(wire_type)?;
                        trace!(
                            owner = %proc.name,
                            field,
                            len = bytes.len(),
                            "captured unknown field"
                        );
                        out.unknown.push(UnknownField {
                            key: Key::new(field, wire_type),
                            bytes: bytes.to_vec(),
                        });
                    }
                    UnknownPolicy::Discard => {
                        trace!(owner = %proc.name, field, "skipping unknown field");
                        reader.skip(wire_type)?;
                    }
                },
            }
        }
        Ok(())
    }

    /// Reads a length-delimited message one level below `depth`.
    fn read_nested(
        &self,
        reader: &mut Reader<'_>,
        depth: usize,
        out: &mut MessageValue,
    ) -> Result<(), DecodeError> {
        let Some(depth) = depth.checked_sub(1) else {
            return Err(DecodeError::RecursionLimit {
                position: reader.position(),
            });
        };
        self.read_message(reader, FramingMode::LengthDelimited, depth, out)
    }

    fn read_field(
        &self,
        p: &CodecPlan,
        reader: &mut Reader<'_>,
        depth: usize,
        out: &mut MessageValue,
    ) -> Result<(), DecodeError> {
        match &p.read {
            ReadPlan::Assign { value } => {
                let v = self.read_value(*value, reader, depth)?;
                out.set(p.number, v);
            }
            ReadPlan::Append { element } => {
                let v = self.read_value(*element, reader, depth)?;
                out.push(p.number, v);
            }
            ReadPlan::AppendPacked { element } => {
                let declared = reader.read_length()?;
                let start = reader.position();
                let end = start.saturating_add(declared);
                while reader.position() < end {
                    let v = self.read_value(*element, reader, depth)?;
                    out.push(p.number, v);
                }
                let consumed = reader.position() - start;
                if consumed != declared {
                    return Err(DecodeError::PackedLengthMismatch {
                        field: p.number,
                        declared,
                        consumed,
                    });
                }
            }
            ReadPlan::Merge {
                message,
                instantiate,
            } => match out.fields.get_mut(&p.number) {
                Some(FieldValue::Single(Value::Message(current))) => {
                    self.read_nested(reader, depth, current)?;
                }
                _ if *instantiate => {
                    let mut m = self.fresh(*message)?;
                    self.read_nested(reader, depth, &mut m)?;
                    out.set(p.number, Value::Message(m));
                }
                _ => {
                    return Err(DecodeError::UnsupportedOperation {
                        message: p.owner.clone(),
                        field: p.ident.clone(),
                        reason: "can't create an instance of an interface",
                    });
                }
            },
            ReadPlan::Unsupported { reason } => {
                return Err(DecodeError::UnsupportedOperation {
                    message: p.owner.clone(),
                    field: p.ident.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    fn read_value(
        &self,
        op: ValueOp,
        reader: &mut Reader<'_>,
        depth: usize,
    ) -> Result<Value, DecodeError> {
        use ScalarKind as S;
        let v = match op.primitive {
            Primitive::Varint => {
                let n = reader.read_varint()?;
                match op.kind {
                    FieldKind::Enum(_) => Value::Enum(n as i32),
                    FieldKind::Scalar(S::Int32) => Value::I32(n as i32),
                    FieldKind::Scalar(S::Int64) => Value::I64(n as i64),
                    FieldKind::Scalar(S::Uint32) => Value::U32(n as u32),
                    FieldKind::Scalar(S::Bool) => Value::Bool(n != 0),
                    _ => Value::U64(n),
                }
            }
            Primitive::Zigzag32 => Value::I32(wire::unzigzag32(reader.read_varint()? as u32)),
            Primitive::Zigzag64 => Value::I64(wire::unzigzag64(reader.read_varint()?)),
            Primitive::Fixed32 => {
                let n = reader.read_fixed32()?;
                match op.kind {
                    FieldKind::Scalar(S::Float) => Value::F32(f32::from_bits(n)),
                    FieldKind::Scalar(S::Sfixed32) => Value::I32(n as i32),
                    _ => Value::U32(n),
                }
            }
            Primitive::Fixed64 => {
                let n = reader.read_fixed64()?;
                match op.kind {
                    FieldKind::Scalar(S::Double) => Value::F64(f64::from_bits(n)),
                    FieldKind::Scalar(S::Sfixed64) => Value::I64(n as i64),
                    _ => Value::U64(n),
                }
            }
            Primitive::Utf8 => {
                let position = reader.position();
                let raw = reader.read_length_delimited()?;
                let s = std::str::from_utf8(raw)
                    .map_err(|_| DecodeError::InvalidUtf8 { position })?;
                Value::String(s.to_string())
            }
            Primitive::Bytes => Value::Bytes(reader.read_length_delimited()?.to_vec()),
            Primitive::Embedded(id) => {
                let mut m = self.fresh(id)?;
                self.read_nested(reader, depth, &mut m)?;
                Value::Message(m)
            }
        };
        Ok(v)
    }
}

fn field_kind(p: &CodecPlan) -> FieldKind {
    match &p.write {
        WritePlan::Single { value, .. } => value.kind,
        WritePlan::Repeated { element } | WritePlan::Packed { element, .. } => element.kind,
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawSchema;
    use serde_json::json;

    fn schema() -> Schema {
        let raw: RawSchema = serde_json::from_value(json!({
            "messages": [
                { "name": "Ping",
                  "fields": [
                    { "number": 1, "name": "seq", "rule": "required", "type": "int32" },
                    { "number": 2, "name": "host", "rule": "optional", "type": "string" },
                    { "number": 3, "name": "ttl", "rule": "optional", "type": "uint32",
                      "default": "64" }
                  ] },
                { "name": "Remote", "options": { "external": true } }
            ]
        })).unwrap();
        crate::resolve::resolve(&raw).unwrap()
    }

    #[test]
    fn negative_int32_takes_ten_bytes() {
        let s = schema();
        let codec = SchemaCodec::new(&s);
        let ping = s.find_message("Ping").unwrap();
        let mut v = MessageValue::new(&s, ping);
        v.set(1, Value::I32(-1));
        let bytes = codec.encode_to_vec(&v).unwrap();
        assert_eq!(bytes, [&[0x08][..], &[0xFF; 9], &[0x01]].concat());
        assert_eq!(codec.decode(ping, &bytes, FramingMode::Unbounded).unwrap(), v);
    }

    #[test]
    fn default_is_suppressed_and_restored() {
        let s = schema();
        let codec = SchemaCodec::new(&s);
        let ping = s.find_message("Ping").unwrap();
        let v = MessageValue::new(&s, ping);
        assert_eq!(v.get(3), Some(&Value::U32(64)));
        let bytes = codec.encode_to_vec(&v).unwrap();
        assert_eq!(bytes, vec![0x08, 0x00]);
        let back = codec.decode(ping, &bytes, FramingMode::Unbounded).unwrap();
        assert_eq!(back.get(3), Some(&Value::U32(64)));
    }

    #[test]
    fn type_mismatch_on_encode() {
        let s = schema();
        let codec = SchemaCodec::new(&s);
        let ping = s.find_message("Ping").unwrap();
        let mut v = MessageValue::new(&s, ping);
        v.set(2, Value::I64(5));
        assert!(matches!(codec.encode_to_vec(&v), Err(EncodeError::TypeMismatch { .. })));
    }

    #[test]
    fn external_messages_have_no_codec() {
        let s = schema();
        let codec = SchemaCodec::new(&s);
        let remote = s.find_message("Remote").unwrap();
        assert!(codec.encoder(remote).is_none());
        assert_eq!(
            codec.decode(remote, &[], FramingMode::Unbounded),
            Err(DecodeError::UnknownMessage("Remote".into()))
        );
        assert_eq!(
            codec.encode_to_vec(&MessageValue::empty(remote)),
            Err(EncodeError::UnknownMessage("Remote".into()))
        );
    }

    #[test]
    fn invalid_utf8_and_wire_codes() {
        let s = schema();
        let codec = SchemaCodec::new(&s);
        let ping = s.find_message("Ping").unwrap();
        assert_eq!(
            codec.decode(ping, &[0x12, 0x01, 0xFF], FramingMode::Unbounded),
            Err(DecodeError::InvalidUtf8 { position: 1 })
        );
        // field 1, wire code 3 (group start)
        assert_eq!(
            codec.decode(ping, &[0x0B], FramingMode::Unbounded),
            Err(DecodeError::InvalidWireType { code: 3, position: 0 })
        );
    }

    #[test]
    fn bounded_framing_stops_at_limit() {
        let s = schema();
        let codec = SchemaCodec::new(&s);
        let ping = s.find_message("Ping").unwrap();
        // two length-delimited messages back to back
        let input = [0x02, 0x08, 0x05, 0x02, 0x08, 0x06];
        let mut reader = Reader::new(&input);
        let a = codec.decode_from(ping, &mut reader, FramingMode::LengthDelimited).unwrap();
        let b = codec.decode_from(ping, &mut reader, FramingMode::LengthDelimited).unwrap();
        assert_eq!(a.get(1), Some(&Value::I32(5)));
        assert_eq!(b.get(1), Some(&Value::I32(6)));
        assert!(reader.is_eof());

        assert_eq!(
            codec.decode(ping, &[0x08, 0x05], FramingMode::ExplicitLength(4)),
            Err(DecodeError::UnexpectedEof { position: 2, needed: 2 })
        );
    }

    #[test]
    fn codec_framing_applies_to_decode_message() {
        let s = schema();
        let ping = s.find_message("Ping").unwrap();
        let codec = SchemaCodec::with_framing(&s, FramingMode::LengthDelimited);
        assert_eq!(codec.decoder(ping).unwrap().framing, FramingMode::LengthDelimited);
        // trailing byte past the prefixed length is left unread
        let v = codec.decode_message(ping, &[0x02, 0x08, 0x07, 0xFF]).unwrap();
        assert_eq!(v.get(1), Some(&Value::I32(7)));

        let plain = SchemaCodec::new(&s);
        assert_eq!(plain.decoder(ping).unwrap().framing, FramingMode::Unbounded);
        assert_eq!(
            plain.decode_message(ping, &[0x08, 0x07]).unwrap().get(1),
            Some(&Value::I32(7))
        );
    }

    #[test]
    fn nesting_budget_is_per_call() {
        let raw: RawSchema = serde_json::from_value(json!({
            "messages": [{ "name": "Tree", "fields": [
                { "number": 1, "name": "child", "rule": "optional", "type": "Tree" }
            ] }]
        }))
        .unwrap();
        let s = crate::resolve::resolve(&raw).unwrap();
        let tree = s.find_message("Tree").unwrap();
        let codec = SchemaCodec::new(&s);

        let mut body = Vec::new();
        for _ in 0..RECURSION_LIMIT {
            let mut outer = vec![0x0A];
            wire::encode_bytes(&body, &mut outer);
            body = outer;
        }
        // the same codec decodes the deepest allowed chain twice
        assert!(codec.decode(tree, &body, FramingMode::Unbounded).is_ok());
        assert!(codec.decode(tree, &body, FramingMode::Unbounded).is_ok());

        let mut deeper = vec![0x0A];
        wire::encode_bytes(&body, &mut deeper);
        assert!(matches!(
            codec.decode(tree, &deeper, FramingMode::Unbounded),
            Err(DecodeError::RecursionLimit { .. })
        ));
    }
}
