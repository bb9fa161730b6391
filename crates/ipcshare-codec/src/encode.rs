//! Synchronous encoding of tagged values into a byte buffer.

use bytes::{BufMut, BytesMut};

use crate::error::{CodecError, Result};
use crate::limits::Limits;
use crate::record::Record;
use crate::registry::{ElementShape, TypeRegistry};
use crate::resolve::ResolveProxyIds;
use crate::tag::Tag;
use crate::types::{Scalar, TypeRef};
use crate::value::{Array, Value};

/// Writes tagged values.
///
/// Shared instances are written as the id of the channel that carries them,
/// looked up through `proxies`; an instance with no channel is an error.
pub struct Encoder<'a> {
    types: &'a TypeRegistry,
    proxies: &'a dyn ResolveProxyIds,
    limits: Limits,
}

impl<'a> Encoder<'a> {
    pub fn new(types: &'a TypeRegistry, proxies: &'a dyn ResolveProxyIds) -> Self {
        Self {
            types,
            proxies,
            limits: Limits::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Write `value` with its leading tag.
    pub fn write_value(&self, dst: &mut BytesMut, value: &Value) -> Result<()> {
        self.value(dst, value, 0)
    }

    /// Write a `(type, value)` pair, both tagged.
    pub fn write_typed(&self, dst: &mut BytesMut, ty: &TypeRef, value: &Value) -> Result<()> {
        put_tagged_type(dst, ty);
        self.write_value(dst, value)
    }

    fn value(&self, dst: &mut BytesMut, value: &Value, depth: usize) -> Result<()> {
        if depth > self.limits.max_depth {
            return Err(CodecError::DepthExceeded(self.limits.max_depth));
        }
        match value {
            Value::Null => dst.put_u8(Tag::Null as u8),
            Value::Bytes(bytes) => {
                dst.put_u8(Tag::Bytes as u8);
                put_len(dst, "byte array", bytes.len())?;
                dst.put_slice(bytes);
            }
            Value::Types(types) => {
                dst.put_u8(Tag::Types as u8);
                put_len(dst, "type list", types.len())?;
                for ty in types {
                    put_type(dst, ty);
                }
            }
            Value::Enum { ty, value } => {
                if !value.is_integral() {
                    return Err(CodecError::InvalidEnum(ty.to_string()));
                }
                dst.put_u8(Tag::Enum as u8);
                put_type(dst, ty);
                self.value(dst, value, depth + 1)?;
            }
            Value::Array(array) => {
                dst.put_u8(Tag::Array as u8);
                self.array_body(dst, array, depth + 1)?;
            }
            Value::Shared(instance) => {
                let id = self
                    .proxies
                    .instance_id(instance)
                    .ok_or(CodecError::UnsharedInstance)?;
                dst.put_u8(Tag::Proxy as u8);
                dst.put_i64_le(id);
            }
            Value::Record(record) => {
                dst.put_u8(Tag::Serializable as u8);
                put_type(dst, &record.ty);
                self.record_body(dst, record, depth + 1)?;
            }
            primitive => {
                let (scalar, tag) = primitive
                    .scalar()
                    .and_then(|scalar| Some((scalar, Tag::for_scalar(scalar)?)))
                    .ok_or_else(|| mismatch("primitive", primitive))?;
                dst.put_u8(tag as u8);
                put_raw(dst, scalar, primitive)?;
            }
        }
        Ok(())
    }

    fn record_body(&self, dst: &mut BytesMut, record: &Record, depth: usize) -> Result<()> {
        put_len(dst, "record", record.fields.len())?;
        for field in &record.fields {
            put_string(dst, &field.name);
            put_type(dst, &field.ty);
            self.value(dst, &field.value, depth)?;
        }
        Ok(())
    }

    fn array_body(&self, dst: &mut BytesMut, array: &Array, depth: usize) -> Result<()> {
        let rank = u8::try_from(array.rank())
            .ok()
            .filter(|rank| *rank > 0)
            .ok_or(CodecError::InvalidLength(array.rank() as i64))?;
        match array.declared_len() {
            Some(len) if len == array.items.len() => {}
            _ => return Err(CodecError::InvalidLength(array.items.len() as i64)),
        }

        put_type(dst, &array.element);
        dst.put_u8(rank);
        for dim in &array.dims {
            dst.put_i32_le(dim.length);
            dst.put_i32_le(dim.lower_bound);
        }

        let shape = self.types.element_shape(&array.element);
        for item in &array.items {
            self.element(dst, shape, &array.element, item, depth)?;
        }
        Ok(())
    }

    fn element(
        &self,
        dst: &mut BytesMut,
        shape: ElementShape,
        element: &TypeRef,
        item: &Value,
        depth: usize,
    ) -> Result<()> {
        match shape {
            ElementShape::Raw(scalar) => put_raw(dst, scalar, item),
            ElementShape::Enum => match item {
                Value::Enum { value, .. } if value.is_integral() => self.value(dst, value, depth),
                integral if integral.is_integral() => self.value(dst, integral, depth),
                other => Err(mismatch(element, other)),
            },
            _ if item.is_null() => {
                dst.put_u8(1);
                Ok(())
            }
            ElementShape::NullableRaw(scalar) => {
                dst.put_u8(0);
                put_raw(dst, scalar, item)
            }
            ElementShape::Sealed => {
                dst.put_u8(0);
                self.sealed_body(dst, element, item, depth)
            }
            ElementShape::Record => match item {
                Value::Record(record) => {
                    dst.put_u8(0);
                    self.record_body(dst, record, depth)
                }
                other => Err(mismatch(element, other)),
            },
            ElementShape::Open => {
                dst.put_u8(0);
                self.value(dst, item, depth)
            }
        }
    }

    fn sealed_body(
        &self,
        dst: &mut BytesMut,
        element: &TypeRef,
        item: &Value,
        depth: usize,
    ) -> Result<()> {
        match item {
            Value::String(s) if *element == TypeRef::STRING => {
                put_string(dst, s);
                Ok(())
            }
            Value::Bytes(bytes) if *element == TypeRef::BYTES => {
                put_len(dst, "byte array", bytes.len())?;
                dst.put_slice(bytes);
                Ok(())
            }
            Value::Array(array) if array.type_ref() == *element => {
                self.array_body(dst, array, depth + 1)
            }
            Value::Types(types) if *element == TypeRef::TYPES => {
                let items = types.iter().cloned().map(Value::Type).collect();
                self.array_body(dst, &Array::vector(TypeRef::TYPE, items), depth + 1)
            }
            other => Err(mismatch(element, other)),
        }
    }
}

fn mismatch(element: impl ToString, found: &Value) -> CodecError {
    CodecError::ShapeMismatch {
        element: element.to_string(),
        found: found.describe(),
    }
}

/// Write a primitive without its tag.
fn put_raw(dst: &mut BytesMut, scalar: Scalar, value: &Value) -> Result<()> {
    match (scalar, value) {
        (Scalar::Bool, Value::Bool(v)) => dst.put_u8(u8::from(*v)),
        (Scalar::U8, Value::U8(v)) => dst.put_u8(*v),
        (Scalar::I8, Value::I8(v)) => dst.put_i8(*v),
        (Scalar::I16, Value::I16(v)) => dst.put_i16_le(*v),
        (Scalar::U16, Value::U16(v)) => dst.put_u16_le(*v),
        (Scalar::I32, Value::I32(v)) => dst.put_i32_le(*v),
        (Scalar::U32, Value::U32(v)) => dst.put_u32_le(*v),
        (Scalar::I64, Value::I64(v)) => dst.put_i64_le(*v),
        (Scalar::U64, Value::U64(v)) => dst.put_u64_le(*v),
        (Scalar::F32, Value::F32(v)) => dst.put_f32_le(*v),
        (Scalar::F64, Value::F64(v)) => dst.put_f64_le(*v),
        (Scalar::Char, Value::Char(c)) => {
            let mut utf8 = [0u8; 4];
            dst.put_slice(c.encode_utf8(&mut utf8).as_bytes());
        }
        (Scalar::Decimal, Value::Decimal(d)) => {
            for part in d.to_parts() {
                dst.put_u32_le(part);
            }
        }
        (Scalar::DateTime, Value::DateTime(dt)) => {
            dst.put_u8(dt.kind as u8);
            dst.put_i64_le(dt.ticks);
        }
        (Scalar::Guid, Value::Guid(guid)) => dst.put_slice(&guid.0),
        (Scalar::TimeSpan, Value::TimeSpan(span)) => dst.put_i64_le(span.ticks),
        (Scalar::String, Value::String(s)) => put_string(dst, s),
        (Scalar::Type, Value::Type(ty)) => put_type(dst, ty),
        (scalar, other) => return Err(mismatch(scalar.name(), other)),
    }
    Ok(())
}

fn put_len(dst: &mut BytesMut, what: &'static str, len: usize) -> Result<()> {
    let len32 = i32::try_from(len).map_err(|_| CodecError::LimitExceeded {
        what,
        size: len,
        max: i32::MAX as usize,
    })?;
    dst.put_i32_le(len32);
    Ok(())
}

/// Write a type as a tagged value.
pub fn put_tagged_type(dst: &mut BytesMut, ty: &TypeRef) {
    dst.put_u8(Tag::Type as u8);
    put_type(dst, ty);
}

/// Write a type reference: its shorthand code, or `0` and its name.
pub fn put_type(dst: &mut BytesMut, ty: &TypeRef) {
    match ty {
        TypeRef::Known(known) => dst.put_u8(known.code()),
        TypeRef::Named(name) => {
            dst.put_u8(0);
            put_string(dst, name);
        }
    }
}

/// Write a string as a 7-bit varint byte length and its UTF-8 bytes.
pub fn put_string(dst: &mut BytesMut, s: &str) {
    // Lengths above u32::MAX cannot be framed anyway.
    put_varint(dst, s.len() as u32);
    dst.put_slice(s.as_bytes());
}

pub fn put_varint(dst: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}
