//! Asynchronous decoding of tagged values from a byte source.

use std::future::Future;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tracing::trace;

use crate::error::{CodecError, Result};
use crate::limits::Limits;
use crate::record::{Field, Record};
use crate::registry::{ElementShape, TypeRegistry};
use crate::resolve::ResolveProxyIds;
use crate::tag::Tag;
use crate::types::{KnownType, Scalar, TypeRef};
use crate::value::{Array, DateTime, DateTimeKind, Decimal, Dimension, Guid, TimeSpan, Value};

/// Largest allocation made up front from a length prefix.
const PREALLOCATE_MAX: usize = 4096;

/// Where a [`Decoder`] pulls its bytes from.
pub trait Source: Send {
    /// Exactly `count` bytes, waiting for them if needed.
    fn take(&mut self, count: usize) -> impl Future<Output = Result<Bytes>> + Send;
}

/// An in-memory source.
#[derive(Debug, Clone, Default)]
pub struct SliceSource {
    data: Bytes,
}

impl SliceSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl Source for SliceSource {
    fn take(&mut self, count: usize) -> impl Future<Output = Result<Bytes>> + Send {
        let taken = if count <= self.data.len() {
            Ok(self.data.split_to(count))
        } else {
            Err(CodecError::UnexpectedEof)
        };
        std::future::ready(taken)
    }
}

/// Reads tagged values.
///
/// Proxy ids that `proxies` cannot resolve decode as [`Value::Null`].
pub struct Decoder<'a, S> {
    source: S,
    types: &'a TypeRegistry,
    proxies: &'a dyn ResolveProxyIds,
    limits: Limits,
}

impl<'a, S: Source> Decoder<'a, S> {
    pub fn new(source: S, types: &'a TypeRegistry, proxies: &'a dyn ResolveProxyIds) -> Self {
        Self {
            source,
            types,
            proxies,
            limits: Limits::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Read one tagged value.
    pub async fn read_value(&mut self) -> Result<Value> {
        self.value(0).await
    }

    /// Read a `(type, value)` pair, both tagged.
    pub async fn read_typed(&mut self) -> Result<(TypeRef, Value)> {
        let ty = self.read_tagged_type().await?;
        let value = self.read_value().await?;
        Ok((ty, value))
    }

    /// Read a tagged value that must be a type.
    pub async fn read_tagged_type(&mut self) -> Result<TypeRef> {
        match self.read_value().await? {
            Value::Type(ty) => Ok(ty),
            other => Err(CodecError::UnexpectedValue {
                expected: "type",
                found: other.describe(),
            }),
        }
    }

    /// Read a tagged value that must be a string.
    pub async fn read_tagged_string(&mut self) -> Result<String> {
        match self.read_value().await? {
            Value::String(s) => Ok(s),
            other => Err(CodecError::UnexpectedValue {
                expected: "string",
                found: other.describe(),
            }),
        }
    }

    pub async fn read_type(&mut self) -> Result<TypeRef> {
        match self.read_u8().await? {
            0 => Ok(TypeRef::parse(&self.read_string().await?)),
            code => KnownType::from_code(code)
                .map(TypeRef::Known)
                .ok_or(CodecError::UnknownTypeCode(code)),
        }
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>().await?[0])
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array().await?))
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array().await?))
    }

    pub async fn read_string(&mut self) -> Result<String> {
        let len = self.read_varint().await? as usize;
        self.limits.check_len("string", len)?;
        let bytes = self.source.take(len).await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidString)
    }

    async fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.source.take(N).await?;
        let mut out = [0u8; N];
        if bytes.len() != N {
            return Err(CodecError::UnexpectedEof);
        }
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    async fn read_varint(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8().await?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::InvalidLength(i64::from(value)))
    }

    async fn read_len(&mut self, what: &'static str) -> Result<usize> {
        let len = self.read_i32().await?;
        let len = usize::try_from(len).map_err(|_| CodecError::InvalidLength(i64::from(len)))?;
        self.limits.check_len(what, len)?;
        Ok(len)
    }

    async fn read_char(&mut self) -> Result<char> {
        let lead = self.read_u8().await?;
        let width = match lead {
            0x00..=0x7f => 1,
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return Err(CodecError::InvalidChar),
        };
        let mut utf8 = vec![lead];
        if width > 1 {
            utf8.extend_from_slice(&self.source.take(width - 1).await?);
        }
        let s = std::str::from_utf8(&utf8).map_err(|_| CodecError::InvalidChar)?;
        s.chars().next().ok_or(CodecError::InvalidChar)
    }

    fn value(&mut self, depth: usize) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            if depth > self.limits.max_depth {
                return Err(CodecError::DepthExceeded(self.limits.max_depth));
            }
            let tag = Tag::try_from(self.read_u8().await?)?;
            let value = match tag {
                Tag::Null => Value::Null,
                Tag::Array => Value::Array(self.array_body(depth + 1).await?),
                Tag::Serializable => {
                    let ty = self.read_type().await?;
                    Value::Record(self.record_body(ty, depth + 1).await?)
                }
                Tag::Enum => {
                    let ty = self.read_type().await?;
                    let value = self.value(depth + 1).await?;
                    enum_value(ty, value)?
                }
                Tag::Proxy => {
                    let id = self.read_i64().await?;
                    match self.proxies.instance(id) {
                        Some(instance) => Value::Shared(instance),
                        None => {
                            trace!(channel = id, "proxy id not shared here, decoding as null");
                            Value::Null
                        }
                    }
                }
                Tag::Types => {
                    let count = self.read_len("type list").await?;
                    let mut types = Vec::with_capacity(count.min(PREALLOCATE_MAX));
                    for _ in 0..count {
                        types.push(self.read_type().await?);
                    }
                    Value::Types(types)
                }
                Tag::Bytes => Value::Bytes(self.bytes_body().await?),
                primitive => match primitive.scalar() {
                    Some(scalar) => self.raw(scalar).await?,
                    None => return Err(CodecError::UnknownTag(primitive as u8)),
                },
            };
            Ok(value)
        })
    }

    async fn bytes_body(&mut self) -> Result<Bytes> {
        let len = self.read_len("byte array").await?;
        self.source.take(len).await
    }

    async fn record_body(&mut self, ty: TypeRef, depth: usize) -> Result<Record> {
        let count = self.read_len("record").await?;
        let mut fields = Vec::with_capacity(count.min(PREALLOCATE_MAX));
        for _ in 0..count {
            let name = self.read_string().await?;
            let ty = self.read_type().await?;
            let value = self.value(depth).await?;
            fields.push(Field { name, ty, value });
        }
        Ok(Record { ty, fields })
    }

    async fn array_body(&mut self, depth: usize) -> Result<Array> {
        let element = self.read_type().await?;
        let rank = self.read_u8().await?;
        if rank == 0 {
            return Err(CodecError::InvalidLength(0));
        }
        let mut dims = Vec::with_capacity(usize::from(rank));
        for _ in 0..rank {
            let length = self.read_i32().await?;
            let lower_bound = self.read_i32().await?;
            if length < 0 {
                return Err(CodecError::InvalidLength(i64::from(length)));
            }
            dims.push(Dimension {
                length,
                lower_bound,
            });
        }

        let mut array = Array {
            element,
            dims,
            items: Vec::new(),
        };
        let len = array.declared_len().ok_or(CodecError::LimitExceeded {
            what: "array",
            size: usize::MAX,
            max: self.limits.max_collection_len,
        })?;
        self.limits.check_len("array", len)?;

        let shape = self.types.element_shape(&array.element);
        array.items.reserve(len.min(PREALLOCATE_MAX));
        for _ in 0..len {
            let item = self.element(shape, &array.element, depth).await?;
            array.items.push(item);
        }
        Ok(array)
    }

    async fn element(
        &mut self,
        shape: ElementShape,
        element: &TypeRef,
        depth: usize,
    ) -> Result<Value> {
        if let ElementShape::Raw(scalar) = shape {
            return self.raw(scalar).await;
        }
        if shape == ElementShape::Enum {
            let value = self.value(depth).await?;
            return enum_value(element.clone(), value);
        }
        if self.read_u8().await? != 0 {
            return Ok(Value::Null);
        }
        match shape {
            ElementShape::NullableRaw(scalar) => self.raw(scalar).await,
            ElementShape::Record => Ok(Value::Record(
                self.record_body(element.clone(), depth).await?,
            )),
            ElementShape::Sealed if *element == TypeRef::STRING => {
                Ok(Value::String(self.read_string().await?))
            }
            ElementShape::Sealed if *element == TypeRef::BYTES => {
                Ok(Value::Bytes(self.bytes_body().await?))
            }
            ElementShape::Sealed => Ok(Value::Array(self.nested_array(depth).await?)),
            _ => self.value(depth).await,
        }
    }

    // Boxed so that array bodies can nest inside array bodies.
    fn nested_array(&mut self, depth: usize) -> BoxFuture<'_, Result<Array>> {
        Box::pin(async move {
            if depth > self.limits.max_depth {
                return Err(CodecError::DepthExceeded(self.limits.max_depth));
            }
            self.array_body(depth + 1).await
        })
    }

    async fn raw(&mut self, scalar: Scalar) -> Result<Value> {
        Ok(match scalar {
            Scalar::Bool => Value::Bool(self.read_u8().await? != 0),
            Scalar::U8 => Value::U8(self.read_u8().await?),
            Scalar::I8 => Value::I8(i8::from_le_bytes(self.array().await?)),
            Scalar::I16 => Value::I16(i16::from_le_bytes(self.array().await?)),
            Scalar::U16 => Value::U16(u16::from_le_bytes(self.array().await?)),
            Scalar::I32 => Value::I32(self.read_i32().await?),
            Scalar::U32 => Value::U32(u32::from_le_bytes(self.array().await?)),
            Scalar::I64 => Value::I64(self.read_i64().await?),
            Scalar::U64 => Value::U64(u64::from_le_bytes(self.array().await?)),
            Scalar::F32 => Value::F32(f32::from_le_bytes(self.array().await?)),
            Scalar::F64 => Value::F64(f64::from_le_bytes(self.array().await?)),
            Scalar::Char => Value::Char(self.read_char().await?),
            Scalar::Decimal => {
                let mut parts = [0u32; 4];
                for part in &mut parts {
                    *part = u32::from_le_bytes(self.array().await?);
                }
                let [lo, mid, hi, flags] = parts;
                Value::Decimal(Decimal::from_parts(lo, mid, hi, flags))
            }
            Scalar::DateTime => {
                let kind = DateTimeKind::try_from(self.read_u8().await?)?;
                Value::DateTime(DateTime::new(kind, self.read_i64().await?))
            }
            Scalar::Guid => Value::Guid(Guid(self.array().await?)),
            Scalar::TimeSpan => Value::TimeSpan(TimeSpan::from_ticks(self.read_i64().await?)),
            Scalar::String => Value::String(self.read_string().await?),
            Scalar::Type => Value::Type(self.read_type().await?),
            Scalar::Object => {
                return Err(CodecError::ShapeMismatch {
                    element: "object".to_string(),
                    found: "untagged value".to_string(),
                })
            }
        })
    }
}

fn enum_value(ty: TypeRef, value: Value) -> Result<Value> {
    if !value.is_integral() {
        return Err(CodecError::InvalidEnum(ty.to_string()));
    }
    Ok(Value::Enum {
        ty,
        value: Box::new(value),
    })
}
