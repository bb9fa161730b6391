//! The decoded value tree.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::{CodecError, Result};
use crate::record::Record;
use crate::types::{Scalar, TypeRef};

/// A live object shared by reference rather than copied.
///
/// Identity is the allocation: two `Instance`s are equal when they wrap the
/// same `Arc`.
#[derive(Clone)]
pub struct Instance(Arc<dyn Any + Send + Sync>);

impl Instance {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    pub fn from_dyn(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(value)
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.as_ref().is::<T>()
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self.0.as_ref()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({:p})", Arc::as_ptr(&self.0))
    }
}

/// A 96-bit scaled decimal: `mantissa / 10^scale`.
///
/// Stored in the four 32-bit words used on the wire. `flags` carries the
/// scale in bits 16..24 and the sign in bit 31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    lo: u32,
    mid: u32,
    hi: u32,
    flags: u32,
}

impl Decimal {
    pub const MAX_SCALE: u8 = 28;
    const SIGN: u32 = 0x8000_0000;

    /// `None` when the mantissa needs more than 96 bits or the scale is
    /// above [`Decimal::MAX_SCALE`].
    pub fn new(mantissa: i128, scale: u8) -> Option<Self> {
        let magnitude = mantissa.unsigned_abs();
        if magnitude >> 96 != 0 || scale > Self::MAX_SCALE {
            return None;
        }
        let sign = if mantissa < 0 { Self::SIGN } else { 0 };
        Some(Self {
            lo: magnitude as u32,
            mid: (magnitude >> 32) as u32,
            hi: (magnitude >> 64) as u32,
            flags: sign | (u32::from(scale) << 16),
        })
    }

    pub fn from_parts(lo: u32, mid: u32, hi: u32, flags: u32) -> Self {
        Self { lo, mid, hi, flags }
    }

    pub fn to_parts(self) -> [u32; 4] {
        [self.lo, self.mid, self.hi, self.flags]
    }

    pub fn mantissa(self) -> i128 {
        let magnitude =
            i128::from(self.lo) | (i128::from(self.mid) << 32) | (i128::from(self.hi) << 64);
        if self.flags & Self::SIGN != 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn scale(self) -> u8 {
        ((self.flags >> 16) & 0xff) as u8
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mantissa = self.mantissa();
        let digits = mantissa.unsigned_abs().to_string();
        let scale = usize::from(self.scale());
        let sign = if mantissa < 0 { "-" } else { "" };
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int}.{frac}")
    }
}

/// How a [`DateTime`]'s ticks should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DateTimeKind {
    #[default]
    Unspecified = 0,
    Utc = 1,
    Local = 2,
}

impl TryFrom<u8> for DateTimeKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DateTimeKind::Unspecified),
            1 => Ok(DateTimeKind::Utc),
            2 => Ok(DateTimeKind::Local),
            other => Err(CodecError::InvalidDateTimeKind(other)),
        }
    }
}

/// 100-nanosecond ticks.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// A point in time as 100 ns ticks since 0001-01-01T00:00:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DateTime {
    pub kind: DateTimeKind,
    pub ticks: i64,
}

impl DateTime {
    /// Ticks at 1970-01-01T00:00:00Z.
    pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

    pub fn new(kind: DateTimeKind, ticks: i64) -> Self {
        Self { kind, ticks }
    }

    pub fn now_utc() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let offset = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => duration_ticks(after),
            Err(before) => -duration_ticks(before.duration()),
        };
        Self::new(DateTimeKind::Utc, Self::UNIX_EPOCH_TICKS.saturating_add(offset))
    }

    /// The instant, treating the ticks as UTC whatever the kind.
    pub fn to_system_time(self) -> Option<SystemTime> {
        let offset = self.ticks.checked_sub(Self::UNIX_EPOCH_TICKS)?;
        let span = ticks_duration(offset.unsigned_abs());
        if offset >= 0 {
            UNIX_EPOCH.checked_add(span)
        } else {
            UNIX_EPOCH.checked_sub(span)
        }
    }
}

/// A signed duration in 100 ns ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TimeSpan {
    pub ticks: i64,
}

impl TimeSpan {
    pub fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    /// `None` for negative spans.
    pub fn to_duration(self) -> Option<Duration> {
        u64::try_from(self.ticks).ok().map(ticks_duration)
    }
}

impl From<Duration> for TimeSpan {
    fn from(duration: Duration) -> Self {
        Self::from_ticks(duration_ticks(duration))
    }
}

fn duration_ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX)
}

fn ticks_duration(ticks: u64) -> Duration {
    Duration::from_nanos(ticks.saturating_mul(100))
}

/// A 128-bit identifier, kept as its 16 wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Extent of one array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension {
    pub length: i32,
    pub lower_bound: i32,
}

impl Dimension {
    pub fn new(length: i32) -> Self {
        Self {
            length,
            lower_bound: 0,
        }
    }
}

/// A possibly multi-dimensional array with items in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub element: TypeRef,
    pub dims: Vec<Dimension>,
    pub items: Vec<Value>,
}

impl Array {
    /// A one-dimensional, zero-based array.
    pub fn vector(element: TypeRef, items: Vec<Value>) -> Self {
        let length = i32::try_from(items.len()).unwrap_or(i32::MAX);
        Self {
            element,
            dims: vec![Dimension::new(length)],
            items,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn type_ref(&self) -> TypeRef {
        self.element.array_of_rank(self.rank())
    }

    /// Number of items the dimensions describe, or `None` on overflow or a
    /// negative length.
    pub fn declared_len(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, dim| {
            acc.checked_mul(usize::try_from(dim.length).ok()?)
        })
    }
}

/// Any value the codec can carry.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    U8(u8),
    I8(i8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    Decimal(Decimal),
    String(String),
    Bytes(Bytes),
    DateTime(DateTime),
    Guid(Guid),
    TimeSpan(TimeSpan),
    Type(TypeRef),
    Types(Vec<TypeRef>),
    /// A named enum with its underlying integral value.
    Enum { ty: TypeRef, value: Box<Value> },
    Array(Array),
    /// An object shared by reference over a channel.
    Shared(Instance),
    Record(Record),
}

impl Value {
    /// The runtime type of this value. `Null` and shared instances report
    /// `object`.
    pub fn type_ref(&self) -> TypeRef {
        match self {
            Value::Null | Value::Shared(_) => TypeRef::OBJECT,
            Value::Bytes(_) => TypeRef::BYTES,
            Value::Types(_) => TypeRef::TYPES,
            Value::Enum { ty, .. } => ty.clone(),
            Value::Array(array) => array.type_ref(),
            Value::Record(record) => record.ty.clone(),
            other => match other.scalar() {
                Some(scalar) => TypeRef::Known(crate::types::KnownType::plain(scalar)),
                None => TypeRef::OBJECT,
            },
        }
    }

    /// The primitive kind of a single primitive value.
    pub fn scalar(&self) -> Option<Scalar> {
        Some(match self {
            Value::Bool(_) => Scalar::Bool,
            Value::U8(_) => Scalar::U8,
            Value::I8(_) => Scalar::I8,
            Value::I16(_) => Scalar::I16,
            Value::U16(_) => Scalar::U16,
            Value::I32(_) => Scalar::I32,
            Value::U32(_) => Scalar::U32,
            Value::I64(_) => Scalar::I64,
            Value::U64(_) => Scalar::U64,
            Value::F32(_) => Scalar::F32,
            Value::F64(_) => Scalar::F64,
            Value::Char(_) => Scalar::Char,
            Value::Decimal(_) => Scalar::Decimal,
            Value::String(_) => Scalar::String,
            Value::DateTime(_) => Scalar::DateTime,
            Value::Guid(_) => Scalar::Guid,
            Value::TimeSpan(_) => Scalar::TimeSpan,
            Value::Type(_) => Scalar::Type,
            _ => return None,
        })
    }

    pub fn is_integral(&self) -> bool {
        self.scalar().is_some_and(Scalar::is_integral)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// A short description used in conversion errors.
    pub fn describe(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            other => other.type_ref().to_string(),
        }
    }

    /// Convert into a Rust type.
    pub fn into_typed<T: FromValue>(self) -> Result<T> {
        T::from_value(self)
    }
}

/// Conversion out of a decoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! value_conversions {
    ($($variant:ident($ty:ty) => $expected:literal),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }

            impl TryFrom<Value> for $ty {
                type Error = CodecError;

                fn try_from(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(inner) => Ok(inner),
                        other => Err(CodecError::UnexpectedValue {
                            expected: $expected,
                            found: other.describe(),
                        }),
                    }
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    Self::try_from(value)
                }
            }
        )*
    };
}

value_conversions! {
    Bool(bool) => "bool",
    U8(u8) => "u8",
    I8(i8) => "i8",
    I16(i16) => "i16",
    U16(u16) => "u16",
    I32(i32) => "i32",
    U32(u32) => "u32",
    I64(i64) => "i64",
    U64(u64) => "u64",
    F32(f32) => "f32",
    F64(f64) => "f64",
    Char(char) => "char",
    Decimal(Decimal) => "decimal",
    String(String) => "string",
    Bytes(Bytes) => "u8[]",
    DateTime(DateTime) => "datetime",
    Guid(Guid) => "guid",
    TimeSpan(TimeSpan) => "timespan",
    Type(TypeRef) => "type",
    Array(Array) => "array",
    Shared(Instance) => "shared instance",
    Record(Record) => "record",
}

impl From<Vec<TypeRef>> for Value {
    fn from(value: Vec<TypeRef>) -> Self {
        Value::Types(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(value))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(()),
            other => Err(CodecError::UnexpectedValue {
                expected: "null",
                found: other.describe(),
            }),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(array) if array.rank() == 1 => {
                array.items.into_iter().map(T::from_value).collect()
            }
            Value::Bytes(bytes) => bytes.iter().map(|b| T::from_value(Value::U8(*b))).collect(),
            Value::Types(types) => types
                .into_iter()
                .map(|ty| T::from_value(Value::Type(ty)))
                .collect(),
            other => Err(CodecError::UnexpectedValue {
                expected: "one-dimensional array",
                found: other.describe(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_parts_and_display() {
        let d = Decimal::new(-12345, 2).unwrap();
        assert_eq!(d.mantissa(), -12345);
        assert_eq!(d.scale(), 2);
        assert_eq!(d.to_string(), "-123.45");
        assert_eq!(d.to_parts(), [12345, 0, 0, 0x8002_0000]);

        assert_eq!(Decimal::new(5, 3).unwrap().to_string(), "0.005");
        assert_eq!(Decimal::new(42, 0).unwrap().to_string(), "42");

        let max = (1i128 << 96) - 1;
        assert_eq!(Decimal::new(max, 0).unwrap().mantissa(), max);
        assert!(Decimal::new(1i128 << 96, 0).is_none());
        assert!(Decimal::new(1, 29).is_none());
    }

    #[test]
    fn datetime_epoch_conversion() {
        let dt = DateTime::from_system_time(UNIX_EPOCH + Duration::from_secs(1));
        assert_eq!(dt.kind, DateTimeKind::Utc);
        assert_eq!(dt.ticks, DateTime::UNIX_EPOCH_TICKS + TICKS_PER_SECOND);
        assert_eq!(
            dt.to_system_time(),
            Some(UNIX_EPOCH + Duration::from_secs(1))
        );
        assert!(DateTimeKind::try_from(3).is_err());
    }

    #[test]
    fn timespan_from_duration() {
        let span = TimeSpan::from(Duration::from_millis(1));
        assert_eq!(span.ticks, 10_000);
        assert_eq!(span.to_duration(), Some(Duration::from_millis(1)));
        assert_eq!(TimeSpan::from_ticks(-1).to_duration(), None);
    }

    #[test]
    fn guid_display() {
        let guid = Guid([
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ]);
        assert_eq!(guid.to_string(), "00112233-4455-6677-8899-aabbccddeeff");
    }

    #[test]
    fn instances_compare_by_identity() {
        let a = Instance::new(5u32);
        let b = Instance::new(5u32);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.is::<u32>());
        assert_eq!(*a.downcast::<u32>().unwrap(), 5);
        assert!(a.downcast::<String>().is_none());
    }

    #[test]
    fn runtime_types() {
        assert_eq!(Value::from(3i32).type_ref(), TypeRef::I32);
        assert_eq!(Value::from("x").type_ref(), TypeRef::STRING);
        assert_eq!(Value::from(vec![1u8]).type_ref(), TypeRef::BYTES);
        assert_eq!(Value::Null.type_ref(), TypeRef::OBJECT);

        let grid = Array {
            element: TypeRef::I32,
            dims: vec![Dimension::new(2), Dimension::new(3)],
            items: vec![Value::I32(0); 6],
        };
        assert_eq!(grid.declared_len(), Some(6));
        assert_eq!(Value::Array(grid).type_ref().to_string(), "i32[,]");
    }

    #[test]
    fn typed_conversions() {
        assert_eq!(Value::I32(7).into_typed::<i32>().unwrap(), 7);
        assert!(matches!(
            Value::I32(7).into_typed::<i64>(),
            Err(CodecError::UnexpectedValue { expected: "i64", .. })
        ));
        assert_eq!(Value::Null.into_typed::<Option<String>>().unwrap(), None);
        assert_eq!(
            Value::from(Some("a")).into_typed::<Option<String>>().unwrap(),
            Some("a".to_string())
        );
        Value::Null.into_typed::<()>().unwrap();
        assert_eq!(
            Value::from(vec![TypeRef::I32]).into_typed::<Vec<TypeRef>>().unwrap(),
            vec![TypeRef::I32]
        );

        let list = Value::Array(Array::vector(
            TypeRef::STRING,
            vec![Value::from("a"), Value::Null],
        ));
        assert_eq!(
            list.into_typed::<Vec<Option<String>>>().unwrap(),
            vec![Some("a".to_string()), None]
        );
    }
}
