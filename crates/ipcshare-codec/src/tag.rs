use crate::error::CodecError;
use crate::types::Scalar;

/// One-byte discriminator written before every tagged value.
///
/// The numeric values are part of the wire format and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Array = 0,
    Serializable = 1,
    Enum = 2,
    Null = 3,
    Proxy = 4,
    Type = 5,
    Types = 6,
    DateTime = 7,
    Guid = 8,
    TimeSpan = 9,
    Boolean = 10,
    Byte = 11,
    Bytes = 12,
    Char = 13,
    Decimal = 14,
    Double = 15,
    Float = 16,
    Int = 17,
    Long = 18,
    SByte = 19,
    Short = 20,
    String = 21,
    UInt = 22,
    ULong = 23,
    UShort = 24,
}

const ALL: [Tag; 25] = [
    Tag::Array,
    Tag::Serializable,
    Tag::Enum,
    Tag::Null,
    Tag::Proxy,
    Tag::Type,
    Tag::Types,
    Tag::DateTime,
    Tag::Guid,
    Tag::TimeSpan,
    Tag::Boolean,
    Tag::Byte,
    Tag::Bytes,
    Tag::Char,
    Tag::Decimal,
    Tag::Double,
    Tag::Float,
    Tag::Int,
    Tag::Long,
    Tag::SByte,
    Tag::Short,
    Tag::String,
    Tag::UInt,
    Tag::ULong,
    Tag::UShort,
];

impl Tag {
    /// The tag for a value of primitive kind `scalar`. `object` has none.
    pub fn for_scalar(scalar: Scalar) -> Option<Tag> {
        Some(match scalar {
            Scalar::DateTime => Tag::DateTime,
            Scalar::Guid => Tag::Guid,
            Scalar::TimeSpan => Tag::TimeSpan,
            Scalar::Bool => Tag::Boolean,
            Scalar::U8 => Tag::Byte,
            Scalar::Char => Tag::Char,
            Scalar::Decimal => Tag::Decimal,
            Scalar::F64 => Tag::Double,
            Scalar::F32 => Tag::Float,
            Scalar::I32 => Tag::Int,
            Scalar::I64 => Tag::Long,
            Scalar::I8 => Tag::SByte,
            Scalar::I16 => Tag::Short,
            Scalar::U32 => Tag::UInt,
            Scalar::U64 => Tag::ULong,
            Scalar::U16 => Tag::UShort,
            Scalar::String => Tag::String,
            Scalar::Type => Tag::Type,
            Scalar::Object => return None,
        })
    }

    /// The primitive kind carried by this tag, if it is a single primitive.
    pub fn scalar(self) -> Option<Scalar> {
        Some(match self {
            Tag::DateTime => Scalar::DateTime,
            Tag::Guid => Scalar::Guid,
            Tag::TimeSpan => Scalar::TimeSpan,
            Tag::Boolean => Scalar::Bool,
            Tag::Byte => Scalar::U8,
            Tag::Char => Scalar::Char,
            Tag::Decimal => Scalar::Decimal,
            Tag::Double => Scalar::F64,
            Tag::Float => Scalar::F32,
            Tag::Int => Scalar::I32,
            Tag::Long => Scalar::I64,
            Tag::SByte => Scalar::I8,
            Tag::Short => Scalar::I16,
            Tag::String => Scalar::String,
            Tag::UInt => Scalar::U32,
            Tag::ULong => Scalar::U64,
            Tag::UShort => Scalar::U16,
            Tag::Type => Scalar::Type,
            _ => return None,
        })
    }
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ALL.get(usize::from(value))
            .copied()
            .ok_or(CodecError::UnknownTag(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_are_stable() {
        assert_eq!(Tag::Array as u8, 0);
        assert_eq!(Tag::Null as u8, 3);
        assert_eq!(Tag::Proxy as u8, 4);
        assert_eq!(Tag::Bytes as u8, 12);
        assert_eq!(Tag::String as u8, 21);
        assert_eq!(Tag::UShort as u8, 24);
    }

    #[test]
    fn every_byte_maps_back_to_its_tag() {
        for (index, tag) in ALL.iter().enumerate() {
            assert_eq!(*tag as u8, index as u8);
            assert_eq!(Tag::try_from(index as u8).unwrap(), *tag);
        }
        assert!(matches!(Tag::try_from(25), Err(CodecError::UnknownTag(25))));
    }

    #[test]
    fn scalar_tags_are_symmetric() {
        for tag in ALL {
            if let Some(scalar) = tag.scalar() {
                assert_eq!(Tag::for_scalar(scalar), Some(tag));
            }
        }
        assert_eq!(Tag::for_scalar(Scalar::Object), None);
    }
}
