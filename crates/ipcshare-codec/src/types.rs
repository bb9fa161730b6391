//! Type references as they travel on the wire.
//!
//! Common types are written as a single shorthand byte; every other type is
//! written as a `0` byte followed by its name. Names are plain data: the
//! codec never turns a name received from the wire into behaviour.

use std::fmt;

/// Built-in primitive kinds with a wire shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    DateTime,
    Guid,
    TimeSpan,
    Bool,
    U8,
    Char,
    Decimal,
    F64,
    F32,
    I32,
    I64,
    I8,
    I16,
    U32,
    U64,
    U16,
    Object,
    String,
    Type,
}

const SCALARS: [Scalar; 19] = [
    Scalar::DateTime,
    Scalar::Guid,
    Scalar::TimeSpan,
    Scalar::Bool,
    Scalar::U8,
    Scalar::Char,
    Scalar::Decimal,
    Scalar::F64,
    Scalar::F32,
    Scalar::I32,
    Scalar::I64,
    Scalar::I8,
    Scalar::I16,
    Scalar::U32,
    Scalar::U64,
    Scalar::U16,
    Scalar::Object,
    Scalar::String,
    Scalar::Type,
];

impl Scalar {
    pub fn name(self) -> &'static str {
        match self {
            Scalar::DateTime => "datetime",
            Scalar::Guid => "guid",
            Scalar::TimeSpan => "timespan",
            Scalar::Bool => "bool",
            Scalar::U8 => "u8",
            Scalar::Char => "char",
            Scalar::Decimal => "decimal",
            Scalar::F64 => "f64",
            Scalar::F32 => "f32",
            Scalar::I32 => "i32",
            Scalar::I64 => "i64",
            Scalar::I8 => "i8",
            Scalar::I16 => "i16",
            Scalar::U32 => "u32",
            Scalar::U64 => "u64",
            Scalar::U16 => "u16",
            Scalar::Object => "object",
            Scalar::String => "string",
            Scalar::Type => "type",
        }
    }

    /// Value types are never null unless wrapped as nullable.
    pub fn is_value_type(self) -> bool {
        !matches!(self, Scalar::Object | Scalar::String | Scalar::Type)
    }

    /// Integer kinds that can back an enum.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Scalar::U8
                | Scalar::I8
                | Scalar::I16
                | Scalar::U16
                | Scalar::I32
                | Scalar::U32
                | Scalar::I64
                | Scalar::U64
        )
    }

    fn from_name(name: &str) -> Option<Self> {
        SCALARS.into_iter().find(|scalar| scalar.name() == name)
    }

    // First shorthand code of this scalar's (plain, nullable, array) run.
    fn base_code(self) -> u8 {
        match self {
            Scalar::Type => 1,
            Scalar::DateTime => 3,
            Scalar::Guid => 6,
            Scalar::TimeSpan => 9,
            Scalar::Bool => 12,
            Scalar::U8 => 15,
            Scalar::Char => 18,
            Scalar::Decimal => 21,
            Scalar::F64 => 24,
            Scalar::F32 => 27,
            Scalar::I32 => 30,
            Scalar::I64 => 33,
            Scalar::Object => 36,
            Scalar::I8 => 38,
            Scalar::I16 => 41,
            Scalar::String => 44,
            Scalar::U32 => 46,
            Scalar::U64 => 49,
            Scalar::U16 => 52,
        }
    }
}

/// How a known type wraps its scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Form {
    Plain,
    Nullable,
    Array,
}

/// A type with a one-byte wire shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KnownType {
    scalar: Scalar,
    form: Form,
}

impl KnownType {
    /// `None` for a nullable reference type, which has no shorthand.
    pub const fn new(scalar: Scalar, form: Form) -> Option<Self> {
        let reference = matches!(scalar, Scalar::Object | Scalar::String | Scalar::Type);
        if reference && matches!(form, Form::Nullable) {
            return None;
        }
        Some(Self { scalar, form })
    }

    pub const fn plain(scalar: Scalar) -> Self {
        Self {
            scalar,
            form: Form::Plain,
        }
    }

    pub fn scalar(self) -> Scalar {
        self.scalar
    }

    pub fn form(self) -> Form {
        self.form
    }

    /// The shorthand byte. Never `0`, which introduces a named type.
    pub fn code(self) -> u8 {
        let base = self.scalar.base_code();
        match (self.form, self.scalar.is_value_type()) {
            (Form::Plain, _) => base,
            (Form::Nullable, _) => base + 1,
            (Form::Array, true) => base + 2,
            (Form::Array, false) => base + 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        SCALARS.into_iter().find_map(|scalar| {
            [Form::Plain, Form::Nullable, Form::Array]
                .into_iter()
                .filter_map(|form| KnownType::new(scalar, form))
                .find(|known| known.code() == code)
        })
    }
}

/// A reference to a type: either shorthand-coded or named.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Known(KnownType),
    Named(String),
}

macro_rules! plain_types {
    ($($name:ident => $scalar:ident),* $(,)?) => {
        impl TypeRef {
            $(
                pub const $name: TypeRef = TypeRef::Known(KnownType::plain(Scalar::$scalar));
            )*
        }
    };
}

plain_types! {
    DATETIME => DateTime,
    GUID => Guid,
    TIMESPAN => TimeSpan,
    BOOL => Bool,
    U8 => U8,
    CHAR => Char,
    DECIMAL => Decimal,
    F64 => F64,
    F32 => F32,
    I32 => I32,
    I64 => I64,
    I8 => I8,
    I16 => I16,
    U32 => U32,
    U64 => U64,
    U16 => U16,
    OBJECT => Object,
    STRING => String,
    TYPE => Type,
}

impl TypeRef {
    /// `u8[]`, carried on the wire as a raw byte block.
    pub const BYTES: TypeRef = TypeRef::Known(KnownType {
        scalar: Scalar::U8,
        form: Form::Array,
    });

    /// `type[]`.
    pub const TYPES: TypeRef = TypeRef::Known(KnownType {
        scalar: Scalar::Type,
        form: Form::Array,
    });

    /// Look a type up by name, preferring the shorthand form when one exists.
    pub fn named(name: impl AsRef<str>) -> Self {
        Self::parse(name.as_ref())
    }

    pub fn parse(name: &str) -> Self {
        let known = if let Some(element) = name.strip_suffix("[]") {
            Scalar::from_name(element).and_then(|scalar| KnownType::new(scalar, Form::Array))
        } else if let Some(inner) = name.strip_suffix('?') {
            Scalar::from_name(inner).and_then(|scalar| KnownType::new(scalar, Form::Nullable))
        } else {
            Scalar::from_name(name).map(KnownType::plain)
        };
        match known {
            Some(known) => TypeRef::Known(known),
            None => TypeRef::Named(name.to_string()),
        }
    }

    /// The nullable form of a value type.
    pub fn nullable(&self) -> Option<TypeRef> {
        match self {
            TypeRef::Known(known) if known.form == Form::Plain => {
                KnownType::new(known.scalar, Form::Nullable).map(TypeRef::Known)
            }
            _ => None,
        }
    }

    /// The one-dimensional array type with this element type.
    pub fn array_of(&self) -> TypeRef {
        self.array_of_rank(1)
    }

    pub fn array_of_rank(&self, rank: usize) -> TypeRef {
        if rank == 1 {
            if let TypeRef::Known(known) = self {
                if known.form == Form::Plain {
                    return TypeRef::Known(KnownType {
                        scalar: known.scalar,
                        form: Form::Array,
                    });
                }
            }
        }
        let commas = ",".repeat(rank.saturating_sub(1));
        TypeRef::Named(format!("{self}[{commas}]"))
    }

    /// The element type if this is an array type.
    pub fn element_type(&self) -> Option<TypeRef> {
        match self {
            TypeRef::Known(known) if known.form == Form::Array => {
                Some(TypeRef::Known(KnownType::plain(known.scalar)))
            }
            TypeRef::Known(_) => None,
            TypeRef::Named(name) => {
                let open = name.strip_suffix(']')?.rfind('[')?;
                let dims = &name[open + 1..name.len() - 1];
                if !dims.chars().all(|c| c == ',') || open == 0 {
                    return None;
                }
                Some(TypeRef::parse(&name[..open]))
            }
        }
    }

    pub fn is_array(&self) -> bool {
        self.element_type().is_some()
    }

    pub fn is_object(&self) -> bool {
        *self == TypeRef::OBJECT
    }

    /// Whether values of this type are never null.
    pub fn is_value_type(&self) -> bool {
        matches!(self, TypeRef::Known(known) if known.form == Form::Plain && known.scalar.is_value_type())
    }

    /// Whether a value declared as `other` can be passed where `self` is expected.
    ///
    /// Exact matches always pass; `object` accepts anything; `T?` accepts
    /// `T`; `object[]` accepts any array of non-value elements.
    pub fn is_assignable_from(&self, other: &TypeRef) -> bool {
        if self == other || self.is_object() {
            return true;
        }
        if let TypeRef::Known(known) = self {
            match known.form {
                Form::Nullable => {
                    return *other == TypeRef::Known(KnownType::plain(known.scalar));
                }
                Form::Array if known.scalar == Scalar::Object => {
                    return other
                        .element_type()
                        .is_some_and(|element| !element.is_value_type());
                }
                _ => {}
            }
        }
        false
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Known(known) => {
                let name = known.scalar.name();
                match known.form {
                    Form::Plain => f.write_str(name),
                    Form::Nullable => write!(f, "{name}?"),
                    Form::Array => write!(f, "{name}[]"),
                }
            }
            TypeRef::Named(name) => f.write_str(name),
        }
    }
}

impl From<KnownType> for TypeRef {
    fn from(known: KnownType) -> Self {
        TypeRef::Known(known)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn shorthand_codes_match_wire_table() {
        assert_eq!(TypeRef::TYPE, TypeRef::Known(KnownType::from_code(1).unwrap()));
        assert_eq!(TypeRef::TYPES, TypeRef::Known(KnownType::from_code(2).unwrap()));
        assert_eq!(TypeRef::DATETIME, TypeRef::Known(KnownType::from_code(3).unwrap()));
        assert_eq!(TypeRef::BYTES, TypeRef::Known(KnownType::from_code(17).unwrap()));
        assert_eq!(TypeRef::I32, TypeRef::Known(KnownType::from_code(30).unwrap()));
        assert_eq!(
            TypeRef::named("i32?"),
            TypeRef::Known(KnownType::from_code(31).unwrap())
        );
        assert_eq!(TypeRef::OBJECT, TypeRef::Known(KnownType::from_code(36).unwrap()));
        assert_eq!(
            TypeRef::named("object[]"),
            TypeRef::Known(KnownType::from_code(37).unwrap())
        );
        assert_eq!(TypeRef::STRING, TypeRef::Known(KnownType::from_code(44).unwrap()));
        assert_eq!(
            TypeRef::named("u16[]"),
            TypeRef::Known(KnownType::from_code(54).unwrap())
        );
        assert!(KnownType::from_code(0).is_none());
        assert!(KnownType::from_code(55).is_none());
    }

    #[test]
    fn shorthand_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in 1..=54u8 {
            let known = KnownType::from_code(code).unwrap();
            assert_eq!(known.code(), code);
            assert!(seen.insert(known));
        }
    }

    #[test]
    fn names_round_trip_through_parse() {
        for code in 1..=54u8 {
            let ty = TypeRef::Known(KnownType::from_code(code).unwrap());
            assert_eq!(TypeRef::parse(&ty.to_string()), ty);
        }
        assert_eq!(TypeRef::parse("Counter"), TypeRef::Named("Counter".into()));
        assert_eq!(TypeRef::parse("string?"), TypeRef::Named("string?".into()));
    }

    #[test]
    fn array_and_element_types() {
        assert_eq!(TypeRef::U8.array_of(), TypeRef::BYTES);
        assert_eq!(TypeRef::BYTES.element_type(), Some(TypeRef::U8));

        let counters = TypeRef::named("Counter").array_of();
        assert_eq!(counters, TypeRef::Named("Counter[]".into()));
        assert_eq!(counters.element_type(), Some(TypeRef::named("Counter")));

        let nullable_ints = TypeRef::I32.nullable().unwrap().array_of();
        assert_eq!(nullable_ints.to_string(), "i32?[]");
        assert_eq!(nullable_ints.element_type(), TypeRef::I32.nullable());

        let grid = TypeRef::I32.array_of_rank(2);
        assert_eq!(grid.to_string(), "i32[,]");
        assert_eq!(grid.element_type(), Some(TypeRef::I32));

        let jagged = TypeRef::I32.array_of().array_of();
        assert_eq!(jagged.element_type(), Some(TypeRef::I32.array_of()));

        assert!(!TypeRef::STRING.is_array());
        assert!(TypeRef::named("[]").element_type().is_none());
    }

    #[test]
    fn nullable_only_for_value_types() {
        assert!(TypeRef::STRING.nullable().is_none());
        assert!(TypeRef::I32.nullable().unwrap().nullable().is_none());
        assert!(KnownType::new(Scalar::Object, Form::Nullable).is_none());
    }

    #[test]
    fn assignability_rules() {
        let nullable_int = TypeRef::I32.nullable().unwrap();
        assert!(TypeRef::I32.is_assignable_from(&TypeRef::I32));
        assert!(TypeRef::OBJECT.is_assignable_from(&TypeRef::named("Counter")));
        assert!(nullable_int.is_assignable_from(&TypeRef::I32));
        assert!(!TypeRef::I32.is_assignable_from(&nullable_int));
        assert!(!TypeRef::I64.is_assignable_from(&TypeRef::I32));
        assert!(!TypeRef::STRING.is_assignable_from(&TypeRef::OBJECT));

        let objects = TypeRef::OBJECT.array_of();
        assert!(objects.is_assignable_from(&TypeRef::STRING.array_of()));
        assert!(!objects.is_assignable_from(&TypeRef::I32.array_of()));
    }
}
