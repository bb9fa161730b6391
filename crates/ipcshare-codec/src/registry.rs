//! Named types the embedding program has declared.
//!
//! Registration never makes the codec construct anything from a name. It
//! only decides how array elements of that type are laid out and which
//! named types the program is willing to send.

use std::collections::HashSet;

use crate::record::Serializable;
use crate::types::{Form, Scalar, TypeRef};

/// How each element of an array is laid out, derived from the element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementShape {
    /// A value type written bare.
    Raw(Scalar),
    /// A nullable value type: null flag, then the bare value.
    NullableRaw(Scalar),
    /// A sealed reference type (string, bytes, arrays): null flag, then the
    /// untagged body.
    Sealed,
    /// A registered enum: its tagged underlying value.
    Enum,
    /// A registered sealed record: null flag, then the field list.
    Record,
    /// Anything else: null flag, then the tagged value.
    Open,
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    enums: HashSet<TypeRef>,
    records: HashSet<TypeRef>,
    shared: HashSet<TypeRef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enum(mut self, ty: TypeRef) -> Self {
        self.enums.insert(ty);
        self
    }

    /// Register a record type that has no subtypes.
    pub fn with_record<T: Serializable>(self) -> Self {
        self.with_sealed_record(T::type_ref())
    }

    pub fn with_sealed_record(mut self, ty: TypeRef) -> Self {
        self.records.insert(ty);
        self
    }

    /// Register a type that is shared by reference.
    pub fn with_shared(mut self, ty: TypeRef) -> Self {
        self.shared.insert(ty);
        self
    }

    pub fn is_enum(&self, ty: &TypeRef) -> bool {
        self.enums.contains(ty)
    }

    pub fn is_record(&self, ty: &TypeRef) -> bool {
        self.records.contains(ty)
    }

    pub fn is_shared(&self, ty: &TypeRef) -> bool {
        self.shared.contains(ty)
    }

    pub fn element_shape(&self, element: &TypeRef) -> ElementShape {
        match element {
            TypeRef::Known(known) => match (known.form(), known.scalar()) {
                (Form::Plain, Scalar::String) => ElementShape::Sealed,
                (Form::Plain, scalar) if scalar.is_value_type() => ElementShape::Raw(scalar),
                (Form::Plain, _) => ElementShape::Open,
                (Form::Nullable, scalar) => ElementShape::NullableRaw(scalar),
                (Form::Array, _) => ElementShape::Sealed,
            },
            named if self.is_enum(named) => ElementShape::Enum,
            named if self.is_record(named) => ElementShape::Record,
            named if named.is_array() => ElementShape::Sealed,
            _ => ElementShape::Open,
        }
    }

    /// Whether values declared as `ty` can be sent over a connection.
    pub fn can_serialize(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Known(_) => true,
            named if self.is_enum(named) || self.is_record(named) || self.is_shared(named) => true,
            named => named
                .element_type()
                .is_some_and(|element| self.can_serialize(&element)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with_enum(TypeRef::named("Color"))
            .with_sealed_record(TypeRef::named("Point"))
            .with_shared(TypeRef::named("Counter"))
    }

    #[test]
    fn element_shapes() {
        let types = registry();
        assert_eq!(types.element_shape(&TypeRef::I32), ElementShape::Raw(Scalar::I32));
        assert_eq!(
            types.element_shape(&TypeRef::BOOL.nullable().unwrap()),
            ElementShape::NullableRaw(Scalar::Bool)
        );
        assert_eq!(types.element_shape(&TypeRef::STRING), ElementShape::Sealed);
        assert_eq!(types.element_shape(&TypeRef::BYTES), ElementShape::Sealed);
        assert_eq!(
            types.element_shape(&TypeRef::named("Point").array_of()),
            ElementShape::Sealed
        );
        assert_eq!(types.element_shape(&TypeRef::OBJECT), ElementShape::Open);
        assert_eq!(types.element_shape(&TypeRef::TYPE), ElementShape::Open);
        assert_eq!(types.element_shape(&TypeRef::named("Color")), ElementShape::Enum);
        assert_eq!(types.element_shape(&TypeRef::named("Point")), ElementShape::Record);
        assert_eq!(types.element_shape(&TypeRef::named("Counter")), ElementShape::Open);
        assert_eq!(types.element_shape(&TypeRef::named("Unknown")), ElementShape::Open);
    }

    #[test]
    fn only_declared_names_are_serializable() {
        let types = registry();
        assert!(types.can_serialize(&TypeRef::DECIMAL));
        assert!(types.can_serialize(&TypeRef::named("Counter")));
        assert!(types.can_serialize(&TypeRef::named("Color").array_of()));
        assert!(!types.can_serialize(&TypeRef::named("Socket")));
        assert!(!types.can_serialize(&TypeRef::named("Socket").array_of()));
    }
}
