//! Explicit field lists for by-value objects.

use crate::error::{CodecError, Result};
use crate::types::TypeRef;
use crate::value::{FromValue, Value};

/// One `(name, type, value)` entry of a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
    pub value: Value,
}

/// A by-value object: its type name and an ordered field list.
///
/// Fields are self-describing on the wire, so a reader that does not know
/// a field can still decode the record and ignore it.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub ty: TypeRef,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            fields: Vec::new(),
        }
    }

    /// Append a field whose declared type is the value's runtime type.
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.type_ref();
        self.with_typed(name, ty, value)
    }

    pub fn with_typed(
        mut self,
        name: impl Into<String>,
        ty: TypeRef,
        value: impl Into<Value>,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
            value: value.into(),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    /// Take a field out of the record and convert it.
    pub fn take<T: FromValue>(&mut self, name: &str) -> Result<T> {
        let index = self
            .fields
            .iter()
            .position(|field| field.name == name)
            .ok_or_else(|| CodecError::MissingField {
                ty: self.ty.to_string(),
                field: name.to_string(),
            })?;
        T::from_value(self.fields.swap_remove(index).value)
    }
}

/// A Rust type carried by value as a [`Record`].
pub trait Serializable: Sized {
    /// The name the record travels under.
    fn type_ref() -> TypeRef;

    fn to_record(&self) -> Record;

    /// Rebuild from a record. Unknown fields are ignored.
    fn from_record(record: Record) -> Result<Self>;

    fn to_value(&self) -> Value {
        Value::Record(self.to_record())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Record(record) => Self::from_record(record),
            other => Err(CodecError::UnexpectedValue {
                expected: "record",
                found: other.describe(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
        label: Option<String>,
    }

    impl Serializable for Point {
        fn type_ref() -> TypeRef {
            TypeRef::named("Point")
        }

        fn to_record(&self) -> Record {
            Record::new(Self::type_ref())
                .with("x", self.x)
                .with("y", self.y)
                .with_typed("label", TypeRef::STRING, self.label.clone())
        }

        fn from_record(mut record: Record) -> Result<Self> {
            Ok(Self {
                x: record.take("x")?,
                y: record.take("y")?,
                label: record.take("label")?,
            })
        }
    }

    #[test]
    fn serializable_through_value() {
        let point = Point {
            x: 1,
            y: -2,
            label: None,
        };
        let value = point.to_value();
        if let Value::Record(record) = &value {
            assert_eq!(record.get("y"), Some(&Value::I32(-2)));
            assert_eq!(record.fields[2].ty, TypeRef::STRING);
        } else {
            panic!("expected record");
        }
        assert_eq!(Point::from_value(value).unwrap(), point);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let record = Point {
            x: 3,
            y: 4,
            label: Some("p".into()),
        }
        .to_record()
        .with("z", 5i32);
        let point = Point::from_record(record).unwrap();
        assert_eq!(point.label.as_deref(), Some("p"));
    }

    #[test]
    fn missing_field_is_reported() {
        let record = Record::new(Point::type_ref()).with("x", 1i32);
        let err = Point::from_record(record).unwrap_err();
        assert!(matches!(err, CodecError::MissingField { ref field, .. } if field == "y"));
    }
}
