//! Row mapping into fixed event schemas
//!
//! Each destination schema declares a static table of `column name -> typed
//! setter`. Mapping a row walks the columns, skips names the table does not
//! know, and fails the whole row on the first type conflict. Rows are built
//! into a fresh `Default` value, so a failed row leaves nothing behind.

use crate::column::ColumnValue;
use std::collections::HashMap;
use tracing::trace;

/// Row-level mapping failure. The row is dropped; the table keeps streaming.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("mismatch in header and data sizes: {columns} columns, {values} values")]
    SchemaMismatch { columns: usize, values: usize },

    #[error("type mismatch for field {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("error setting nested field {field}: {source}")]
    Nested {
        field: String,
        #[source]
        source: Box<MappingError>,
    },
}

impl MappingError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            MappingError::SchemaMismatch { .. } => "schema_mismatch",
            MappingError::TypeMismatch { .. } => "type_mismatch",
            MappingError::Nested { source, .. } => source.reason(),
        }
    }
}

/// Typed write access to one destination field
pub enum FieldSetter<T> {
    Boolean(fn(&mut T, bool)),
    Int64(fn(&mut T, i64)),
    Float64(fn(&mut T, f64)),
    Time64Ns(fn(&mut T, i64)),
    UInt128(fn(&mut T, u128)),
    String(fn(&mut T, String)),
    /// Accepts any value through its canonical string rendering
    Rendered(fn(&mut T, String)),
    /// Sub-message populated from the members of a JSON object cell
    Nested(fn(&mut T, &[(String, ColumnValue)]) -> Result<(), MappingError>),
}

impl<T> FieldSetter<T> {
    fn expected(&self) -> &'static str {
        match self {
            FieldSetter::Boolean(_) => "boolean",
            FieldSetter::Int64(_) => "int64",
            FieldSetter::Float64(_) => "float64",
            FieldSetter::Time64Ns(_) => "time64ns",
            FieldSetter::UInt128(_) => "uint128",
            FieldSetter::String(_) => "string",
            FieldSetter::Rendered(_) => "any",
            FieldSetter::Nested(_) => "json object",
        }
    }

    fn apply(&self, target: &mut T, field: &str, value: &ColumnValue) -> Result<(), MappingError> {
        match (self, value) {
            (FieldSetter::Boolean(set), ColumnValue::Boolean(v)) => set(target, *v),
            (FieldSetter::Int64(set), ColumnValue::Int64(v)) => set(target, *v),
            (FieldSetter::Float64(set), ColumnValue::Float64(v)) => set(target, *v),
            (FieldSetter::Time64Ns(set), ColumnValue::Time64Ns(v)) => set(target, *v),
            (FieldSetter::UInt128(set), ColumnValue::UInt128(v)) => set(target, *v),
            (FieldSetter::String(set), ColumnValue::String(v)) => set(target, v.clone()),
            (FieldSetter::Rendered(set), v) => set(target, v.to_string()),
            (FieldSetter::Nested(set), v) => {
                let members = v.as_nested().ok_or_else(|| self.mismatch(field, value))?;
                set(target, &members).map_err(|source| MappingError::Nested {
                    field: field.to_string(),
                    source: Box::new(source),
                })?;
            }
            _ => return Err(self.mismatch(field, value)),
        }
        Ok(())
    }

    fn mismatch(&self, field: &str, value: &ColumnValue) -> MappingError {
        MappingError::TypeMismatch {
            field: field.to_string(),
            expected: self.expected(),
            found: value.type_name(),
        }
    }
}

/// Column-name lookup table for one schema
pub struct FieldTable<T> {
    setters: HashMap<&'static str, FieldSetter<T>>,
}

impl<T> Default for FieldTable<T> {
    fn default() -> Self {
        Self {
            setters: HashMap::new(),
        }
    }
}

impl<T> FieldTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field. Names are matched case-sensitively.
    pub fn field(mut self, name: &'static str, setter: FieldSetter<T>) -> Self {
        self.setters.insert(name, setter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSetter<T>> {
        self.setters.get(name)
    }
}

/// A destination record type with a static field table
pub trait EventSchema: Default + Send + Sync + 'static {
    fn field_table() -> &'static FieldTable<Self>;
}

/// Map one row onto a fresh event.
pub fn map_row<E: EventSchema>(columns: &[String], row: &[ColumnValue]) -> Result<E, MappingError> {
    if columns.len() != row.len() {
        return Err(MappingError::SchemaMismatch {
            columns: columns.len(),
            values: row.len(),
        });
    }

    map_fields(columns.iter().map(String::as_str).zip(row.iter()))
}

/// Map JSON object members (see [`ColumnValue::as_nested`]) onto a fresh sub-message.
pub fn map_members<E: EventSchema>(members: &[(String, ColumnValue)]) -> Result<E, MappingError> {
    map_fields(members.iter().map(|(name, value)| (name.as_str(), value)))
}

fn map_fields<'a, E: EventSchema>(
    fields: impl IntoIterator<Item = (&'a str, &'a ColumnValue)>,
) -> Result<E, MappingError> {
    let table = E::field_table();
    let mut event = E::default();

    for (name, value) in fields {
        match table.get(name) {
            Some(setter) => setter.apply(&mut event, name, value)?,
            None => trace!(column = %name, "No destination field, skipping column"),
        }
    }

    Ok(event)
}
