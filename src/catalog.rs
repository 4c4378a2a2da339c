use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{error::ExecError, field::DataType, tuple::Tuple, ColumnId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// Column layout shared by a tuple source and everything downstream of it.
/// Names may be qualified with a table alias (`S.A`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

pub type SchemaRef = Arc<Schema>;

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, id: ColumnId) -> Option<&ColumnDef> {
        self.columns.get(id)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Resolves a column by its exact name first, then by the unqualified
    /// part of either side (`A` matches `S.A`, `S.A` matches `A`).
    /// An unqualified name matching several columns is ambiguous.
    pub fn column_index(&self, name: &str) -> Result<ColumnId, ExecError> {
        if let Some(idx) = self.columns.iter().position(|c| c.name == name) {
            return Ok(idx);
        }
        let unqualified = |n: &str| n.rsplit('.').next().unwrap_or(n).to_string();
        let wanted = unqualified(name);
        let mut hits = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| unqualified(&c.name) == wanted)
            .map(|(i, _)| i);
        match (hits.next(), hits.next()) {
            (Some(idx), None) => Ok(idx),
            (Some(_), Some(_)) => Err(ExecError::UnknownColumn(format!(
                "{} is ambiguous",
                name
            ))),
            _ => Err(ExecError::UnknownColumn(name.to_string())),
        }
    }

    /// Checks arity and attribute tags of a tuple against this schema.
    pub fn check_tuple(&self, tuple: &Tuple) -> Result<(), ExecError> {
        if tuple.len() != self.columns.len() {
            return Err(ExecError::SchemaMismatch(format!(
                "tuple has {} attributes, schema has {}",
                tuple.len(),
                self.columns.len()
            )));
        }
        for (i, (field, col)) in tuple.fields().iter().zip(&self.columns).enumerate() {
            if field.data_type() != col.data_type {
                return Err(ExecError::SchemaMismatch(format!(
                    "attribute {} ({}) is {:?}, expected {:?}",
                    i,
                    col.name,
                    field.data_type(),
                    col.data_type
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("S.A", DataType::Int),
            ColumnDef::new("S.B", DataType::String),
            ColumnDef::new("R.B", DataType::Float),
        ])
    }

    #[test]
    fn test_column_lookup() {
        let schema = schema();
        assert_eq!(schema.column_index("S.A").unwrap(), 0);
        assert_eq!(schema.column_index("A").unwrap(), 0);
        assert_eq!(schema.column_index("R.B").unwrap(), 2);
        assert!(matches!(
            schema.column_index("B"),
            Err(ExecError::UnknownColumn(_))
        ));
        assert!(matches!(
            schema.column_index("C"),
            Err(ExecError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_check_tuple() {
        let schema = schema();
        let ok = Tuple::from_fields(vec![1.into(), "x".into(), 2.5.into()]);
        assert!(schema.check_tuple(&ok).is_ok());

        let short = Tuple::from_fields(vec![1.into(), "x".into()]);
        assert!(matches!(
            schema.check_tuple(&short),
            Err(ExecError::SchemaMismatch(_))
        ));

        let wrong_tag = Tuple::from_fields(vec![1.into(), "x".into(), 2.into()]);
        assert!(matches!(
            schema.check_tuple(&wrong_tag),
            Err(ExecError::SchemaMismatch(_))
        ));
    }
}
