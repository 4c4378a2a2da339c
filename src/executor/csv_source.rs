use std::{fs::File, io::Read, path::Path};

use crate::{
    catalog::SchemaRef,
    error::ExecError,
    executor::TupleSource,
    field::{DataType, Field},
    tuple::Tuple,
};

/// Reads CSV records and converts each cell to the tag of its schema column.
pub struct CsvSource<R: Read> {
    schema: SchemaRef,
    records: csv::StringRecordsIntoIter<R>,
    line: u64,
    done: bool,
}

impl CsvSource<File> {
    pub fn open(path: impl AsRef<Path>, schema: SchemaRef, has_headers: bool) -> Result<Self, ExecError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ExecError::io(path, e))?;
        Ok(Self::from_reader(file, schema, has_headers))
    }
}

impl<R: Read> CsvSource<R> {
    pub fn from_reader(reader: R, schema: SchemaRef, has_headers: bool) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(has_headers)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();
        Self {
            schema,
            records,
            line: 0,
            done: false,
        }
    }

    fn convert(&self, record: &csv::StringRecord) -> Result<Tuple, ExecError> {
        if record.len() != self.schema.len() {
            return Err(ExecError::SchemaMismatch(format!(
                "csv record {} has {} cells, schema has {}",
                self.line,
                record.len(),
                self.schema.len()
            )));
        }
        let mut fields = Vec::with_capacity(record.len());
        for (cell, col) in record.iter().zip(self.schema.columns()) {
            let field = match col.data_type() {
                DataType::Int => cell.parse::<i64>().map(Field::Int).map_err(|e| {
                    ExecError::SchemaMismatch(format!(
                        "csv record {}, column {}: {:?} is not an integer ({})",
                        self.line,
                        col.name(),
                        cell,
                        e
                    ))
                })?,
                DataType::Float => cell.parse::<f64>().map(Field::Float).map_err(|e| {
                    ExecError::SchemaMismatch(format!(
                        "csv record {}, column {}: {:?} is not a number ({})",
                        self.line,
                        col.name(),
                        cell,
                        e
                    ))
                })?,
                DataType::String => Field::String(cell.to_string()),
            };
            fields.push(field);
        }
        Ok(Tuple::from_fields(fields))
    }
}

impl<R: Read> TupleSource for CsvSource<R> {
    fn next(&mut self) -> Result<Option<Tuple>, ExecError> {
        if self.done {
            return Ok(None);
        }
        match self.records.next() {
            Some(Ok(record)) => {
                self.line += 1;
                self.convert(&record).map(Some)
            }
            Some(Err(e)) => Err(ExecError::SchemaMismatch(format!("csv: {}", e))),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, Schema};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            ColumnDef::new("id", DataType::Int),
            ColumnDef::new("name", DataType::String),
            ColumnDef::new("score", DataType::Float),
        ]))
    }

    #[test]
    fn test_reads_typed_rows() {
        let data = "id,name,score\n1, ann ,2.5\n2,bob,-1\n";
        let mut src = CsvSource::from_reader(data.as_bytes(), schema(), true);
        assert_eq!(
            src.next().unwrap().unwrap(),
            Tuple::from_fields(vec![1.into(), "ann".into(), 2.5.into()])
        );
        assert_eq!(
            src.next().unwrap().unwrap(),
            Tuple::from_fields(vec![2.into(), "bob".into(), (-1.0).into()])
        );
        assert!(src.next().unwrap().is_none());
        assert!(src.next().unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_cells() {
        let data = "x,ann,2.5\n";
        let mut src = CsvSource::from_reader(data.as_bytes(), schema(), false);
        assert!(matches!(src.next(), Err(ExecError::SchemaMismatch(_))));

        let data = "1,ann\n";
        let mut src = CsvSource::from_reader(data.as_bytes(), schema(), false);
        assert!(src.next().is_err());
    }
}
