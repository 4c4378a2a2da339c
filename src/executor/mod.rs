pub mod csv_source;
pub mod ondisk_pipeline;

use std::collections::VecDeque;

use crate::{catalog::SchemaRef, error::ExecError, tuple::Tuple};

pub use csv_source::CsvSource;

/// Pull contract of an upstream operator. Once `next` returns `Ok(None)` it
/// keeps doing so.
pub trait TupleSource {
    fn next(&mut self) -> Result<Option<Tuple>, ExecError>;
    fn schema(&self) -> &SchemaRef;
}

impl<S: TupleSource + ?Sized> TupleSource for Box<S> {
    fn next(&mut self) -> Result<Option<Tuple>, ExecError> {
        (**self).next()
    }

    fn schema(&self) -> &SchemaRef {
        (**self).schema()
    }
}

/// Tuples held in memory, handed out in insertion order.
pub struct MemorySource {
    schema: SchemaRef,
    tuples: VecDeque<Tuple>,
}

impl MemorySource {
    pub fn new(schema: SchemaRef, tuples: Vec<Tuple>) -> Self {
        Self {
            schema,
            tuples: tuples.into(),
        }
    }
}

impl TupleSource for MemorySource {
    fn next(&mut self) -> Result<Option<Tuple>, ExecError> {
        Ok(self.tuples.pop_front())
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}
