//! Total order over tuples of one schema.
//!
//! Tuples are ordered by the caller's sort-key expressions first. When every
//! key ties, all attributes are compared position by position, so two tuples
//! compare equal only if they are identical.
//!
//! The sort does not call [`TupleComparator::compare`] in its inner loops.
//! Instead every tuple is keyed once into a byte string
//! ([`TupleComparator::normalized_key`]) whose lexicographic order is the same
//! total order, and buffers and merge heaps compare those bytes.

use std::{cmp::Ordering, fmt, sync::Arc};

use crate::{
    catalog::SchemaRef,
    error::ExecError,
    expression::{Evaluator, ExprEvaluator, Expression},
    field::DataType,
    tuple::Tuple,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expression,
    pub asc: bool,
}

impl SortKey {
    pub fn asc(expr: Expression) -> Self {
        Self { expr, asc: true }
    }

    pub fn desc(expr: Expression) -> Self {
        Self { expr, asc: false }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, if self.asc { "asc" } else { "desc" })
    }
}

pub struct TupleComparator {
    schema: SchemaRef,
    keys: Vec<SortKey>,
    key_types: Vec<DataType>,
    evaluator: Arc<dyn Evaluator>,
}

impl TupleComparator {
    pub fn new(schema: SchemaRef, keys: Vec<SortKey>) -> Result<Self, ExecError> {
        Self::with_evaluator(schema, keys, Arc::new(ExprEvaluator))
    }

    /// Resolves the result tag of every key up front; a key whose type
    /// cannot be inferred from the schema is rejected here.
    pub fn with_evaluator(
        schema: SchemaRef,
        keys: Vec<SortKey>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self, ExecError> {
        let key_types = keys
            .iter()
            .map(|k| k.expr.data_type(&schema))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            schema,
            keys,
            key_types,
            evaluator,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// The attribute tie-break runs in the direction of the last key.
    fn tie_break_asc(&self) -> bool {
        self.keys.last().map_or(true, |k| k.asc)
    }

    /// Compares two tuples by evaluating the sort keys on both.
    pub fn compare(&self, a: &Tuple, b: &Tuple) -> Result<Ordering, ExecError> {
        for key in &self.keys {
            let va = self.evaluator.evaluate(a, &key.expr, &self.schema)?;
            let vb = self.evaluator.evaluate(b, &key.expr, &self.schema)?;
            let ord = va.compare(&vb)?;
            let ord = if key.asc { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        if a.len() != b.len() {
            return Err(ExecError::SchemaMismatch(format!(
                "comparing tuples of {} and {} attributes",
                a.len(),
                b.len()
            )));
        }
        let asc = self.tie_break_asc();
        for (fa, fb) in a.fields().iter().zip(b.fields()) {
            let ord = fa.compare(fb)?;
            if ord != Ordering::Equal {
                return Ok(if asc { ord } else { ord.reverse() });
            }
        }
        Ok(Ordering::Equal)
    }

    /// Byte string whose lexicographic order equals [`Self::compare`].
    /// The tuple must match the schema and every key must evaluate to the
    /// tag inferred for it, otherwise values of different tags would be
    /// compared as bytes.
    pub fn normalized_key(&self, tuple: &Tuple) -> Result<Vec<u8>, ExecError> {
        self.schema.check_tuple(tuple)?;
        let mut key = Vec::new();
        for (sort_key, expected) in self.keys.iter().zip(&self.key_types) {
            let value = self.evaluator.evaluate(tuple, &sort_key.expr, &self.schema)?;
            if value.data_type() != *expected {
                return Err(ExecError::TypeMismatch {
                    left: *expected,
                    right: value.data_type(),
                });
            }
            value.write_normalized(sort_key.asc, &mut key);
        }
        let asc = self.tie_break_asc();
        for field in tuple.fields() {
            field.write_normalized(asc, &mut key);
        }
        Ok(key)
    }
}

impl fmt::Debug for TupleComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleComparator")
            .field("keys", &self.keys)
            .field("key_types", &self.key_types)
            .finish()
    }
}
