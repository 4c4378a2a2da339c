//! Sort-key expressions and their evaluation against a tuple.
//!
//! The SQL front end hands the sort operator an ordered list of expressions.
//! Evaluation is pure: the same tuple, expression and schema always yield the
//! same value.

use std::fmt;

use crate::{
    catalog::Schema,
    error::ExecError,
    field::{DataType, Field},
    tuple::Tuple,
    ColumnId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    ColRef(ColumnId),
    Column(String),
    Literal(Field),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Negate(Box<Expression>),
}

impl Expression {
    pub fn col(id: ColumnId) -> Self {
        Expression::ColRef(id)
    }

    pub fn column(name: &str) -> Self {
        Expression::Column(name.to_string())
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Tag of the value this expression yields for tuples of `schema`.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType, ExecError> {
        match self {
            Expression::ColRef(id) => schema
                .column(*id)
                .map(|c| c.data_type())
                .ok_or_else(|| ExecError::UnknownColumn(format!("#{}", id))),
            Expression::Column(name) => {
                let id = schema.column_index(name)?;
                Ok(schema.columns()[id].data_type())
            }
            Expression::Literal(f) => Ok(f.data_type()),
            Expression::Binary { op, left, right } => {
                let l = left.data_type(schema)?;
                let r = right.data_type(schema)?;
                arithmetic_type(*op, l, r)
            }
            Expression::Negate(inner) => match inner.data_type(schema)? {
                DataType::String => Err(ExecError::Evaluation(
                    "cannot negate a text value".to_string(),
                )),
                t => Ok(t),
            },
        }
    }
}

fn arithmetic_type(op: BinaryOp, l: DataType, r: DataType) -> Result<DataType, ExecError> {
    match (l, r) {
        (DataType::Int, DataType::Int) => Ok(DataType::Int),
        (DataType::String, _) | (_, DataType::String) => Err(ExecError::Evaluation(format!(
            "operator {} is not defined on text",
            op
        ))),
        _ => Ok(DataType::Float),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::ColRef(id) => write!(f, "#{}", id),
            Expression::Column(name) => write!(f, "{}", name),
            Expression::Literal(Field::String(s)) => write!(f, "'{}'", s),
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expression::Negate(inner) => write!(f, "-{}", inner),
        }
    }
}

/// Computes the value of an expression for one tuple.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        tuple: &Tuple,
        expr: &Expression,
        schema: &Schema,
    ) -> Result<Field, ExecError>;
}

/// Tree-walking evaluator for [`Expression`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl Evaluator for ExprEvaluator {
    fn evaluate(
        &self,
        tuple: &Tuple,
        expr: &Expression,
        schema: &Schema,
    ) -> Result<Field, ExecError> {
        match expr {
            Expression::ColRef(id) => tuple
                .fields()
                .get(*id)
                .cloned()
                .ok_or_else(|| ExecError::UnknownColumn(format!("#{}", id))),
            Expression::Column(name) => {
                let id = schema.column_index(name)?;
                tuple
                    .fields()
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ExecError::UnknownColumn(name.clone()))
            }
            Expression::Literal(f) => Ok(f.clone()),
            Expression::Binary { op, left, right } => {
                let l = self.evaluate(tuple, left, schema)?;
                let r = self.evaluate(tuple, right, schema)?;
                apply(*op, l, r)
            }
            Expression::Negate(inner) => match self.evaluate(tuple, inner, schema)? {
                Field::Int(v) => v
                    .checked_neg()
                    .map(Field::Int)
                    .ok_or_else(|| ExecError::Evaluation("integer overflow".to_string())),
                Field::Float(v) => Ok(Field::Float(-v)),
                Field::String(_) => Err(ExecError::Evaluation(
                    "cannot negate a text value".to_string(),
                )),
            },
        }
    }
}

fn apply(op: BinaryOp, l: Field, r: Field) -> Result<Field, ExecError> {
    match (l, r) {
        (Field::Int(a), Field::Int(b)) => {
            let v = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(ExecError::Evaluation("division by zero".to_string()));
                    }
                    a.checked_div(b)
                }
            };
            v.map(Field::Int)
                .ok_or_else(|| ExecError::Evaluation("integer overflow".to_string()))
        }
        (Field::String(_), _) | (_, Field::String(_)) => Err(ExecError::Evaluation(format!(
            "operator {} is not defined on text",
            op
        ))),
        (a, b) => {
            let a = a.as_float().or(a.as_int().map(|v| v as f64)).unwrap_or_default();
            let b = b.as_float().or(b.as_int().map(|v| v as f64)).unwrap_or_default();
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
            };
            Ok(Field::Float(v))
        }
    }
}
