//! ORDER BY lists in SQL syntax, lowered to sort keys.

use sqlparser::{
    ast::{self, BinaryOperator, OrderByExpr, UnaryOperator, Value},
    dialect::GenericDialect,
    parser::Parser,
    tokenizer::Token,
};

use crate::{
    error::ExecError,
    executor::ondisk_pipeline::SortKey,
    expression::{BinaryOp, Expression},
    field::Field,
};

/// Parses `a, b DESC, (c + 1) * 2 ASC` into sort keys. A missing direction
/// means ascending.
pub fn parse_order_by(text: &str) -> Result<Vec<SortKey>, ExecError> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| ExecError::Parse(e.to_string()))?;
    let items = parser
        .parse_comma_separated(Parser::parse_order_by_expr)
        .map_err(|e| ExecError::Parse(e.to_string()))?;
    let rest = parser.peek_token();
    if rest.token != Token::EOF {
        return Err(ExecError::Parse(format!(
            "unexpected {} after sort keys",
            rest.token
        )));
    }
    items.into_iter().map(lower_order_by).collect()
}

fn lower_order_by(item: OrderByExpr) -> Result<SortKey, ExecError> {
    if item.nulls_first.is_some() {
        return Err(ExecError::Parse("NULLS FIRST/LAST is not supported".to_string()));
    }
    let expr = lower_expr(item.expr)?;
    Ok(SortKey {
        expr,
        asc: item.asc.unwrap_or(true),
    })
}

fn lower_expr(expr: ast::Expr) -> Result<Expression, ExecError> {
    match expr {
        ast::Expr::Identifier(ident) => Ok(Expression::Column(ident.value)),
        ast::Expr::CompoundIdentifier(parts) => Ok(Expression::Column(
            parts
                .into_iter()
                .map(|p| p.value)
                .collect::<Vec<_>>()
                .join("."),
        )),
        ast::Expr::Value(value) => lower_value(value).map(Expression::Literal),
        ast::Expr::Nested(inner) => lower_expr(*inner),
        ast::Expr::UnaryOp { op, expr } => match op {
            UnaryOperator::Minus => Ok(Expression::Negate(Box::new(lower_expr(*expr)?))),
            UnaryOperator::Plus => lower_expr(*expr),
            other => Err(ExecError::Parse(format!("unsupported operator {}", other))),
        },
        ast::Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Plus => BinaryOp::Add,
                BinaryOperator::Minus => BinaryOp::Sub,
                BinaryOperator::Multiply => BinaryOp::Mul,
                BinaryOperator::Divide => BinaryOp::Div,
                other => return Err(ExecError::Parse(format!("unsupported operator {}", other))),
            };
            Ok(Expression::binary(op, lower_expr(*left)?, lower_expr(*right)?))
        }
        other => Err(ExecError::Parse(format!("unsupported sort expression {}", other))),
    }
}

fn lower_value(value: Value) -> Result<Field, ExecError> {
    match value {
        Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Field::Int(i))
            } else {
                n.parse::<f64>()
                    .map(Field::Float)
                    .map_err(|_| ExecError::Parse(format!("bad number {}", n)))
            }
        }
        Value::SingleQuotedString(s) => Ok(Field::String(s)),
        other => Err(ExecError::Parse(format!("unsupported literal {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_plain_columns() {
        let keys = parse_order_by("a, T.b DESC, c ASC").unwrap();
        assert_eq!(
            keys,
            vec![
                SortKey::asc(Expression::column("a")),
                SortKey::desc(Expression::column("T.b")),
                SortKey::asc(Expression::column("c")),
            ]
        );
    }

    #[test]
    fn test_arithmetic() {
        let keys = parse_order_by("-(a + 2) * 1.5 desc").unwrap();
        let expected = Expression::binary(
            BinaryOp::Mul,
            Expression::Negate(Box::new(Expression::binary(
                BinaryOp::Add,
                Expression::column("a"),
                Expression::Literal(Field::Int(2)),
            ))),
            Expression::Literal(Field::Float(1.5)),
        );
        assert_eq!(keys, vec![SortKey::desc(expected)]);
    }

    #[rstest]
    #[case("")]
    #[case("a b")]
    #[case("a % 2")]
    #[case("a NULLS FIRST")]
    #[case("upper(a)")]
    fn test_rejected(#[case] text: &str) {
        assert!(matches!(parse_order_by(text), Err(ExecError::Parse(_))));
    }
}
