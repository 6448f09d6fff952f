//! Scan predicates over foreign-table columns.
//!
//! Provides a fluent API for building expressions like `col("id").eq(lit(42))`.
//! A predicate can be evaluated locally against a tuple, or rendered as remote
//! SQL with [`Expression::deparse`] so the remote engine filters rows before
//! they are shipped.

use crate::deparse;
use common::tuple::{Schema, Tuple, Value};
use common::{BridgeError, Result};
use std::cmp::Ordering;

/// An expression that can be evaluated against a tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Reference to a column by name
    Column(String),
    /// Reference to a column by index (after binding)
    BoundColumn(usize),
    Literal(Value),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
}

impl BinaryOperator {
    fn sql(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    IsNull,
    IsNotNull,
}

impl Expression {
    /// Binds column names to column indices based on a schema.
    pub fn bind(&self, schema: &Schema) -> Result<Expression> {
        match self {
            Expression::Column(name) => {
                let index = schema.index_of(name).ok_or_else(|| {
                    BridgeError::InvalidState(format!("column \"{}\" not found", name))
                })?;
                Ok(Expression::BoundColumn(index))
            }
            Expression::BoundColumn(_) | Expression::Literal(_) => Ok(self.clone()),
            Expression::BinaryOp { left, op, right } => Ok(Expression::BinaryOp {
                left: Box::new(left.bind(schema)?),
                op: *op,
                right: Box::new(right.bind(schema)?),
            }),
            Expression::UnaryOp { op, expr } => Ok(Expression::UnaryOp {
                op: *op,
                expr: Box::new(expr.bind(schema)?),
            }),
        }
    }

    /// Names of the columns this expression reads.
    pub fn columns(&self, schema: &Schema) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(schema, &mut out);
        out
    }

    fn collect_columns(&self, schema: &Schema, out: &mut Vec<String>) {
        let name = match self {
            Expression::Column(name) => Some(name.clone()),
            Expression::BoundColumn(i) => schema.columns.get(*i).map(|c| c.name.clone()),
            Expression::Literal(_) => None,
            Expression::BinaryOp { left, right, .. } => {
                left.collect_columns(schema, out);
                right.collect_columns(schema, out);
                None
            }
            Expression::UnaryOp { expr, .. } => {
                expr.collect_columns(schema, out);
                None
            }
        };
        if let Some(name) = name {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }

    /// Renders this expression as remote SQL, or `None` when some part of it
    /// cannot be evaluated remotely with the same result.
    pub fn deparse(&self, schema: &Schema) -> Option<String> {
        match self {
            Expression::Column(name) => {
                schema.index_of(name)?;
                Some(deparse::quote_identifier(name))
            }
            Expression::BoundColumn(i) => schema
                .columns
                .get(*i)
                .map(|c| deparse::quote_identifier(&c.name)),
            // Binary strings compare differently once sent as literals.
            Expression::Literal(Value::Bytea(_)) => None,
            Expression::Literal(v) => Some(deparse::literal(v)),
            Expression::BinaryOp { left, op, right } => Some(format!(
                "({} {} {})",
                left.deparse(schema)?,
                op.sql(),
                right.deparse(schema)?
            )),
            Expression::UnaryOp { op, expr } => {
                let inner = expr.deparse(schema)?;
                Some(match op {
                    UnaryOperator::Not => format!("(NOT {})", inner),
                    UnaryOperator::IsNull => format!("({} IS NULL)", inner),
                    UnaryOperator::IsNotNull => format!("({} IS NOT NULL)", inner),
                })
            }
        }
    }

    /// Evaluates the expression against a tuple.
    pub fn evaluate(&self, tuple: &Tuple) -> Result<Value> {
        match self {
            Expression::Column(name) => Err(BridgeError::InvalidState(format!(
                "unbound column: {}. Call bind() first.",
                name
            ))),
            Expression::BoundColumn(index) => tuple.values.get(*index).cloned().ok_or_else(|| {
                BridgeError::InvalidState(format!("column index {} out of bounds", index))
            }),
            Expression::Literal(val) => Ok(val.clone()),
            Expression::BinaryOp { left, op, right } => {
                let left_val = left.evaluate(tuple)?;
                let right_val = right.evaluate(tuple)?;
                evaluate_binary_op(&left_val, *op, &right_val)
            }
            Expression::UnaryOp { op, expr } => {
                let val = expr.evaluate(tuple)?;
                evaluate_unary_op(*op, &val)
            }
        }
    }

    pub fn eq(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::Eq, other)
    }

    pub fn not_eq(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::NotEq, other)
    }

    pub fn lt(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::Lt, other)
    }

    pub fn lt_eq(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::LtEq, other)
    }

    pub fn gt(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::Gt, other)
    }

    pub fn gt_eq(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::GtEq, other)
    }

    pub fn and(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::And, other)
    }

    pub fn or(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::Or, other)
    }

    pub fn add(self, other: Expression) -> Expression {
        self.binary(BinaryOperator::Add, other)
    }

    pub fn is_null(self) -> Expression {
        Expression::UnaryOp {
            op: UnaryOperator::IsNull,
            expr: Box::new(self),
        }
    }

    pub fn is_not_null(self) -> Expression {
        Expression::UnaryOp {
            op: UnaryOperator::IsNotNull,
            expr: Box::new(self),
        }
    }

    fn binary(self, op: BinaryOperator, other: Expression) -> Expression {
        Expression::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }
}

fn compare_with(left: &Value, right: &Value, accept: fn(Ordering) -> bool) -> Value {
    match left.compare(right) {
        Some(ordering) => Value::Bool(accept(ordering)),
        None => Value::Null,
    }
}

fn evaluate_binary_op(left: &Value, op: BinaryOperator, right: &Value) -> Result<Value> {
    use BinaryOperator::*;
    let mismatch = |verb: &str| {
        BridgeError::type_mismatch("expression", format!("cannot {} {:?} and {:?}", verb, left, right))
    };
    match op {
        Add => left.add(right).ok_or_else(|| mismatch("add")),
        Subtract => left.subtract(right).ok_or_else(|| mismatch("subtract")),
        Multiply => left.multiply(right).ok_or_else(|| mismatch("multiply")),
        Eq => Ok(compare_with(left, right, |o| o == Ordering::Equal)),
        NotEq => Ok(compare_with(left, right, |o| o != Ordering::Equal)),
        Lt => Ok(compare_with(left, right, |o| o == Ordering::Less)),
        LtEq => Ok(compare_with(left, right, |o| o != Ordering::Greater)),
        Gt => Ok(compare_with(left, right, |o| o == Ordering::Greater)),
        GtEq => Ok(compare_with(left, right, |o| o != Ordering::Less)),
        // Three-valued logic: FALSE dominates AND, TRUE dominates OR.
        And => match (left, right) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Ok(Value::Bool(false)),
            (Value::Bool(true), Value::Bool(true)) => Ok(Value::Bool(true)),
            _ => Ok(Value::Null),
        },
        Or => match (left, right) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Ok(Value::Bool(true)),
            (Value::Bool(false), Value::Bool(false)) => Ok(Value::Bool(false)),
            _ => Ok(Value::Null),
        },
    }
}

fn evaluate_unary_op(op: UnaryOperator, val: &Value) -> Result<Value> {
    match op {
        UnaryOperator::Not => match val {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Null => Ok(Value::Null),
            _ => Err(BridgeError::type_mismatch(
                "expression",
                format!("cannot apply NOT to {:?}", val),
            )),
        },
        UnaryOperator::IsNull => Ok(Value::Bool(val.is_null())),
        UnaryOperator::IsNotNull => Ok(Value::Bool(!val.is_null())),
    }
}

/// Creates a column reference expression.
pub fn col(name: &str) -> Expression {
    Expression::Column(name.to_string())
}

/// Creates a literal integer expression.
pub fn lit(value: i32) -> Expression {
    Expression::Literal(Value::Integer(value))
}

pub fn lit_str(value: &str) -> Expression {
    Expression::Literal(Value::Varchar(value.to_string()))
}

pub fn lit_value(value: Value) -> Expression {
    Expression::Literal(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tuple::{Column, Type};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", Type::Integer),
            Column::new("name", Type::Varchar(50)),
        ])
    }

    #[test]
    fn test_expression_binding() {
        let bound = col("id").eq(lit(42)).bind(&schema()).unwrap();
        match bound {
            Expression::BinaryOp { left, .. } => assert_eq!(*left, Expression::BoundColumn(0)),
            _ => panic!("Expected BinaryOp"),
        }
        assert!(col("missing").bind(&schema()).is_err());
    }

    #[test]
    fn test_expression_evaluation() {
        let tuple = Tuple::new(vec![Value::Integer(42), Value::Varchar("Alice".to_string())]);

        let expr = Expression::BoundColumn(0).eq(lit(42));
        assert_eq!(expr.evaluate(&tuple).unwrap(), Value::Bool(true));

        let expr = Expression::BoundColumn(0).gt(lit(50));
        assert_eq!(expr.evaluate(&tuple).unwrap(), Value::Bool(false));

        let expr = Expression::BoundColumn(0).add(lit(5));
        assert_eq!(expr.evaluate(&tuple).unwrap(), Value::BigInt(47));
    }

    #[test]
    fn test_null_logic() {
        let tuple = Tuple::new(vec![Value::Null, Value::Varchar("x".to_string())]);
        let unknown = Expression::BoundColumn(0).eq(lit(1));
        assert_eq!(unknown.evaluate(&tuple).unwrap(), Value::Null);
        let expr = unknown.clone().and(Expression::BoundColumn(1).eq(lit_str("y")));
        assert_eq!(expr.evaluate(&tuple).unwrap(), Value::Bool(false));
        let expr = unknown.or(Expression::BoundColumn(1).eq(lit_str("x")));
        assert_eq!(expr.evaluate(&tuple).unwrap(), Value::Bool(true));
        let expr = Expression::BoundColumn(0).is_null();
        assert_eq!(expr.evaluate(&tuple).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_deparse() {
        let expr = col("id").gt(lit(10)).and(col("name").is_not_null());
        assert_eq!(
            expr.deparse(&schema()).unwrap(),
            "((`id` > 10) AND (`name` IS NOT NULL))"
        );
        let bound = expr.bind(&schema()).unwrap();
        assert_eq!(bound.deparse(&schema()), expr.deparse(&schema()));
        assert_eq!(
            col("name").eq(lit_value(Value::Bytea(vec![1]))).deparse(&schema()),
            None
        );
        assert_eq!(col("other").eq(lit(1)).deparse(&schema()), None);
    }

    #[test]
    fn test_columns() {
        let expr = col("name").eq(lit_str("a")).or(col("id").gt(col("id")));
        assert_eq!(expr.columns(&schema()), vec!["name".to_string(), "id".to_string()]);
    }
}
