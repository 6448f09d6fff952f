//! Filter executor for restrictions the remote cannot evaluate.

use super::{BoxedExecutor, Executor};
use crate::expression::Expression;
use common::tuple::{Schema, Tuple, Value};
use common::Result;

/// Filter executor that applies a predicate to tuples.
///
/// Returns only tuples for which the predicate evaluates to TRUE.
pub struct FilterExecutor {
    child: BoxedExecutor,
    predicate: Expression,
}

impl FilterExecutor {
    /// `predicate` must be bound to the child's schema.
    pub fn new(child: BoxedExecutor, predicate: Expression) -> Self {
        Self { child, predicate }
    }
}

impl Executor for FilterExecutor {
    fn schema(&self) -> &Schema {
        self.child.schema()
    }

    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next()? {
            // NULL and FALSE both reject the row.
            if self.predicate.evaluate(&tuple)? == Value::Bool(true) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::collect_results;
    use crate::expression::{col, lit};
    use common::tuple::{Column, Type};

    /// Yields a fixed list of tuples.
    struct ValuesExecutor {
        schema: Schema,
        rows: Vec<Tuple>,
        pos: usize,
    }

    impl Executor for ValuesExecutor {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn init(&mut self) -> Result<()> {
            self.pos = 0;
            Ok(())
        }

        fn next(&mut self) -> Result<Option<Tuple>> {
            let row = self.rows.get(self.pos).cloned();
            self.pos += 1;
            Ok(row)
        }
    }

    #[test]
    fn test_filter_executor() {
        let schema = Schema::new(vec![Column::new("id", Type::Integer), Column::new("age", Type::Integer)]);
        let rows = vec![
            Tuple::new(vec![Value::Integer(1), Value::Integer(25)]),
            Tuple::new(vec![Value::Integer(2), Value::Null]),
            Tuple::new(vec![Value::Integer(3), Value::Integer(20)]),
            Tuple::new(vec![Value::Integer(4), Value::Integer(30)]),
        ];
        let predicate = col("age").gt(lit(22)).bind(&schema).unwrap();
        let child = Box::new(ValuesExecutor {
            schema,
            rows,
            pos: 0,
        });

        let mut filter = FilterExecutor::new(child, predicate);
        let results = collect_results(&mut filter).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].values[0], Value::Integer(1));
        assert_eq!(results[1].values[0], Value::Integer(4));

        filter.reset().unwrap();
        assert_eq!(filter.next().unwrap().unwrap().values[0], Value::Integer(1));
    }
}
