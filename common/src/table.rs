//! Defines the row identifier the host supplies for UPDATE and DELETE.

use crate::api::{BridgeError, Result};
use crate::tuple::{Schema, Tuple, Value};

/// Identifies one remote row by the values of its key columns.
///
/// The remote engine has no physical row address, so the host fetches the key
/// columns as hidden columns during the scan and hands them back here.
#[derive(Debug, Clone, PartialEq)]
pub struct RowId {
    pub keys: Vec<(String, Value)>,
}

impl RowId {
    pub fn new(keys: Vec<(String, Value)>) -> Self {
        Self { keys }
    }

    /// Builds a row id by picking `key_columns` out of a scanned tuple.
    ///
    /// NULL keys are rejected since they can never match a remote row.
    pub fn from_tuple(schema: &Schema, tuple: &Tuple, key_columns: &[String]) -> Result<Self> {
        if key_columns.is_empty() {
            return Err(BridgeError::InvalidState(
                "table has no key columns to identify rows".to_string(),
            ));
        }
        let mut keys = Vec::with_capacity(key_columns.len());
        for name in key_columns {
            let index = schema.index_of(name).ok_or_else(|| {
                BridgeError::InvalidState(format!("key column \"{}\" is not in the row", name))
            })?;
            let value = tuple.values.get(index).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                return Err(BridgeError::InvalidState(format!(
                    "key column \"{}\" is NULL",
                    name
                )));
            }
            keys.push((name.clone(), value));
        }
        Ok(Self { keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Column, Type};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::not_null("id", Type::BigInt),
            Column::new("name", Type::Text),
        ])
    }

    #[test]
    fn test_row_id_from_tuple() {
        let tuple = Tuple::new(vec![Value::BigInt(7), Value::Varchar("x".into())]);
        let row_id = RowId::from_tuple(&schema(), &tuple, &["id".to_string()]).unwrap();
        assert_eq!(row_id.keys, vec![("id".to_string(), Value::BigInt(7))]);
    }

    #[test]
    fn test_row_id_rejects_null_and_missing_keys() {
        let tuple = Tuple::new(vec![Value::Null, Value::Varchar("x".into())]);
        assert!(RowId::from_tuple(&schema(), &tuple, &["id".to_string()]).is_err());
        assert!(RowId::from_tuple(&schema(), &tuple, &["nope".to_string()]).is_err());
        assert!(RowId::from_tuple(&schema(), &tuple, &[]).is_err());
    }
}
