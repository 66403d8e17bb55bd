//! Row-value model shared by the WAL codec, the catalog, and replay.

use serde::{Deserialize, Serialize};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Varchar(String),
}

impl Value {
    /// Stable wire tag for the WAL codec.
    #[must_use]
    pub const fn type_tag(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Integer(_) => 1,
            Self::Float(_) => 2,
            Self::Varchar(_) => 3,
        }
    }

    /// Text payload, if this is a varchar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Varchar(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Logical column type recorded in table definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Float,
    Varchar,
}

/// A column-major batch of rows, as carried by an `Append` command.
///
/// All columns hold exactly `row_count()` values; the constructor enforces
/// the rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    columns: Vec<Vec<Value>>,
}

impl DataBlock {
    /// Build a block from column vectors. Returns `None` if the columns are
    /// ragged or empty.
    #[must_use]
    pub fn new(columns: Vec<Vec<Value>>) -> Option<Self> {
        let first = columns.first()?.len();
        if columns.iter().any(|c| c.len() != first) {
            return None;
        }
        Some(Self { columns })
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.columns.first().map_or(0, |c| c.len() as u64)
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column vector by position.
    #[must_use]
    pub fn column(&self, idx: usize) -> Option<&[Value]> {
        self.columns.get(idx).map(Vec::as_slice)
    }

    /// All column vectors.
    #[must_use]
    pub fn columns(&self) -> &[Vec<Value>] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_block_rejects_ragged_columns() {
        let cols = vec![
            vec![Value::Integer(1), Value::Integer(2)],
            vec![Value::Varchar("only one".to_owned())],
        ];
        assert!(DataBlock::new(cols).is_none());
    }

    #[test]
    fn data_block_shape() {
        let block = DataBlock::new(vec![
            vec![Value::Integer(1), Value::Integer(2)],
            vec![
                Value::Varchar("a".to_owned()),
                Value::Varchar("b".to_owned()),
            ],
        ])
        .expect("rectangular block");
        assert_eq!(block.row_count(), 2);
        assert_eq!(block.column_count(), 2);
        assert_eq!(block.column(1).and_then(|c| c[1].as_str()), Some("b"));
    }

    #[test]
    fn value_tags_are_stable() {
        assert_eq!(Value::Null.type_tag(), 0);
        assert_eq!(Value::Integer(0).type_tag(), 1);
        assert_eq!(Value::Float(0.0).type_tag(), 2);
        assert_eq!(Value::Varchar(String::new()).type_tag(), 3);
    }
}
