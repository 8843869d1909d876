//! Structured store abstraction.
//!
//! The dumper and loader only see [`StructuredStore`]; the job engine gets
//! fresh connections from a [`StoreConnector`] so every job owns its own
//! handle on its own thread.

mod sqlite;

pub use sqlite::{SqliteConnector, SqliteStore};

use crate::error::Result;
use std::fmt::Write as _;

/// A scalar value read from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Text whose bytes are not valid UTF-8
    TextBytes(Vec<u8>),
    Blob(Vec<u8>),
}

/// Connection to a record-oriented store.
pub trait StructuredStore: Send {
    /// Version string of the store engine, recorded in manifests
    fn platform_version(&self) -> String;

    /// Table names in the store's native enumeration order.
    ///
    /// The order is whatever the store reports and is not guaranteed to be
    /// stable between runs.
    fn tables(&self) -> Result<Vec<String>>;

    /// Statement recreating the table's schema, without a trailing `;`
    fn table_definition(&self, table: &str) -> Result<String>;

    /// Statements recreating secondary objects (indexes, triggers) of a table
    fn table_extras(&self, _table: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Streams every row of `table` in native retrieval order, returning
    /// the number of rows visited.
    fn for_each_row(
        &self,
        table: &str,
        f: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<u64>;

    /// Executes one statement.
    fn execute(&mut self, statement: &str) -> Result<()>;

    /// Quotes an identifier for the store's statement syntax.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Renders a value as a literal for the store's statement syntax.
    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) if r.is_nan() => "NULL".to_string(),
            Value::Real(r) if r.is_infinite() => {
                if *r > 0.0 {
                    "9e999".to_string()
                } else {
                    "-9e999".to_string()
                }
            }
            Value::Real(r) => format!("{:?}", r),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::TextBytes(bytes) => format!("CAST({} AS TEXT)", hex_literal(bytes)),
            Value::Blob(bytes) => hex_literal(bytes),
        }
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2 + 3);
    hex.push_str("X'");
    for b in bytes {
        let _ = write!(hex, "{:02X}", b);
    }
    hex.push('\'');
    hex
}

/// Opens connections to the site's structured store.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn StructuredStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl StructuredStore for Dummy {
        fn platform_version(&self) -> String {
            "0".to_string()
        }
        fn tables(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn table_definition(&self, _table: &str) -> Result<String> {
            Ok(String::new())
        }
        fn for_each_row(
            &self,
            _table: &str,
            _f: &mut dyn FnMut(&[Value]) -> Result<()>,
        ) -> Result<u64> {
            Ok(0)
        }
        fn execute(&mut self, _statement: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_render_literals() {
        let store = Dummy;
        assert_eq!(store.render_literal(&Value::Null), "NULL");
        assert_eq!(store.render_literal(&Value::Integer(-42)), "-42");
        assert_eq!(store.render_literal(&Value::Real(1.5)), "1.5");
        assert_eq!(store.render_literal(&Value::Real(2.0)), "2.0");
        assert_eq!(store.render_literal(&Value::Real(f64::INFINITY)), "9e999");
        assert_eq!(
            store.render_literal(&Value::Text("it's".to_string())),
            "'it''s'"
        );
        assert_eq!(
            store.render_literal(&Value::Blob(vec![0x00, 0xAB, 0xFF])),
            "X'00ABFF'"
        );
        assert_eq!(
            store.render_literal(&Value::TextBytes(vec![0xFF, 0x41])),
            "CAST(X'FF41' AS TEXT)"
        );
    }

    #[test]
    fn test_quote_identifier() {
        let store = Dummy;
        assert_eq!(store.quote_identifier("posts"), "\"posts\"");
        assert_eq!(store.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
