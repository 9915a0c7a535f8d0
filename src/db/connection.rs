use std::io::{self, Read};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::db::error::DriverError;
use crate::db::query::{ColumnInfo, StatementKind};
use crate::db::value::{SqlType, Value};

pub type DriverResult<T> = Result<T, DriverError>;

/// Transaction isolation levels, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransactionIsolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TransactionIsolation {
    pub fn sql_name(&self) -> &'static str {
        match self {
            TransactionIsolation::ReadUncommitted => "READ UNCOMMITTED",
            TransactionIsolation::ReadCommitted => "READ COMMITTED",
            TransactionIsolation::RepeatableRead => "REPEATABLE READ",
            TransactionIsolation::Serializable => "SERIALIZABLE",
        }
    }
}

/// Which generated keys an insert should report back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeneratedKeys {
    #[default]
    None,
    All,
    Columns(Vec<String>),
    Indices(Vec<usize>),
}

impl GeneratedKeys {
    pub fn is_requested(&self) -> bool {
        !matches!(self, GeneratedKeys::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub id: u32,
    pub name: String,
}

/// A live database connection as seen by the query layer.
///
/// Statements produced by `prepare` must keep whatever they need from the
/// connection alive on their own; the query layer may drop the connection
/// handle while a cursor over one of its statements is still open.
pub trait Connection {
    type Statement: Statement;

    fn is_closed(&self) -> bool;

    fn prepare(
        &self,
        sql: &str,
        kind: StatementKind,
        keys: &GeneratedKeys,
    ) -> DriverResult<Self::Statement>;

    fn auto_commit(&self) -> DriverResult<bool>;
    fn set_auto_commit(&self, enabled: bool) -> DriverResult<()>;

    fn isolation(&self) -> DriverResult<TransactionIsolation>;
    fn set_isolation(&self, level: TransactionIsolation) -> DriverResult<()>;
    fn supports_isolation(&self, level: TransactionIsolation) -> bool;

    fn supports_batch_updates(&self) -> bool {
        false
    }

    fn set_savepoint(&self) -> DriverResult<Savepoint>;
    fn rollback_to(&self, savepoint: &Savepoint) -> DriverResult<()>;
    fn release_savepoint(&self, savepoint: &Savepoint) -> DriverResult<()>;
    fn commit(&self) -> DriverResult<()>;
}

/// A prepared (or callable) statement. Positions are 1-based.
pub trait Statement {
    type Cursor: Cursor;

    fn bind(&mut self, position: usize, value: &Value) -> DriverResult<()>;

    fn register_out(&mut self, _position: usize, _sql_type: SqlType) -> DriverResult<()> {
        Err(DriverError::unsupported("OUT parameter registration"))
    }

    fn set_timeout(&mut self, _timeout: Duration) -> DriverResult<()> {
        Err(DriverError::unsupported("statement timeout"))
    }

    fn set_poolable(&mut self, _poolable: bool) -> DriverResult<()> {
        Err(DriverError::unsupported("statement pooling hint"))
    }

    fn set_escape_processing(&mut self, _enabled: bool) -> DriverResult<()> {
        Err(DriverError::unsupported("escape processing"))
    }

    fn set_fetch_size(&mut self, _rows: u32) -> DriverResult<()> {
        Err(DriverError::unsupported("fetch size"))
    }

    fn set_max_rows(&mut self, _rows: u64) -> DriverResult<()> {
        Err(DriverError::unsupported("max rows"))
    }

    /// Executes the statement; `true` when the first result is a result set.
    fn execute(&mut self) -> DriverResult<bool>;

    fn execute_update(&mut self) -> DriverResult<i32>;

    fn execute_large_update(&mut self) -> DriverResult<i64> {
        self.execute_update().map(i64::from)
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        Err(DriverError::unsupported("batch updates"))
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i32>> {
        Err(DriverError::unsupported("batch updates"))
    }

    fn execute_large_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.execute_batch()
            .map(|counts| counts.into_iter().map(i64::from).collect())
    }

    /// Cursor over the current result, if the current result is a result set.
    fn result_cursor(&mut self) -> DriverResult<Option<Self::Cursor>>;

    /// Moves to the next result set, skipping update counts. `false` once no
    /// result sets remain.
    fn more_results(&mut self) -> DriverResult<bool> {
        Ok(false)
    }

    fn generated_keys(&mut self) -> DriverResult<Self::Cursor> {
        Err(DriverError::unsupported("generated keys"))
    }

    fn out_value(&self, _position: usize, _sql_type: SqlType) -> DriverResult<Value> {
        Err(DriverError::unsupported("OUT parameter retrieval"))
    }

    fn close(&mut self) -> DriverResult<()>;
}

/// Forward-only cursor over one result set. Column indices are 1-based.
///
/// Only `columns`, `next`, `get_object` and `close` are required; the typed
/// accessors convert the opaque value unless a driver has a better way.
pub trait Cursor {
    fn columns(&self) -> DriverResult<Vec<ColumnInfo>>;

    /// Moves to the next row; `false` once the result set is exhausted.
    fn next(&mut self) -> DriverResult<bool>;

    fn get_object(&self, index: usize) -> DriverResult<Value>;

    fn get_bytes(&self, index: usize) -> DriverResult<Option<Vec<u8>>> {
        self.get_object(index)?.to_bytes()
    }

    fn get_binary_stream(&self, index: usize) -> DriverResult<Option<Box<dyn Read + '_>>> {
        Ok(self
            .get_bytes(index)?
            .map(|bytes| Box::new(io::Cursor::new(bytes)) as Box<dyn Read + '_>))
    }

    fn get_text(&self, index: usize) -> DriverResult<Option<String>> {
        self.get_object(index)?.to_text()
    }

    fn get_character_stream(&self, index: usize) -> DriverResult<Option<Box<dyn Read + '_>>> {
        Ok(self
            .get_text(index)?
            .map(|text| Box::new(io::Cursor::new(text.into_bytes())) as Box<dyn Read + '_>))
    }

    fn get_bool(&self, index: usize) -> DriverResult<Option<bool>> {
        self.get_object(index)?.to_bool()
    }

    fn get_i64(&self, index: usize) -> DriverResult<Option<i64>> {
        self.get_object(index)?.to_i64()
    }

    fn get_f64(&self, index: usize) -> DriverResult<Option<f64>> {
        self.get_object(index)?.to_f64()
    }

    fn get_decimal(&self, index: usize) -> DriverResult<Option<String>> {
        self.get_object(index)?.to_decimal()
    }

    fn get_date(&self, index: usize) -> DriverResult<Option<NaiveDate>> {
        self.get_object(index)?.to_date()
    }

    fn get_time(&self, index: usize) -> DriverResult<Option<NaiveTime>> {
        self.get_object(index)?.to_time()
    }

    fn get_timestamp(&self, index: usize) -> DriverResult<Option<NaiveDateTime>> {
        self.get_object(index)?.to_timestamp()
    }

    fn close(&mut self) -> DriverResult<()>;
}

/// Source of connections for a `Db`.
pub trait ConnectionProvider {
    type Connection: Connection;

    fn acquire(&self) -> DriverResult<Self::Connection>;
}

impl<F, C> ConnectionProvider for F
where
    F: Fn() -> DriverResult<C>,
    C: Connection,
{
    type Connection = C;

    fn acquire(&self) -> DriverResult<C> {
        self()
    }
}

/// Hands out clones of one shared connection handle.
#[derive(Debug, Clone)]
pub struct SingleConnection<C>(pub C);

impl<C: Connection + Clone> ConnectionProvider for SingleConnection<C> {
    type Connection = C;

    fn acquire(&self) -> DriverResult<C> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockCursor;
    use crate::db::query::{ExecOptions, QueryExecutor};

    /// Implements only the required statement methods.
    struct BareStatement;

    impl Statement for BareStatement {
        type Cursor = MockCursor;

        fn bind(&mut self, _position: usize, _value: &Value) -> DriverResult<()> {
            Ok(())
        }

        fn execute(&mut self) -> DriverResult<bool> {
            Ok(false)
        }

        fn execute_update(&mut self) -> DriverResult<i32> {
            Ok(0)
        }

        fn result_cursor(&mut self) -> DriverResult<Option<MockCursor>> {
            Ok(None)
        }

        fn close(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    #[test]
    fn optional_statement_methods_default_to_unsupported() {
        let mut statement = BareStatement;
        assert!(statement.register_out(1, SqlType::Integer).unwrap_err().is_unsupported());
        assert!(statement.set_timeout(Duration::from_secs(1)).unwrap_err().is_unsupported());
        assert!(statement.set_poolable(true).unwrap_err().is_unsupported());
        assert!(statement.set_escape_processing(false).unwrap_err().is_unsupported());
        assert!(statement.set_fetch_size(10).unwrap_err().is_unsupported());
        assert!(statement.set_max_rows(10).unwrap_err().is_unsupported());
        assert!(statement.add_batch().unwrap_err().is_unsupported());
        assert!(statement.execute_large_batch().unwrap_err().is_unsupported());
        assert!(statement.out_value(1, SqlType::Integer).unwrap_err().is_unsupported());
        assert!(!statement.more_results().unwrap());
        assert_eq!(statement.execute_large_update().unwrap(), 0);
    }

    #[test]
    fn unsupported_settings_are_skipped_when_applying_options() {
        let options = ExecOptions {
            timeout: Some(Duration::from_secs(3)),
            fetch_size: Some(50),
            max_rows: Some(5),
            ..ExecOptions::default()
        };
        assert!(QueryExecutor::apply_options(&mut BareStatement, &options).is_ok());
    }
}
