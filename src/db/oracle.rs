//! Oracle adapter for the driver boundary, built on the `oracle` crate.
//!
//! Result sets are streamed: each cursor owns its `ResultSet` and fetches a
//! row per `next`. Implicit results (`DBMS_SQL.RETURN_RESULT`) become the
//! result sets of a procedure call and are opened one at a time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use oracle::sql_type::{FromSql, OracleType, ToSql};
use oracle::{ResultSet, Row};
use serde::{Deserialize, Serialize};

use crate::db::connection::{
    Connection, ConnectionProvider, Cursor, DriverResult, GeneratedKeys, Savepoint, Statement,
    TransactionIsolation,
};
use crate::db::error::DriverError;
use crate::db::query::{ColumnInfo, StatementKind};
use crate::db::value::{SqlType, Value};

const VARCHAR_OUT_SIZE: u32 = 32767;

impl From<oracle::Error> for DriverError {
    fn from(err: oracle::Error) -> Self {
        DriverError::with_source(err.to_string(), err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub service_name: String,
}

impl ConnectionInfo {
    pub fn new(
        name: &str,
        username: &str,
        password: &str,
        host: &str,
        port: u16,
        service_name: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            service_name: service_name.to_string(),
        }
    }

    pub fn connection_string(&self) -> String {
        format!("//{}:{}/{}", self.host, self.port, self.service_name)
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} ({}@{}:{}/{})",
            self.name, self.username, self.host, self.port, self.service_name
        )
    }

    pub fn connect(&self) -> DriverResult<OracleConnection> {
        let conn_str = self.connection_string();
        let connection = oracle::Connection::connect(&self.username, &self.password, &conn_str)
            .map_err(|err| {
                log::error!("Connection error for {}: {err}", self.display_string());
                DriverError::from(err)
            })?;
        apply_default_session_settings(&connection);
        log::info!("Connected to {}", self.display_string());
        Ok(OracleConnection::new(connection))
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: String::new(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 1521,
            service_name: "ORCL".to_string(),
        }
    }
}

/// Opens a fresh connection per acquisition.
impl ConnectionProvider for ConnectionInfo {
    type Connection = OracleConnection;

    fn acquire(&self) -> DriverResult<OracleConnection> {
        self.connect()
    }
}

fn apply_default_session_settings(conn: &oracle::Connection) {
    let statements = [
        "ALTER SESSION SET NLS_TIMESTAMP_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
        "ALTER SESSION SET NLS_DATE_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
    ];

    for statement in statements {
        if let Err(err) = conn.execute(statement, &[]) {
            log::warn!("Failed to apply default session setting `{statement}`: {err}");
        }
    }
}

#[derive(Debug)]
struct SessionState {
    auto_commit: bool,
    isolation: TransactionIsolation,
    next_savepoint: u32,
    closed: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            auto_commit: true,
            isolation: TransactionIsolation::ReadCommitted,
            next_savepoint: 1,
            closed: false,
        }
    }
}

fn lock_session(session: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Oracle session lock was poisoned; recovering.");
            poisoned.into_inner()
        }
    }
}

/// Shared handle to one Oracle session. Clones talk to the same session.
#[derive(Clone)]
pub struct OracleConnection {
    inner: Arc<oracle::Connection>,
    session: Arc<Mutex<SessionState>>,
}

impl OracleConnection {
    pub fn new(connection: oracle::Connection) -> Self {
        Self {
            inner: Arc::new(connection),
            session: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn close(&self) -> DriverResult<()> {
        let mut session = lock_session(&self.session);
        if session.closed {
            return Ok(());
        }
        session.closed = true;
        Ok(self.inner.close()?)
    }
}

impl Connection for OracleConnection {
    type Statement = OracleStatement;

    fn is_closed(&self) -> bool {
        lock_session(&self.session).closed
    }

    fn prepare(
        &self,
        sql: &str,
        kind: StatementKind,
        keys: &GeneratedKeys,
    ) -> DriverResult<OracleStatement> {
        if keys.is_requested() {
            return Err(DriverError::unsupported("generated keys"));
        }
        Ok(OracleStatement {
            conn: Arc::clone(&self.inner),
            session: Arc::clone(&self.session),
            sql: sql.to_string(),
            kind,
            binds: BTreeMap::new(),
            timeout: None,
            fetch_size: None,
            max_rows: None,
            stmt: None,
            current: None,
        })
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        Ok(lock_session(&self.session).auto_commit)
    }

    fn set_auto_commit(&self, enabled: bool) -> DriverResult<()> {
        let mut session = lock_session(&self.session);
        if enabled && !session.auto_commit {
            self.inner.commit()?;
        }
        session.auto_commit = enabled;
        Ok(())
    }

    fn isolation(&self) -> DriverResult<TransactionIsolation> {
        Ok(lock_session(&self.session).isolation)
    }

    fn set_isolation(&self, level: TransactionIsolation) -> DriverResult<()> {
        if !self.supports_isolation(level) {
            return Err(DriverError::unsupported(level.sql_name()));
        }
        let sql = format!("ALTER SESSION SET ISOLATION_LEVEL = {}", level.sql_name());
        self.inner.execute(&sql, &[])?;
        lock_session(&self.session).isolation = level;
        Ok(())
    }

    fn supports_isolation(&self, level: TransactionIsolation) -> bool {
        matches!(
            level,
            TransactionIsolation::ReadCommitted | TransactionIsolation::Serializable
        )
    }

    fn set_savepoint(&self) -> DriverResult<Savepoint> {
        let id = {
            let mut session = lock_session(&self.session);
            let id = session.next_savepoint;
            session.next_savepoint += 1;
            id
        };
        let savepoint = Savepoint {
            id,
            name: format!("SP_{id}"),
        };
        self.inner
            .execute(&format!("SAVEPOINT {}", savepoint.name), &[])?;
        Ok(savepoint)
    }

    fn rollback_to(&self, savepoint: &Savepoint) -> DriverResult<()> {
        self.inner
            .execute(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name), &[])?;
        Ok(())
    }

    // Oracle releases savepoints at commit or rollback.
    fn release_savepoint(&self, _savepoint: &Savepoint) -> DriverResult<()> {
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        Ok(self.inner.commit()?)
    }
}

#[derive(Debug, Clone, Default)]
struct PendingBind {
    value: Option<Value>,
    out: Option<SqlType>,
}

/// Statement over a shared session. The underlying cursor is opened on first
/// execution so fetch settings can still be applied. A query hands its
/// statement over to the result set it opens.
pub struct OracleStatement {
    conn: Arc<oracle::Connection>,
    session: Arc<Mutex<SessionState>>,
    sql: String,
    kind: StatementKind,
    binds: BTreeMap<usize, PendingBind>,
    timeout: Option<Duration>,
    fetch_size: Option<u32>,
    max_rows: Option<u64>,
    stmt: Option<oracle::Statement>,
    current: Option<OracleCursor>,
}

impl OracleStatement {
    fn bind_all(&self, stmt: &mut oracle::Statement) -> oracle::Result<()> {
        for (&position, bind) in &self.binds {
            match (&bind.value, bind.out) {
                (Some(value), None) => stmt.bind(position, to_sql(value).as_ref())?,
                (None, Some(sql_type)) => stmt.bind(position, &out_type(sql_type))?,
                (Some(Value::Null), Some(sql_type)) => stmt.bind(position, &out_type(sql_type))?,
                (Some(value), Some(sql_type)) => {
                    let text = value.to_string();
                    stmt.bind(position, &(&text, &out_type(sql_type)))?
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    /// Builds the statement on first use and applies the pending binds.
    fn open(&mut self) -> DriverResult<oracle::Statement> {
        let mut stmt = match self.stmt.take() {
            Some(stmt) => stmt,
            None => {
                let mut builder = self.conn.statement(&self.sql);
                if let Some(rows) = self.fetch_size {
                    builder.fetch_array_size(rows);
                }
                builder.build()?
            }
        };
        if let Err(err) = self.bind_all(&mut stmt) {
            self.stmt = Some(stmt);
            return Err(err.into());
        }
        Ok(stmt)
    }

    fn timed<T>(&self, op: impl FnOnce() -> oracle::Result<T>) -> DriverResult<T> {
        if let Some(timeout) = self.timeout {
            self.conn.set_call_timeout(Some(timeout))?;
        }
        let result = op();
        if self.timeout.is_some() {
            if let Err(err) = self.conn.set_call_timeout(None) {
                log::warn!("Failed to reset call timeout: {err}");
            }
        }
        Ok(result?)
    }

    fn call<T>(
        &mut self,
        op: impl FnOnce(&mut oracle::Statement) -> oracle::Result<T>,
    ) -> DriverResult<T> {
        let mut stmt = self.open()?;
        let result = self.timed(|| op(&mut stmt));
        self.stmt = Some(stmt);
        result
    }

    fn next_implicit_result(&mut self) -> DriverResult<Option<OracleCursor>> {
        let Some(stmt) = self.stmt.as_mut() else {
            return Ok(None);
        };
        match stmt.implicit_result()? {
            Some(cursor) => {
                let rows: ResultSet<'static, Row> = cursor.into_result_set()?;
                Ok(Some(OracleCursor::open(rows, self.max_rows)))
            }
            None => Ok(None),
        }
    }

    fn commit_if_auto(&self) -> DriverResult<()> {
        if lock_session(&self.session).auto_commit {
            self.conn.commit()?;
        }
        Ok(())
    }
}

impl Statement for OracleStatement {
    type Cursor = OracleCursor;

    fn bind(&mut self, position: usize, value: &Value) -> DriverResult<()> {
        self.binds.entry(position).or_default().value = Some(value.clone());
        Ok(())
    }

    fn register_out(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        if sql_type == SqlType::RefCursor {
            return Err(DriverError::unsupported("REF CURSOR OUT parameters"));
        }
        self.binds.entry(position).or_default().out = Some(sql_type);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.timeout = Some(timeout);
        Ok(())
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.fetch_size = Some(rows);
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()> {
        self.max_rows = Some(rows);
        Ok(())
    }

    fn execute(&mut self) -> DriverResult<bool> {
        let mut stmt = self.open()?;
        if self.kind == StatementKind::Select || stmt.is_query() {
            let rows: ResultSet<'static, Row> = self.timed(|| stmt.into_result_set(&[]))?;
            self.current = Some(OracleCursor::open(rows, self.max_rows));
            return Ok(true);
        }
        let executed = self.timed(|| stmt.execute(&[]));
        self.stmt = Some(stmt);
        executed?;
        self.commit_if_auto()?;
        self.current = self.next_implicit_result()?;
        Ok(self.current.is_some())
    }

    fn execute_update(&mut self) -> DriverResult<i32> {
        let count = self.execute_large_update()?;
        narrow_count(count, "i32")
    }

    fn execute_large_update(&mut self) -> DriverResult<i64> {
        let count = self.call(|stmt| {
            stmt.execute(&[])?;
            stmt.row_count()
        })?;
        self.commit_if_auto()?;
        narrow_count(count, "i64")
    }

    fn result_cursor(&mut self) -> DriverResult<Option<OracleCursor>> {
        Ok(self.current.take())
    }

    fn more_results(&mut self) -> DriverResult<bool> {
        self.current = self.next_implicit_result()?;
        Ok(self.current.is_some())
    }

    fn out_value(&self, position: usize, sql_type: SqlType) -> DriverResult<Value> {
        let Some(stmt) = self.stmt.as_ref() else {
            return Err(DriverError::new("Statement has not been executed"));
        };
        Ok(read_value(stmt, position, sql_type)?)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.current = None;
        match self.stmt.take() {
            Some(mut stmt) => Ok(stmt.close()?),
            None => Ok(()),
        }
    }
}

fn narrow_count<T: TryFrom<U>, U>(count: U, width: &str) -> DriverResult<T> {
    T::try_from(count).map_err(|_| DriverError::new(format!("Update count overflows {width}")))
}

/// A zero `max_rows` means no limit.
fn row_limit(max_rows: Option<u64>) -> Option<u64> {
    max_rows.filter(|rows| *rows > 0)
}

/// One open result set. Rows are fetched as the caller advances.
pub struct OracleCursor {
    columns: Vec<ColumnInfo>,
    rows: Option<ResultSet<'static, Row>>,
    current: Option<Row>,
    remaining: Option<u64>,
}

impl OracleCursor {
    fn open(rows: ResultSet<'static, Row>, max_rows: Option<u64>) -> Self {
        let columns = rows
            .column_info()
            .iter()
            .map(|col| ColumnInfo::new(col.name(), sql_type_of(col.oracle_type())))
            .collect();
        Self {
            columns,
            rows: Some(rows),
            current: None,
            remaining: row_limit(max_rows),
        }
    }
}

impl Cursor for OracleCursor {
    fn columns(&self) -> DriverResult<Vec<ColumnInfo>> {
        Ok(self.columns.clone())
    }

    fn next(&mut self) -> DriverResult<bool> {
        self.current = None;
        if self.remaining == Some(0) {
            self.rows = None;
            return Ok(false);
        }
        let Some(rows) = self.rows.as_mut() else {
            return Ok(false);
        };
        match rows.next() {
            Some(row) => {
                self.current = Some(row?);
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Ok(true)
            }
            None => {
                self.rows = None;
                Ok(false)
            }
        }
    }

    fn get_object(&self, index: usize) -> DriverResult<Value> {
        let Some(row) = self.current.as_ref() else {
            return Err(DriverError::new("No current row"));
        };
        let column = index
            .checked_sub(1)
            .and_then(|offset| self.columns.get(offset))
            .ok_or_else(|| DriverError::new(format!("Column index {index} is out of range")))?;
        Ok(read_value(row, index - 1, column.sql_type)?)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.current = None;
        self.rows = None;
        Ok(())
    }
}

fn sql_type_of(oracle_type: &OracleType) -> SqlType {
    match oracle_type {
        OracleType::Varchar2(_) => SqlType::VarChar,
        OracleType::NVarchar2(_) => SqlType::NVarChar,
        OracleType::Char(_) => SqlType::Char,
        OracleType::NChar(_) => SqlType::NChar,
        OracleType::Long => SqlType::LongVarChar,
        OracleType::CLOB | OracleType::NCLOB => SqlType::Clob,
        OracleType::Raw(_) => SqlType::VarBinary,
        OracleType::LongRaw => SqlType::LongVarBinary,
        OracleType::BLOB => SqlType::Blob,
        OracleType::Number(precision, 0) if (1..=18).contains(precision) => SqlType::BigInt,
        OracleType::Number(_, _) | OracleType::Float(_) => SqlType::Numeric,
        OracleType::Int64 => SqlType::BigInt,
        OracleType::BinaryFloat => SqlType::Real,
        OracleType::BinaryDouble => SqlType::Double,
        OracleType::Date | OracleType::Timestamp(_) => SqlType::Timestamp,
        OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
            SqlType::TimestampWithTimezone
        }
        OracleType::RefCursor => SqlType::RefCursor,
        OracleType::Object(_) => SqlType::Object,
        _ => SqlType::Other,
    }
}

fn out_type(sql_type: SqlType) -> OracleType {
    match sql_type {
        SqlType::Bit
        | SqlType::Boolean
        | SqlType::TinyInt
        | SqlType::SmallInt
        | SqlType::Integer
        | SqlType::BigInt => OracleType::Int64,
        SqlType::Float | SqlType::Double | SqlType::Real => OracleType::BinaryDouble,
        SqlType::Date => OracleType::Date,
        SqlType::Timestamp => OracleType::Timestamp(6),
        SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary | SqlType::Blob => {
            OracleType::Raw(VARCHAR_OUT_SIZE)
        }
        _ => OracleType::Varchar2(VARCHAR_OUT_SIZE),
    }
}

fn to_sql(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Null => Box::new(OracleType::Varchar2(1)),
        Value::Bool(b) => Box::new(i64::from(*b)),
        Value::Int(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Decimal(s) | Value::Text(s) => Box::new(s.clone()),
        Value::Bytes(bytes) => Box::new(bytes.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(t.format("%H:%M:%S").to_string()),
        Value::Timestamp(ts) => Box::new(*ts),
    }
}

/// Row columns and statement binds both hand back typed values by index.
trait ValueSource {
    fn fetch<T: FromSql>(&self, index: usize) -> oracle::Result<Option<T>>;
}

impl ValueSource for Row {
    fn fetch<T: FromSql>(&self, index: usize) -> oracle::Result<Option<T>> {
        self.get(index)
    }
}

impl ValueSource for oracle::Statement {
    fn fetch<T: FromSql>(&self, index: usize) -> oracle::Result<Option<T>> {
        self.bind_value(index)
    }
}

fn read_value(source: &impl ValueSource, index: usize, sql_type: SqlType) -> oracle::Result<Value> {
    let value = match sql_type {
        SqlType::Bit | SqlType::Boolean => source
            .fetch::<i64>(index)?
            .map(|flag| Value::Bool(flag != 0)),
        SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
            source.fetch::<i64>(index)?.map(Value::Int)
        }
        SqlType::Float | SqlType::Double | SqlType::Real => {
            source.fetch::<f64>(index)?.map(Value::Float)
        }
        SqlType::Decimal | SqlType::Numeric => source.fetch::<String>(index)?.map(Value::Decimal),
        SqlType::Date => source
            .fetch::<NaiveDateTime>(index)?
            .map(|ts| Value::Date(ts.date())),
        SqlType::Timestamp => source.fetch::<NaiveDateTime>(index)?.map(Value::Timestamp),
        SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary | SqlType::Blob => {
            source.fetch::<Vec<u8>>(index)?.map(Value::Bytes)
        }
        _ => source.fetch::<String>(index)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_uses_easy_connect_form() {
        let info = ConnectionInfo::new("dev", "scott", "tiger", "db.local", 1522, "XEPDB1");
        assert_eq!(info.connection_string(), "//db.local:1522/XEPDB1");
        assert_eq!(info.display_string(), "dev (scott@db.local:1522/XEPDB1)");
    }

    #[test]
    fn password_is_not_serialized() {
        let info = ConnectionInfo::new("dev", "scott", "tiger", "localhost", 1521, "ORCL");
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("tiger"));
        let back: ConnectionInfo = serde_json::from_str(&json).unwrap();
        assert!(back.password.is_empty());
        assert_eq!(back.username, "scott");
    }

    #[test]
    fn column_types_map_to_sql_types() {
        assert_eq!(sql_type_of(&OracleType::Varchar2(40)), SqlType::VarChar);
        assert_eq!(sql_type_of(&OracleType::Number(10, 0)), SqlType::BigInt);
        assert_eq!(sql_type_of(&OracleType::Number(10, 2)), SqlType::Numeric);
        assert_eq!(sql_type_of(&OracleType::Number(0, -127)), SqlType::Numeric);
        assert_eq!(sql_type_of(&OracleType::Date), SqlType::Timestamp);
        assert_eq!(sql_type_of(&OracleType::BLOB), SqlType::Blob);
        assert_eq!(sql_type_of(&OracleType::RefCursor), SqlType::RefCursor);
    }

    #[test]
    fn oversized_update_counts_are_errors() {
        assert_eq!(narrow_count::<i32, i64>(7, "i32").unwrap(), 7);
        let err = narrow_count::<i32, i64>(i64::from(i32::MAX) + 1, "i32").unwrap_err();
        assert_eq!(err.message(), "Update count overflows i32");
        assert!(narrow_count::<i64, u64>(u64::MAX, "i64").is_err());
    }

    #[test]
    fn zero_max_rows_is_unlimited() {
        assert_eq!(row_limit(None), None);
        assert_eq!(row_limit(Some(0)), None);
        assert_eq!(row_limit(Some(3)), Some(3));
    }

    fn live_info() -> Option<ConnectionInfo> {
        let username = std::env::var("ORACLE_USER").ok()?;
        let password = std::env::var("ORACLE_PASSWORD").ok()?;
        let host = std::env::var("ORACLE_HOST").unwrap_or_else(|_| "localhost".to_string());
        let service = std::env::var("ORACLE_SERVICE").unwrap_or_else(|_| "XEPDB1".to_string());
        Some(ConnectionInfo::new("live", &username, &password, &host, 1521, &service))
    }

    #[test]
    #[ignore] // needs a reachable Oracle instance
    fn rows_stream_and_stop_at_max_rows() {
        let Some(info) = live_info() else {
            return;
        };
        let db = crate::db::Db::new(info);
        let sql = "SELECT LEVEL AS N FROM DUAL CONNECT BY LEVEL <= 5";

        let mut cursor = db.select(sql, ()).unwrap().fetch_size(2).execute().unwrap();
        let first = cursor.next_row().unwrap().unwrap().get_i64(1).unwrap();
        assert_eq!(first, Some(1));
        let rest = cursor.into_maps().unwrap();
        assert_eq!(rest.len(), 4);
        let last = rest[3].get("n").map(|value| value.to_i64().unwrap());
        assert_eq!(last, Some(Some(5)));

        let capped = db.select(sql, ()).unwrap().max_rows(2).execute().unwrap();
        assert_eq!(capped.into_maps().unwrap().len(), 2);
    }

    #[test]
    fn out_parameters_bind_with_wide_buffers() {
        assert_eq!(out_type(SqlType::Integer), OracleType::Int64);
        assert_eq!(out_type(SqlType::VarChar), OracleType::Varchar2(VARCHAR_OUT_SIZE));
        assert_eq!(out_type(SqlType::Decimal), OracleType::Varchar2(VARCHAR_OUT_SIZE));
        assert_eq!(out_type(SqlType::Blob), OracleType::Raw(VARCHAR_OUT_SIZE));
    }
}
