use std::time::Duration;

use crate::db::connection::{
    Connection, ConnectionProvider, GeneratedKeys, Statement, TransactionIsolation,
};
use crate::db::error::{Error, Result};
use crate::db::query::{
    check_positional, classify, is_procedure_call, normalize, resolve, resolve_call,
    ExecOptions, OutCallback, OutParams, Outcome, PreparedQuery, QueryExecutor, ResultCursor,
    ResultRow, StatementKind,
};
use crate::db::session::{NamedBindings, Param};
use crate::db::value::Value;
use crate::utils::QueryConfig;

pub type StatementOf<P> = <<P as ConnectionProvider>::Connection as Connection>::Statement;
pub type CursorOf<P> = <StatementOf<P> as Statement>::Cursor;

/// Parameters supplied with a statement: none, positional, or named.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(NamedBindings),
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<NamedBindings> for Params {
    fn from(bindings: NamedBindings) -> Self {
        Params::Named(bindings)
    }
}

/// Entry point: builds queries against connections handed out by `P`.
pub struct Db<P: ConnectionProvider> {
    provider: P,
    config: QueryConfig,
}

impl<P: ConnectionProvider> Db<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, QueryConfig::default())
    }

    pub fn with_config(provider: P, config: QueryConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn options(&self) -> ExecOptions {
        ExecOptions::from(&self.config)
    }

    fn connection(&self) -> Result<P::Connection> {
        Ok(self.provider.acquire()?)
    }

    /// Normalizes the text and turns named bindings into positional ones.
    fn build(sql: &str, params: Params) -> Result<PreparedQuery> {
        let clean = normalize(sql)?;
        match params {
            Params::None => Ok(PreparedQuery {
                sql: clean,
                values: Vec::new(),
            }),
            Params::Positional(values) => {
                check_positional(&clean, values.len())?;
                Ok(PreparedQuery { sql: clean, values })
            }
            Params::Named(bindings) => {
                let (sql, values) = resolve(&clean, bindings.entries())?;
                Ok(PreparedQuery { sql, values })
            }
        }
    }

    fn expect_kind(query: &PreparedQuery, kind: StatementKind) -> Result<()> {
        let actual = classify(&query.sql);
        if actual != kind {
            return Err(Error::InvalidArgument(format!(
                "Query '{}' is not a valid {kind} statement",
                query.sql
            )));
        }
        Ok(())
    }

    pub fn select(&self, sql: &str, params: impl Into<Params>) -> Result<Select<'_, P>> {
        let query = Self::build(sql, params.into())?;
        Self::expect_kind(&query, StatementKind::Select)?;
        Ok(Select {
            db: self,
            query,
            options: self.options(),
        })
    }

    pub fn update(&self, sql: &str, params: impl Into<Params>) -> Result<Update<'_, P>> {
        let query = Self::build(sql, params.into())?;
        Self::expect_kind(&query, StatementKind::Dml)?;
        Ok(Update {
            db: self,
            sql: query.sql,
            rows: vec![query.values],
            options: self.options(),
        })
    }

    /// One DML template executed once per row. Rows must have equal arity.
    /// An empty batch executes nothing.
    pub fn update_batch(&self, sql: &str, rows: Vec<Vec<Value>>) -> Result<Update<'_, P>> {
        let clean = normalize(sql)?;
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            return Err(Error::InvalidArgument(
                "All batch rows must have the same number of values".to_string(),
            ));
        }
        check_positional(&clean, width)?;
        let query = PreparedQuery {
            sql: clean,
            values: Vec::new(),
        };
        Self::expect_kind(&query, StatementKind::Dml)?;
        Ok(Update {
            db: self,
            sql: query.sql,
            rows,
            options: self.options(),
        })
    }

    /// Named bindings per batch row. Every row must rewrite the template to
    /// the same positional text.
    pub fn update_named_batch(&self, sql: &str, rows: Vec<NamedBindings>) -> Result<Update<'_, P>> {
        let clean = normalize(sql)?;
        let mut rewritten: Option<String> = None;
        let mut values = Vec::with_capacity(rows.len());
        for bindings in &rows {
            let (sql, row) = resolve(&clean, bindings.entries())?;
            match &rewritten {
                Some(first) if *first != sql => {
                    return Err(Error::InvalidArgument(format!(
                        "Batch rows rewrite '{clean}' differently: '{first}' and '{sql}'"
                    )))
                }
                Some(_) => {}
                None => rewritten = Some(sql),
            }
            values.push(row);
        }
        let query = PreparedQuery {
            sql: rewritten.unwrap_or(clean),
            values: Vec::new(),
        };
        Self::expect_kind(&query, StatementKind::Dml)?;
        Ok(Update {
            db: self,
            sql: query.sql,
            rows: values,
            options: self.options(),
        })
    }

    /// Stored-procedure call. Parameters are all named or all positional.
    pub fn call<'h>(&self, sql: &str, params: Vec<Param>) -> Result<ProcedureCall<'_, 'h, P>> {
        let clean = normalize(sql)?;
        if params.iter().all(|param| !param.is_named()) {
            check_positional(&clean, params.len())?;
        }
        let (sql, params) = resolve_call(&clean, params)?;
        if !is_procedure_call(&sql) {
            return Err(Error::InvalidArgument(format!(
                "Query '{sql}' is not a valid procedure call statement"
            )));
        }
        Ok(ProcedureCall {
            db: self,
            sql,
            params,
            options: self.options(),
            handler: None,
        })
    }

    /// Classifies the statement and runs it down the matching path.
    pub fn execute<'h>(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Outcome<'h, StatementOf<P>>> {
        let query = Self::build(sql, params.into())?;
        let options = self.options();
        match classify(&query.sql) {
            StatementKind::Select => {
                let select = Select {
                    db: self,
                    query,
                    options,
                };
                Ok(Outcome::Rows(select.execute()?))
            }
            StatementKind::Dml => {
                let update = Update {
                    db: self,
                    sql: query.sql,
                    rows: vec![query.values],
                    options,
                };
                Ok(Outcome::RowCount(update.execute()?))
            }
            StatementKind::ProcedureCall => {
                let call = ProcedureCall {
                    db: self,
                    sql: query.sql,
                    params: query.values.into_iter().map(Param::input).collect(),
                    options,
                    handler: None,
                };
                Ok(Outcome::Rows(call.execute()?))
            }
        }
    }
}

pub struct Select<'a, P: ConnectionProvider> {
    db: &'a Db<P>,
    query: PreparedQuery,
    options: ExecOptions,
}

impl<'a, P: ConnectionProvider> Select<'a, P> {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn poolable(mut self, poolable: bool) -> Self {
        self.options.poolable = poolable;
        self
    }

    pub fn escaped(mut self, escape_processing: bool) -> Self {
        self.options.escape_processing = escape_processing;
        self
    }

    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.options.fetch_size = Some(rows);
        self
    }

    pub fn max_rows(mut self, rows: u64) -> Self {
        self.options.max_rows = Some(rows);
        self
    }

    pub fn as_sql(&self) -> String {
        QueryExecutor::render_sql(&self.query.sql, &self.query.values)
    }

    pub fn print<F: FnOnce(&str)>(self, sink: F) -> Self {
        sink(&self.as_sql());
        self
    }

    pub fn execute<'h>(self) -> Result<ResultCursor<'h, StatementOf<P>>> {
        let conn = self.db.connection()?;
        QueryExecutor::execute_query(&conn, &self.query.sql, &self.query.values, &self.options)
    }

    /// Maps the first row only; the rest of the result is not read.
    pub fn single<T, F>(self, mapper: F) -> Result<Option<T>>
    where
        F: FnOnce(&ResultRow<'_, CursorOf<P>>) -> Result<T>,
    {
        let mut cursor = self.execute()?;
        let first = match cursor.next_row()? {
            Some(row) => Some(mapper(&row)?),
            None => None,
        };
        cursor.close()?;
        Ok(first)
    }
}

pub struct Update<'a, P: ConnectionProvider> {
    db: &'a Db<P>,
    sql: String,
    rows: Vec<Vec<Value>>,
    options: ExecOptions,
}

impl<'a, P: ConnectionProvider> Update<'a, P> {
    /// 64-bit row counts from the driver.
    pub fn large(mut self, large: bool) -> Self {
        self.options.large = large;
        self
    }

    /// Uses driver batching when available.
    pub fn batched(mut self, batch: bool) -> Self {
        self.options.batch = batch;
        self
    }

    /// Isolation level for the transaction wrapping a multi-row batch.
    pub fn transacted(mut self, isolation: TransactionIsolation) -> Self {
        self.options.isolation = Some(isolation);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn poolable(mut self, poolable: bool) -> Self {
        self.options.poolable = poolable;
        self
    }

    pub fn escaped(mut self, escape_processing: bool) -> Self {
        self.options.escape_processing = escape_processing;
        self
    }

    pub fn as_sql(&self) -> String {
        QueryExecutor::render_batch(&self.sql, &self.rows)
    }

    pub fn print<F: FnOnce(&str)>(self, sink: F) -> Self {
        sink(&self.as_sql());
        self
    }

    /// Summed row count over every batch row.
    pub fn execute(self) -> Result<u64> {
        let conn = self.db.connection()?;
        QueryExecutor::execute_update(&conn, &self.sql, &self.rows, &self.options)
    }

    /// Executes and returns `aggregate` applied to the mapped generated keys.
    pub fn execute_with_keys<K, R, M, A>(
        self,
        keys: GeneratedKeys,
        mapper: M,
        aggregate: A,
    ) -> Result<R>
    where
        M: FnMut(&ResultRow<'_, CursorOf<P>>) -> Result<K>,
        A: FnOnce(Vec<K>) -> R,
    {
        let conn = self.db.connection()?;
        QueryExecutor::execute_update_with_keys(
            &conn,
            &self.sql,
            &self.rows,
            &self.options,
            &keys,
            mapper,
            aggregate,
        )
    }
}

pub struct ProcedureCall<'a, 'h, P: ConnectionProvider> {
    db: &'a Db<P>,
    sql: String,
    params: Vec<Param>,
    options: ExecOptions,
    handler: Option<OutCallback<'h, StatementOf<P>>>,
}

impl<'a, 'h, P: ConnectionProvider> ProcedureCall<'a, 'h, P> {
    /// Registers the OUT handler: once every result set has been read,
    /// `mapper` reads the OUT values and `callback` receives its result.
    pub fn with_out_handler<T, M, C>(mut self, mapper: M, callback: C) -> Self
    where
        M: FnOnce(&OutParams<'_, StatementOf<P>>) -> Result<T> + 'h,
        C: FnOnce(T) + 'h,
    {
        self.handler = Some(Box::new(move |out: &OutParams<'_, StatementOf<P>>| {
            callback(mapper(out)?);
            Ok(())
        }));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn poolable(mut self, poolable: bool) -> Self {
        self.options.poolable = poolable;
        self
    }

    pub fn escaped(mut self, escape_processing: bool) -> Self {
        self.options.escape_processing = escape_processing;
        self
    }

    pub fn as_sql(&self) -> String {
        QueryExecutor::render_call(&self.sql, &self.params)
    }

    pub fn print<F: FnOnce(&str)>(self, sink: F) -> Self {
        sink(&self.as_sql());
        self
    }

    pub fn execute(self) -> Result<ResultCursor<'h, StatementOf<P>>> {
        let conn = self.db.connection()?;
        QueryExecutor::execute_call(&conn, &self.sql, &self.params, &self.options, self.handler)
    }

    /// Runs the call for its side effects only.
    pub fn invoke(self) -> Result<()> {
        self.invoke_with(|_| Ok(()))
    }

    /// Runs the call and maps its OUT values.
    pub fn invoke_with<T, F>(self, mapper: F) -> Result<T>
    where
        F: FnOnce(&OutParams<'_, StatementOf<P>>) -> Result<T>,
    {
        let conn = self.db.connection()?;
        QueryExecutor::invoke_call(&conn, &self.sql, &self.params, &self.options, mapper)
    }
}
