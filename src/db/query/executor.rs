use crate::db::connection::{
    Connection, DriverResult, GeneratedKeys, Savepoint, Statement, TransactionIsolation,
};
use crate::db::error::{Error, Result};
use crate::db::session::{Param, ParamMode};
use crate::db::value::Value;

use super::cursor::{drain, OutCallback, OutParams, OutSlot, ResultCursor, ResultRow};
use super::{ExecOptions, StatementKind};

const STATEMENT_DELIMITER: &str = ";";

/// Lifecycle of one prepared statement. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Prepared,
    Executing,
    Succeeded,
    Failed,
    Closed,
}

/// Owns a prepared statement for a single execution and closes it on every
/// exit path unless ownership is handed on to a cursor.
pub struct StatementGuard<S: Statement> {
    statement: Option<S>,
    state: StatementState,
}

impl<S: Statement> StatementGuard<S> {
    pub fn new(statement: S) -> Self {
        Self {
            statement: Some(statement),
            state: StatementState::Prepared,
        }
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    fn statement(&mut self) -> Result<&mut S> {
        self.statement
            .as_mut()
            .ok_or_else(|| Error::Execution("Statement is closed".to_string()))
    }

    /// Applies settings that must precede execution.
    pub fn configure<F>(&mut self, configure: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> Result<()>,
    {
        if self.state != StatementState::Prepared {
            return Err(Error::Execution(format!(
                "Cannot configure a statement in state {:?}",
                self.state
            )));
        }
        configure(self.statement()?)
    }

    /// Runs the single execution this statement is allowed.
    pub fn run<T, F>(&mut self, action: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T>,
    {
        if self.state != StatementState::Prepared {
            return Err(Error::Execution(format!(
                "Statement cannot be executed in state {:?}",
                self.state
            )));
        }
        self.state = StatementState::Executing;
        let outcome = action(self.statement()?);
        self.state = if outcome.is_ok() {
            StatementState::Succeeded
        } else {
            StatementState::Failed
        };
        outcome
    }

    /// Hands the statement over once it has executed successfully.
    pub fn into_statement(mut self) -> Result<S> {
        if self.state != StatementState::Succeeded {
            return Err(Error::Execution(format!(
                "Statement in state {:?} cannot produce results",
                self.state
            )));
        }
        self.state = StatementState::Closed;
        self.statement
            .take()
            .ok_or_else(|| Error::Execution("Statement is closed".to_string()))
    }

    pub fn close(mut self) -> Result<()> {
        self.state = StatementState::Closed;
        match self.statement.take() {
            Some(mut statement) => Ok(statement.close()?),
            None => Ok(()),
        }
    }
}

impl<S: Statement> Drop for StatementGuard<S> {
    fn drop(&mut self) {
        if let Some(mut statement) = self.statement.take() {
            if let Err(err) = statement.close() {
                log::warn!("Failed to close statement: {err}");
            }
        }
        self.state = StatementState::Closed;
    }
}

pub struct QueryExecutor;

impl QueryExecutor {
    pub fn prepare<C: Connection>(
        conn: &C,
        sql: &str,
        kind: StatementKind,
        keys: &GeneratedKeys,
    ) -> Result<StatementGuard<C::Statement>> {
        if conn.is_closed() {
            return Err(Error::Execution("Connection is closed".to_string()));
        }
        let statement = conn.prepare(sql, kind, keys)?;
        Ok(StatementGuard::new(statement))
    }

    /// Drivers that do not implement an optional setting are tolerated.
    fn ignore_unsupported(result: DriverResult<()>, setting: &str) -> Result<()> {
        match result {
            Err(err) if err.is_unsupported() => {
                log::debug!("Ignoring {setting}: {err}");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    pub fn apply_options<S: Statement>(statement: &mut S, options: &ExecOptions) -> Result<()> {
        if let Some(timeout) = options.timeout {
            Self::ignore_unsupported(statement.set_timeout(timeout), "statement timeout")?;
        }
        Self::ignore_unsupported(statement.set_poolable(options.poolable), "poolable hint")?;
        Self::ignore_unsupported(
            statement.set_escape_processing(options.escape_processing),
            "escape processing",
        )?;
        if let Some(rows) = options.fetch_size {
            Self::ignore_unsupported(statement.set_fetch_size(rows), "fetch size")?;
        }
        if let Some(rows) = options.max_rows {
            Self::ignore_unsupported(statement.set_max_rows(rows), "max rows")?;
        }
        Ok(())
    }

    pub fn bind_values<S: Statement>(statement: &mut S, values: &[Value]) -> DriverResult<()> {
        for (offset, value) in values.iter().enumerate() {
            statement.bind(offset + 1, value)?;
        }
        Ok(())
    }

    /// Binds IN values and registers OUT slots; returns the OUT slots.
    pub fn bind_params<S: Statement>(
        statement: &mut S,
        params: &[Param],
    ) -> DriverResult<Vec<OutSlot>> {
        let mut slots = Vec::new();
        for (offset, param) in params.iter().enumerate() {
            let position = offset + 1;
            match &param.mode {
                ParamMode::In(value) => statement.bind(position, value)?,
                ParamMode::Out(sql_type) => statement.register_out(position, *sql_type)?,
                ParamMode::InOut(value, sql_type) => {
                    statement.bind(position, value)?;
                    statement.register_out(position, *sql_type)?;
                }
            }
            if let Some(sql_type) = param.sql_type() {
                slots.push(OutSlot {
                    position,
                    name: param.name.clone(),
                    sql_type,
                });
            }
        }
        Ok(slots)
    }

    /// Runs `action` inside a transaction guarded by a savepoint.
    ///
    /// Auto-commit and isolation are restored afterwards whatever the outcome.
    /// The isolation level is changed only when it differs from the current
    /// one and the driver supports it.
    pub fn in_transaction<C, T, F>(
        conn: &C,
        isolation: Option<TransactionIsolation>,
        action: F,
    ) -> Result<T>
    where
        C: Connection,
        F: FnOnce(&C) -> Result<T>,
    {
        let auto_commit = conn.auto_commit()?;
        let isolation_before = conn.isolation()?;

        conn.set_auto_commit(false)?;
        let savepoint = match conn.set_savepoint() {
            Ok(savepoint) => savepoint,
            Err(err) => {
                Self::restore(conn, auto_commit, None);
                return Err(err.into());
            }
        };

        let mut changed = None;
        if let Some(level) = isolation {
            if level != isolation_before && conn.supports_isolation(level) {
                if let Err(err) = conn.set_isolation(level) {
                    Self::abort(conn, &savepoint, auto_commit, None);
                    return Err(err.into());
                }
                changed = Some(isolation_before);
            }
        }

        let outcome = action(conn).and_then(|value| {
            conn.commit()?;
            Ok(value)
        });
        match outcome {
            Ok(value) => {
                let restored = conn.set_auto_commit(auto_commit);
                let reverted = match changed {
                    Some(level) => conn.set_isolation(level),
                    None => Ok(()),
                };
                restored?;
                reverted?;
                Ok(value)
            }
            Err(err) => {
                log::debug!("Rolling back to {}: {err}", savepoint.name);
                Self::abort(conn, &savepoint, auto_commit, changed);
                Err(err)
            }
        }
    }

    fn abort<C: Connection>(
        conn: &C,
        savepoint: &Savepoint,
        auto_commit: bool,
        isolation: Option<TransactionIsolation>,
    ) {
        if let Err(err) = conn.rollback_to(savepoint) {
            log::warn!("Failed to roll back to {}: {err}", savepoint.name);
        }
        if let Err(err) = conn.release_savepoint(savepoint) {
            log::warn!("Failed to release {}: {err}", savepoint.name);
        }
        Self::restore(conn, auto_commit, isolation);
    }

    fn restore<C: Connection>(
        conn: &C,
        auto_commit: bool,
        isolation: Option<TransactionIsolation>,
    ) {
        if let Err(err) = conn.set_auto_commit(auto_commit) {
            log::warn!("Failed to restore auto-commit: {err}");
        }
        if let Some(level) = isolation {
            if let Err(err) = conn.set_isolation(level) {
                log::warn!("Failed to restore isolation {}: {err}", level.sql_name());
            }
        }
    }

    /// Negative "no information" counts contribute nothing.
    fn count_rows(count: i64) -> u64 {
        u64::try_from(count).unwrap_or(0)
    }

    fn run_rows<S: Statement>(
        statement: &mut S,
        rows: &[Vec<Value>],
        options: &ExecOptions,
        batch: bool,
    ) -> Result<u64> {
        if batch {
            for row in rows {
                Self::bind_values(statement, row)?;
                statement.add_batch()?;
            }
            let counts = statement.execute_large_batch()?;
            return Ok(counts.into_iter().map(Self::count_rows).sum());
        }

        let mut total = 0u64;
        for row in rows {
            Self::bind_values(statement, row)?;
            let count = if options.large {
                statement.execute_large_update()?
            } else {
                i64::from(statement.execute_update()?)
            };
            total += Self::count_rows(count);
        }
        Ok(total)
    }

    fn use_batch<C: Connection>(conn: &C, rows: &[Vec<Value>], options: &ExecOptions) -> bool {
        options.batch && rows.len() > 1 && conn.supports_batch_updates()
    }

    fn check_arity(rows: &[Vec<Value>]) -> Result<()> {
        if let Some(first) = rows.first() {
            if let Some(row) = rows.iter().position(|row| row.len() != first.len()) {
                return Err(Error::InvalidArgument(format!(
                    "Batch row {} has {} values, expected {}",
                    row + 1,
                    rows[row].len(),
                    first.len()
                )));
            }
        }
        Ok(())
    }

    /// Executes DML once per parameter row and returns the summed row count.
    /// More than one row runs inside a transaction; no rows runs nothing.
    pub fn execute_update<C: Connection>(
        conn: &C,
        sql: &str,
        rows: &[Vec<Value>],
        options: &ExecOptions,
    ) -> Result<u64> {
        Self::check_arity(rows)?;
        if rows.is_empty() {
            log::debug!("Skipping empty batch: {sql}");
            return Ok(0);
        }
        log::debug!("Executing update: {}", Self::render_batch(sql, rows));
        let run = |conn: &C| -> Result<u64> {
            let mut guard = Self::prepare(conn, sql, StatementKind::Dml, &GeneratedKeys::None)?;
            guard.configure(|statement| Self::apply_options(statement, options))?;
            let batch = Self::use_batch(conn, rows, options);
            let total = guard.run(|statement| Self::run_rows(statement, rows, options, batch))?;
            guard.close()?;
            Ok(total)
        };
        if rows.len() > 1 {
            Self::in_transaction(conn, options.isolation, run)
        } else {
            run(conn)
        }
    }

    /// Executes DML and reads the generated keys of every executed unit
    /// through `mapper`, then hands the collected keys to `aggregate`.
    ///
    /// On the one-by-one path keys come back in row order; in batch mode they
    /// come in whatever order the driver reports.
    pub fn execute_update_with_keys<C, K, R, M, A>(
        conn: &C,
        sql: &str,
        rows: &[Vec<Value>],
        options: &ExecOptions,
        keys: &GeneratedKeys,
        mut mapper: M,
        aggregate: A,
    ) -> Result<R>
    where
        C: Connection,
        M: FnMut(&ResultRow<'_, <C::Statement as Statement>::Cursor>) -> Result<K>,
        A: FnOnce(Vec<K>) -> R,
    {
        Self::check_arity(rows)?;
        if rows.is_empty() {
            log::debug!("Skipping empty batch: {sql}");
            return Ok(aggregate(Vec::new()));
        }
        let keys = if keys.is_requested() {
            keys.clone()
        } else {
            GeneratedKeys::All
        };
        log::debug!("Executing update with keys: {}", Self::render_batch(sql, rows));
        let mut run = |conn: &C| -> Result<Vec<K>> {
            let mut guard = Self::prepare(conn, sql, StatementKind::Dml, &keys)?;
            guard.configure(|statement| Self::apply_options(statement, options))?;
            let batch = Self::use_batch(conn, rows, options);
            let collected = guard.run(|statement| {
                let mut collected = Vec::new();
                if batch {
                    for row in rows {
                        Self::bind_values(statement, row)?;
                        statement.add_batch()?;
                    }
                    statement.execute_large_batch()?;
                    collected.extend(drain(statement.generated_keys()?, &mut mapper)?);
                } else {
                    for row in rows {
                        Self::bind_values(statement, row)?;
                        if options.large {
                            statement.execute_large_update()?;
                        } else {
                            statement.execute_update()?;
                        }
                        collected.extend(drain(statement.generated_keys()?, &mut mapper)?);
                    }
                }
                Ok(collected)
            })?;
            guard.close()?;
            Ok(collected)
        };
        let collected = if rows.len() > 1 {
            Self::in_transaction(conn, options.isolation, run)?
        } else {
            run(conn)?
        };
        Ok(aggregate(collected))
    }

    /// Executes a query and returns a lazy cursor that owns the statement.
    pub fn execute_query<'h, C: Connection>(
        conn: &C,
        sql: &str,
        values: &[Value],
        options: &ExecOptions,
    ) -> Result<ResultCursor<'h, C::Statement>> {
        log::debug!("Executing query: {}", Self::render_sql(sql, values));
        let mut guard = Self::prepare(conn, sql, StatementKind::Select, &GeneratedKeys::None)?;
        guard.configure(|statement| Self::apply_options(statement, options))?;
        let current = guard.run(|statement| {
            Self::bind_values(statement, values)?;
            if statement.execute()? {
                Ok(statement.result_cursor()?)
            } else {
                Ok(None)
            }
        })?;
        Ok(ResultCursor::new(guard.into_statement()?, current))
    }

    fn execute_call_statement<C: Connection>(
        conn: &C,
        sql: &str,
        params: &[Param],
        options: &ExecOptions,
    ) -> Result<(StatementGuard<C::Statement>, Vec<OutSlot>, bool)> {
        log::debug!("Executing call: {}", Self::render_call(sql, params));
        let mut guard =
            Self::prepare(conn, sql, StatementKind::ProcedureCall, &GeneratedKeys::None)?;
        guard.configure(|statement| Self::apply_options(statement, options))?;
        let (slots, has_rows) = guard.run(|statement| {
            let slots = Self::bind_params(statement, params)?;
            let has_rows = statement.execute()?;
            Ok((slots, has_rows))
        })?;
        Ok((guard, slots, has_rows))
    }

    /// Executes a procedure call; the cursor walks every result set it
    /// produces and fires `handler` once all of them are exhausted.
    pub fn execute_call<'h, C: Connection>(
        conn: &C,
        sql: &str,
        params: &[Param],
        options: &ExecOptions,
        handler: Option<OutCallback<'h, C::Statement>>,
    ) -> Result<ResultCursor<'h, C::Statement>> {
        let (guard, slots, has_rows) = Self::execute_call_statement(conn, sql, params, options)?;
        let mut statement = guard.into_statement()?;
        let current = if has_rows {
            match statement.result_cursor() {
                Ok(current) => current,
                Err(err) => {
                    if let Err(close_err) = statement.close() {
                        log::warn!("Failed to close statement: {close_err}");
                    }
                    return Err(err.into());
                }
            }
        } else {
            None
        };
        Ok(ResultCursor::new(statement, current).with_out_handler(slots, handler))
    }

    /// Executes a procedure call for its OUT values only. Result sets the
    /// call may produce are not read.
    pub fn invoke_call<C, T, F>(
        conn: &C,
        sql: &str,
        params: &[Param],
        options: &ExecOptions,
        mapper: F,
    ) -> Result<T>
    where
        C: Connection,
        F: FnOnce(&OutParams<'_, C::Statement>) -> Result<T>,
    {
        let (mut guard, slots, _) = Self::execute_call_statement(conn, sql, params, options)?;
        let mapped = {
            let statement = guard.statement()?;
            mapper(&OutParams::new(statement, &slots))
        };
        let closed = guard.close();
        let value = mapped?;
        closed?;
        Ok(value)
    }

    /// Statement text with each `?` replaced by its value, for diagnostics.
    pub fn render_sql(sql: &str, values: &[Value]) -> String {
        let mut rendered = String::with_capacity(sql.len());
        let mut values = values.iter();
        for part in sql.split_inclusive('?') {
            match part.strip_suffix('?') {
                Some(head) => {
                    rendered.push_str(head);
                    match values.next() {
                        Some(value) => rendered.push_str(&value.to_string()),
                        None => rendered.push('?'),
                    }
                }
                None => rendered.push_str(part),
            }
        }
        rendered
    }

    /// One rendered statement per row, joined with `;`.
    pub fn render_batch(sql: &str, rows: &[Vec<Value>]) -> String {
        if rows.is_empty() {
            return sql.to_string();
        }
        rows.iter()
            .map(|row| Self::render_sql(sql, row))
            .collect::<Vec<_>>()
            .join(STATEMENT_DELIMITER)
    }

    /// OUT-only parameters stay as `?`.
    pub fn render_call(sql: &str, params: &[Param]) -> String {
        let mut rendered = String::with_capacity(sql.len());
        let mut params = params.iter();
        for part in sql.split_inclusive('?') {
            match part.strip_suffix('?') {
                Some(head) => {
                    rendered.push_str(head);
                    match params.next().and_then(Param::value) {
                        Some(value) => rendered.push_str(&value.to_string()),
                        None => rendered.push('?'),
                    }
                }
                None => rendered.push_str(part),
            }
        }
        rendered
    }
}
