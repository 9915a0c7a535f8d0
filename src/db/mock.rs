//! In-memory scripted driver used by the unit tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::db::connection::{
    Connection, Cursor, DriverResult, GeneratedKeys, Savepoint, Statement, TransactionIsolation,
};
use crate::db::error::DriverError;
use crate::db::query::{ColumnInfo, StatementKind};
use crate::db::value::{SqlType, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockTable {
    pub rows: Vec<Vec<Value>>,
    pub next_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
}

impl MockResultSet {
    pub fn new(columns: &[(&str, SqlType)], rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, sql_type)| ColumnInfo::new(name, *sql_type))
                .collect(),
            rows,
        }
    }
}

/// What one execution of a scripted statement produces.
#[derive(Debug, Clone, Default)]
pub struct MockResult {
    pub update_count: i64,
    pub result_sets: Vec<MockResultSet>,
    pub out_values: Vec<(usize, Value)>,
    pub generated_keys: Option<MockResultSet>,
}

impl MockResult {
    pub fn count(update_count: i64) -> Self {
        Self {
            update_count,
            ..Self::default()
        }
    }

    pub fn rows(result_set: MockResultSet) -> Self {
        Self {
            result_sets: vec![result_set],
            ..Self::default()
        }
    }
}

type Handler = Rc<dyn Fn(&mut MockTable, &[Value]) -> Result<MockResult, DriverError>>;

struct MockState {
    handlers: HashMap<String, Handler>,
    table: MockTable,
    auto_commit: bool,
    isolation: TransactionIsolation,
    supported_isolation: Vec<TransactionIsolation>,
    batch_updates: bool,
    refuse_auto_commit: bool,
    closed: bool,
    savepoints: Vec<(Savepoint, MockTable)>,
    next_savepoint: u32,
    events: Vec<String>,
    executed: Vec<String>,
    open_statements: usize,
    open_cursors: usize,
}

#[derive(Clone)]
pub struct MockDb {
    state: Rc<RefCell<MockState>>,
}

impl MockDb {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                handlers: HashMap::new(),
                table: MockTable {
                    rows: Vec::new(),
                    next_id: 1,
                },
                auto_commit: true,
                isolation: TransactionIsolation::ReadCommitted,
                supported_isolation: vec![
                    TransactionIsolation::ReadCommitted,
                    TransactionIsolation::Serializable,
                ],
                batch_updates: true,
                refuse_auto_commit: false,
                closed: false,
                savepoints: Vec::new(),
                next_savepoint: 1,
                events: Vec::new(),
                executed: Vec::new(),
                open_statements: 0,
                open_cursors: 0,
            })),
        }
    }

    /// Scripts the statement with exactly this text.
    pub fn on<F>(&self, sql: &str, handler: F) -> &Self
    where
        F: Fn(&mut MockTable, &[Value]) -> Result<MockResult, DriverError> + 'static,
    {
        self.state
            .borrow_mut()
            .handlers
            .insert(sql.to_string(), Rc::new(handler));
        self
    }

    pub fn set_batch_updates(&self, enabled: bool) {
        self.state.borrow_mut().batch_updates = enabled;
    }

    /// Makes every later attempt to switch auto-commit back on fail.
    pub fn refuse_auto_commit(&self) {
        self.state.borrow_mut().refuse_auto_commit = true;
    }

    pub fn close(&self) {
        self.state.borrow_mut().closed = true;
    }

    pub fn table(&self) -> MockTable {
        self.state.borrow().table.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    pub fn open_statements(&self) -> usize {
        self.state.borrow().open_statements
    }

    pub fn open_cursors(&self) -> usize {
        self.state.borrow().open_cursors
    }

    fn record(&self, event: String) {
        self.state.borrow_mut().events.push(event);
    }

    fn run(&self, sql: &str, values: &[Value]) -> Result<MockResult, DriverError> {
        let handler = self
            .state
            .borrow()
            .handlers
            .get(sql)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("Unknown statement: {sql}")))?;
        let mut state = self.state.borrow_mut();
        state.executed.push(sql.to_string());
        handler(&mut state.table, values)
    }

    fn open_cursor(&self, result_set: MockResultSet) -> MockCursor {
        self.state.borrow_mut().open_cursors += 1;
        MockCursor {
            db: self.clone(),
            result_set,
            position: None,
            closed: false,
        }
    }
}

impl Connection for MockDb {
    type Statement = MockStatement;

    fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    fn prepare(
        &self,
        sql: &str,
        kind: StatementKind,
        keys: &GeneratedKeys,
    ) -> DriverResult<MockStatement> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(DriverError::new("Connection is closed"));
        }
        if !state.handlers.contains_key(sql) {
            return Err(DriverError::new(format!("Unknown statement: {sql}")));
        }
        state.open_statements += 1;
        state.events.push(format!("prepare {kind}"));
        Ok(MockStatement {
            db: self.clone(),
            sql: sql.to_string(),
            keys_requested: keys.is_requested(),
            binds: BTreeMap::new(),
            outs: BTreeMap::new(),
            batch: Vec::new(),
            current: None,
            pending: VecDeque::new(),
            out_values: Vec::new(),
            generated_keys: None,
            closed: false,
        })
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        Ok(self.state.borrow().auto_commit)
    }

    fn set_auto_commit(&self, enabled: bool) -> DriverResult<()> {
        self.record(format!("auto_commit={enabled}"));
        let mut state = self.state.borrow_mut();
        if enabled && state.refuse_auto_commit {
            return Err(DriverError::new(
                "ORA-02089: COMMIT is not allowed in a subordinate session",
            ));
        }
        if enabled && !state.auto_commit {
            state.savepoints.clear();
        }
        state.auto_commit = enabled;
        Ok(())
    }

    fn isolation(&self) -> DriverResult<TransactionIsolation> {
        Ok(self.state.borrow().isolation)
    }

    fn set_isolation(&self, level: TransactionIsolation) -> DriverResult<()> {
        self.record(format!("isolation={}", level.sql_name()));
        self.state.borrow_mut().isolation = level;
        Ok(())
    }

    fn supports_isolation(&self, level: TransactionIsolation) -> bool {
        self.state.borrow().supported_isolation.contains(&level)
    }

    fn supports_batch_updates(&self) -> bool {
        self.state.borrow().batch_updates
    }

    fn set_savepoint(&self) -> DriverResult<Savepoint> {
        let mut state = self.state.borrow_mut();
        let id = state.next_savepoint;
        state.next_savepoint += 1;
        let savepoint = Savepoint {
            id,
            name: format!("SP_{id}"),
        };
        let snapshot = state.table.clone();
        state.savepoints.push((savepoint.clone(), snapshot));
        state.events.push(format!("savepoint {}", savepoint.name));
        Ok(savepoint)
    }

    fn rollback_to(&self, savepoint: &Savepoint) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        let snapshot = state
            .savepoints
            .iter()
            .find(|(known, _)| known == savepoint)
            .map(|(_, table)| table.clone())
            .ok_or_else(|| DriverError::new(format!("No savepoint {}", savepoint.name)))?;
        state.table = snapshot;
        state.events.push(format!("rollback {}", savepoint.name));
        Ok(())
    }

    fn release_savepoint(&self, savepoint: &Savepoint) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        state.savepoints.retain(|(known, _)| known != savepoint);
        state.events.push(format!("release {}", savepoint.name));
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        state.savepoints.clear();
        state.events.push("commit".to_string());
        Ok(())
    }
}

pub struct MockStatement {
    db: MockDb,
    sql: String,
    keys_requested: bool,
    binds: BTreeMap<usize, Value>,
    outs: BTreeMap<usize, SqlType>,
    batch: Vec<Vec<Value>>,
    current: Option<MockResultSet>,
    pending: VecDeque<MockResultSet>,
    out_values: Vec<(usize, Value)>,
    generated_keys: Option<MockResultSet>,
    closed: bool,
}

impl MockStatement {
    fn bound_values(&self) -> Vec<Value> {
        self.binds.values().cloned().collect()
    }

    fn absorb(&mut self, result: MockResult) -> i64 {
        self.pending = result.result_sets.into();
        self.current = None;
        self.out_values = result.out_values;
        if self.keys_requested {
            self.generated_keys = result.generated_keys;
        }
        result.update_count
    }
}

impl Statement for MockStatement {
    type Cursor = MockCursor;

    fn bind(&mut self, position: usize, value: &Value) -> DriverResult<()> {
        self.binds.insert(position, value.clone());
        Ok(())
    }

    fn register_out(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.outs.insert(position, sql_type);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.db.record(format!("timeout={}", timeout.as_secs()));
        Ok(())
    }

    fn set_escape_processing(&mut self, _enabled: bool) -> DriverResult<()> {
        Ok(())
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.db.record(format!("fetch_size={rows}"));
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()> {
        self.db.record(format!("max_rows={rows}"));
        Ok(())
    }

    fn execute(&mut self) -> DriverResult<bool> {
        let result = self.db.run(&self.sql, &self.bound_values())?;
        self.absorb(result);
        self.current = self.pending.pop_front();
        Ok(self.current.is_some())
    }

    fn execute_update(&mut self) -> DriverResult<i32> {
        let count = self.execute_large_update()?;
        i32::try_from(count).map_err(|_| DriverError::new("Update count overflows i32"))
    }

    fn execute_large_update(&mut self) -> DriverResult<i64> {
        let result = self.db.run(&self.sql, &self.bound_values())?;
        Ok(self.absorb(result))
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        let row = self.bound_values();
        self.batch.push(row);
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i32>> {
        self.execute_large_batch()?
            .into_iter()
            .map(|count| {
                i32::try_from(count).map_err(|_| DriverError::new("Update count overflows i32"))
            })
            .collect()
    }

    fn execute_large_batch(&mut self) -> DriverResult<Vec<i64>> {
        if !self.db.supports_batch_updates() {
            return Err(DriverError::unsupported("batch updates"));
        }
        let rows = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(rows.len());
        let mut keys: Option<MockResultSet> = None;
        for row in rows {
            let result = self.db.run(&self.sql, &row)?;
            if let Some(generated) = result.generated_keys.clone() {
                match keys.as_mut() {
                    Some(all) => all.rows.extend(generated.rows),
                    None => keys = Some(generated),
                }
            }
            counts.push(self.absorb(result));
        }
        if self.keys_requested {
            self.generated_keys = keys;
        }
        Ok(counts)
    }

    fn result_cursor(&mut self) -> DriverResult<Option<MockCursor>> {
        Ok(self.current.take().map(|set| self.db.open_cursor(set)))
    }

    fn more_results(&mut self) -> DriverResult<bool> {
        self.current = self.pending.pop_front();
        Ok(self.current.is_some())
    }

    fn generated_keys(&mut self) -> DriverResult<MockCursor> {
        if !self.keys_requested {
            return Err(DriverError::new("Generated keys were not requested"));
        }
        let keys = self
            .generated_keys
            .take()
            .unwrap_or_else(|| MockResultSet::new(&[("ID", SqlType::BigInt)], Vec::new()));
        Ok(self.db.open_cursor(keys))
    }

    fn out_value(&self, position: usize, sql_type: SqlType) -> DriverResult<Value> {
        if self.outs.get(&position) != Some(&sql_type) {
            return Err(DriverError::new(format!("Parameter {position} is not registered as OUT")));
        }
        Ok(self
            .out_values
            .iter()
            .find(|(slot, _)| *slot == position)
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null))
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            self.db.state.borrow_mut().open_statements -= 1;
        }
        Ok(())
    }
}

pub struct MockCursor {
    db: MockDb,
    result_set: MockResultSet,
    position: Option<usize>,
    closed: bool,
}

impl MockCursor {
    fn row(&self) -> DriverResult<&Vec<Value>> {
        self.position
            .and_then(|position| self.result_set.rows.get(position))
            .ok_or_else(|| DriverError::new("Cursor is not on a row"))
    }
}

impl Cursor for MockCursor {
    fn columns(&self) -> DriverResult<Vec<ColumnInfo>> {
        Ok(self.result_set.columns.clone())
    }

    fn next(&mut self) -> DriverResult<bool> {
        if self.closed {
            return Err(DriverError::new("Cursor is closed"));
        }
        let next = self.position.map_or(0, |position| position + 1);
        self.position = Some(next);
        Ok(next < self.result_set.rows.len())
    }

    fn get_object(&self, index: usize) -> DriverResult<Value> {
        self.row()?
            .get(index.wrapping_sub(1))
            .cloned()
            .ok_or_else(|| DriverError::new(format!("Invalid column index {index}")))
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            self.db.state.borrow_mut().open_cursors -= 1;
        }
        Ok(())
    }
}
