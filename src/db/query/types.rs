use std::fmt;
use std::time::Duration;

use crate::db::connection::{Statement, TransactionIsolation};
use crate::db::value::{SqlType, Value};
use crate::utils::QueryConfig;

use super::ResultCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Dml,
    ProcedureCall,
}

impl StatementKind {
    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Dml => "DML",
            StatementKind::ProcedureCall => "procedure call",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: SqlType,
}

impl ColumnInfo {
    pub fn new(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
        }
    }
}

/// Per-execution statement settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub poolable: bool,
    pub escape_processing: bool,
    pub large: bool,
    pub batch: bool,
    pub isolation: Option<TransactionIsolation>,
    pub fetch_size: Option<u32>,
    pub max_rows: Option<u64>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            poolable: false,
            escape_processing: true,
            large: false,
            batch: false,
            isolation: None,
            fetch_size: None,
            max_rows: None,
        }
    }
}

impl From<&QueryConfig> for ExecOptions {
    fn from(config: &QueryConfig) -> Self {
        Self {
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
            poolable: config.poolable,
            escape_processing: config.escape_processing,
            large: config.large,
            batch: config.batch,
            isolation: config.isolation,
            fetch_size: (config.fetch_size > 0).then_some(config.fetch_size),
            max_rows: (config.max_rows > 0).then_some(config.max_rows),
        }
    }
}

/// Statement text after rewriting plus the values aligned to its `?`s.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

/// Default row shape: column labels to values, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap {
    entries: Vec<(String, Value)>,
}

impl RowMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Labels compare ASCII case-insensitively; an existing entry keeps its
    /// original label and takes the new value.
    pub fn insert(&mut self, label: String, value: Value) {
        match self
            .entries
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&label))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(label))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Result of running a statement whose kind was decided by the classifier.
pub enum Outcome<'h, S: Statement> {
    RowCount(u64),
    Rows(ResultCursor<'h, S>),
}

impl<'h, S: Statement> Outcome<'h, S> {
    pub fn row_count(&self) -> Option<u64> {
        match self {
            Outcome::RowCount(count) => Some(*count),
            Outcome::Rows(_) => None,
        }
    }

    pub fn into_rows(self) -> Option<ResultCursor<'h, S>> {
        match self {
            Outcome::RowCount(_) => None,
            Outcome::Rows(cursor) => Some(cursor),
        }
    }
}
