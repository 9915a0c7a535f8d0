use std::io::Read;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::db::connection::{Cursor, DriverResult, Statement};
use crate::db::error::{DriverError, Error, Result};
use crate::db::session::normalize_name;
use crate::db::value::{SqlType, Value};

use super::{ColumnInfo, RowMap};

/// Reads one column of the current row.
pub type Reader<K> = fn(&K, usize) -> DriverResult<Value>;

fn read_object<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    cursor.get_object(index)
}

fn read_bytes<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_bytes(index)?.map_or(Value::Null, Value::Bytes))
}

fn read_binary_stream<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    let Some(mut stream) = cursor.get_binary_stream(index)? else {
        return Ok(Value::Null);
    };
    let mut bytes = Vec::new();
    stream
        .read_to_end(&mut bytes)
        .map_err(|err| DriverError::with_source(format!("Failed to read column {index}"), err))?;
    Ok(Value::Bytes(bytes))
}

fn read_text<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_text(index)?.map_or(Value::Null, Value::Text))
}

fn read_character_stream<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    let Some(mut stream) = cursor.get_character_stream(index)? else {
        return Ok(Value::Null);
    };
    let mut text = String::new();
    stream
        .read_to_string(&mut text)
        .map_err(|err| DriverError::with_source(format!("Failed to read column {index}"), err))?;
    Ok(Value::Text(text))
}

fn read_bool<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_bool(index)?.map_or(Value::Null, Value::Bool))
}

fn read_integer<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_i64(index)?.map_or(Value::Null, Value::Int))
}

fn read_float<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_f64(index)?.map_or(Value::Null, Value::Float))
}

fn read_decimal<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_decimal(index)?.map_or(Value::Null, Value::Decimal))
}

fn read_date<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_date(index)?.map_or(Value::Null, Value::Date))
}

fn read_time<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_time(index)?.map_or(Value::Null, Value::Time))
}

fn read_timestamp<K: Cursor>(cursor: &K, index: usize) -> DriverResult<Value> {
    Ok(cursor.get_timestamp(index)?.map_or(Value::Null, Value::Timestamp))
}

/// Default column reader for a declared type.
pub fn reader_for<K: Cursor>(sql_type: SqlType) -> Reader<K> {
    match sql_type {
        SqlType::Binary | SqlType::VarBinary | SqlType::Blob => read_bytes::<K>,
        SqlType::LongVarBinary => read_binary_stream::<K>,
        SqlType::Char | SqlType::VarChar | SqlType::NChar | SqlType::NVarChar => read_text::<K>,
        SqlType::LongVarChar | SqlType::Clob => read_character_stream::<K>,
        SqlType::Bit | SqlType::Boolean => read_bool::<K>,
        SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
            read_integer::<K>
        }
        SqlType::Float | SqlType::Double | SqlType::Real => read_float::<K>,
        SqlType::Decimal | SqlType::Numeric => read_decimal::<K>,
        SqlType::Date => read_date::<K>,
        SqlType::Time | SqlType::TimeWithTimezone => read_time::<K>,
        SqlType::Timestamp | SqlType::TimestampWithTimezone => read_timestamp::<K>,
        SqlType::RefCursor | SqlType::Object | SqlType::Other => read_object::<K>,
    }
}

/// Column metadata and readers of one result-set shape.
struct Shape<K> {
    columns: Vec<ColumnInfo>,
    readers: Vec<Reader<K>>,
}

impl<K: Cursor> Shape<K> {
    fn new(columns: Vec<ColumnInfo>) -> Self {
        let readers = columns
            .iter()
            .map(|column| reader_for::<K>(column.sql_type))
            .collect();
        Self { columns, readers }
    }

    fn same_types(&self, columns: &[ColumnInfo]) -> bool {
        self.columns.len() == columns.len()
            && self
                .columns
                .iter()
                .zip(columns)
                .all(|(known, next)| known.sql_type == next.sql_type)
    }
}

/// The current row of a forward-only, read-only cursor.
pub struct ResultRow<'c, K: Cursor> {
    cursor: &'c K,
    columns: &'c [ColumnInfo],
    readers: &'c [Reader<K>],
}

impl<'c, K: Cursor> ResultRow<'c, K> {
    pub fn columns(&self) -> &[ColumnInfo] {
        self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index == 0 || index > self.columns.len() {
            return Err(Error::InvalidArgument(format!(
                "Column index {index} out of range 1..={}",
                self.columns.len()
            )));
        }
        Ok(())
    }

    /// 1-based index of the column with the given label (case-insensitive).
    pub fn find_column(&self, label: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(label))
            .map(|position| position + 1)
            .ok_or_else(|| Error::InvalidArgument(format!("No column labeled {label}")))
    }

    /// Reads a column through the reader table.
    pub fn get(&self, index: usize) -> Result<Value> {
        self.check_index(index)?;
        let reader = self.readers[index - 1];
        Ok(reader(self.cursor, index)?)
    }

    pub fn get_by_label(&self, label: &str) -> Result<Value> {
        self.get(self.find_column(label)?)
    }

    pub fn get_bool(&self, index: usize) -> Result<Option<bool>> {
        self.check_index(index)?;
        Ok(self.cursor.get_bool(index)?)
    }

    pub fn get_i64(&self, index: usize) -> Result<Option<i64>> {
        self.check_index(index)?;
        Ok(self.cursor.get_i64(index)?)
    }

    pub fn get_f64(&self, index: usize) -> Result<Option<f64>> {
        self.check_index(index)?;
        Ok(self.cursor.get_f64(index)?)
    }

    pub fn get_decimal(&self, index: usize) -> Result<Option<String>> {
        self.check_index(index)?;
        Ok(self.cursor.get_decimal(index)?)
    }

    pub fn get_text(&self, index: usize) -> Result<Option<String>> {
        self.check_index(index)?;
        Ok(self.cursor.get_text(index)?)
    }

    pub fn get_bytes(&self, index: usize) -> Result<Option<Vec<u8>>> {
        self.check_index(index)?;
        Ok(self.cursor.get_bytes(index)?)
    }

    pub fn get_date(&self, index: usize) -> Result<Option<NaiveDate>> {
        self.check_index(index)?;
        Ok(self.cursor.get_date(index)?)
    }

    pub fn get_time(&self, index: usize) -> Result<Option<NaiveTime>> {
        self.check_index(index)?;
        Ok(self.cursor.get_time(index)?)
    }

    pub fn get_timestamp(&self, index: usize) -> Result<Option<NaiveDateTime>> {
        self.check_index(index)?;
        Ok(self.cursor.get_timestamp(index)?)
    }

    /// Default row mapping: column label to value, in column order. When two
    /// labels differ only in case the first column wins, as in `find_column`.
    pub fn to_map(&self) -> Result<RowMap> {
        let mut map = RowMap::with_capacity(self.columns.len());
        for (position, column) in self.columns.iter().enumerate() {
            if !map.contains_label(&column.name) {
                map.insert(column.name.clone(), self.get(position + 1)?);
            }
        }
        Ok(map)
    }

    pub fn previous(&self) -> Result<bool> {
        Err(Error::UnsupportedOperation)
    }

    pub fn first(&self) -> Result<bool> {
        Err(Error::UnsupportedOperation)
    }

    pub fn last(&self) -> Result<bool> {
        Err(Error::UnsupportedOperation)
    }

    pub fn before_first(&self) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    pub fn after_last(&self) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    pub fn absolute(&self, _row: i64) -> Result<bool> {
        Err(Error::UnsupportedOperation)
    }

    pub fn relative(&self, _rows: i64) -> Result<bool> {
        Err(Error::UnsupportedOperation)
    }

    pub fn update_value(&self, _index: usize, _value: Value) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    pub fn update_row(&self) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    pub fn insert_row(&self) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    pub fn delete_row(&self) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }
}

/// Reads every row of a secondary cursor (generated keys) and closes it.
pub(crate) fn drain<K, T, F>(mut cursor: K, mapper: &mut F) -> Result<Vec<T>>
where
    K: Cursor,
    F: FnMut(&ResultRow<'_, K>) -> Result<T>,
{
    let read = drain_rows(&mut cursor, mapper);
    let closed = cursor.close();
    let rows = read?;
    closed?;
    Ok(rows)
}

fn drain_rows<K, T, F>(cursor: &mut K, mapper: &mut F) -> Result<Vec<T>>
where
    K: Cursor,
    F: FnMut(&ResultRow<'_, K>) -> Result<T>,
{
    let mut shape: Option<Shape<K>> = None;
    let mut rows = Vec::new();
    while cursor.next()? {
        if shape.is_none() {
            shape = Some(Shape::new(cursor.columns()?));
        }
        let Some(shape) = shape.as_ref() else {
            break;
        };
        let row = ResultRow {
            cursor: &*cursor,
            columns: &shape.columns,
            readers: &shape.readers,
        };
        rows.push(mapper(&row)?);
    }
    Ok(rows)
}

/// A registered OUT/INOUT slot of a procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutSlot {
    pub position: usize,
    pub name: String,
    pub sql_type: SqlType,
}

/// Read access to the OUT/INOUT values of a completed call.
pub struct OutParams<'s, S: Statement> {
    statement: &'s S,
    slots: &'s [OutSlot],
}

impl<'s, S: Statement> OutParams<'s, S> {
    pub fn new(statement: &'s S, slots: &'s [OutSlot]) -> Self {
        Self { statement, slots }
    }

    pub fn slots(&self) -> &[OutSlot] {
        self.slots
    }

    /// Value of the OUT slot at a 1-based parameter position.
    pub fn get(&self, position: usize) -> Result<Value> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.position == position)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("Parameter {position} is not an OUT parameter"))
            })?;
        Ok(self.statement.out_value(slot.position, slot.sql_type)?)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Value> {
        let wanted = normalize_name(name);
        let slot = self
            .slots
            .iter()
            .find(|slot| !slot.name.is_empty() && normalize_name(&slot.name) == wanted)
            .ok_or_else(|| Error::InvalidArgument(format!("No OUT parameter named {name}")))?;
        Ok(self.statement.out_value(slot.position, slot.sql_type)?)
    }

    /// All OUT values, in parameter order.
    pub fn values(&self) -> Result<Vec<Value>> {
        self.slots
            .iter()
            .map(|slot| Ok(self.statement.out_value(slot.position, slot.sql_type)?))
            .collect()
    }
}

pub type OutCallback<'h, S> = Box<dyn FnOnce(&OutParams<'_, S>) -> Result<()> + 'h>;

/// Deferred OUT-parameter handler. Fires at most once, on full exhaustion.
enum OutHandler<'h, S: Statement> {
    Unarmed,
    Armed(OutCallback<'h, S>),
    Fired,
}

/// Lazy, single-pass sequence of rows over one statement.
///
/// Walks every result set the statement produces. The statement and the
/// current cursor are closed once the last result set is exhausted, on
/// `close`, on the first error, or on drop, whichever comes first.
pub struct ResultCursor<'h, S: Statement> {
    statement: Option<S>,
    current: Option<S::Cursor>,
    shape: Option<Shape<S::Cursor>>,
    shape_stale: bool,
    out_slots: Vec<OutSlot>,
    out_handler: OutHandler<'h, S>,
    closed: bool,
}

impl<'h, S: Statement> ResultCursor<'h, S> {
    pub fn new(statement: S, current: Option<S::Cursor>) -> Self {
        Self {
            statement: Some(statement),
            current,
            shape: None,
            shape_stale: true,
            out_slots: Vec::new(),
            out_handler: OutHandler::Unarmed,
            closed: false,
        }
    }

    pub(crate) fn with_out_handler(
        mut self,
        slots: Vec<OutSlot>,
        handler: Option<OutCallback<'h, S>>,
    ) -> Self {
        self.out_slots = slots;
        self.out_handler = match handler {
            Some(handler) => OutHandler::Armed(handler),
            None => OutHandler::Unarmed,
        };
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Advances to the next row, moving on to the next result set when the
    /// current one runs out. `None` once everything has been read.
    pub fn next_row(&mut self) -> Result<Option<ResultRow<'_, S::Cursor>>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            let advanced = match self.current.as_mut() {
                Some(cursor) => cursor.next(),
                None => Ok(false),
            };
            match advanced {
                Ok(true) => break,
                Ok(false) => match self.open_next() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.finish()?;
                        return Ok(None);
                    }
                    Err(err) => return Err(self.fail(err)),
                },
                Err(err) => return Err(self.fail(err)),
            }
        }
        if let Err(err) = self.refresh_shape() {
            return Err(self.fail(err));
        }

        match (self.current.as_ref(), self.shape.as_ref()) {
            (Some(cursor), Some(shape)) => Ok(Some(ResultRow {
                cursor,
                columns: &shape.columns,
                readers: &shape.readers,
            })),
            _ => Ok(None),
        }
    }

    /// Closes the exhausted cursor and opens the next result set, if any.
    fn open_next(&mut self) -> DriverResult<bool> {
        if let Some(mut cursor) = self.current.take() {
            cursor.close()?;
        }
        let Some(statement) = self.statement.as_mut() else {
            return Ok(false);
        };
        while statement.more_results()? {
            if let Some(cursor) = statement.result_cursor()? {
                self.current = Some(cursor);
                self.shape_stale = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Column metadata is read once per result set; readers are kept when
    /// the next result set has the same column types.
    fn refresh_shape(&mut self) -> DriverResult<()> {
        if !self.shape_stale {
            return Ok(());
        }
        let Some(cursor) = self.current.as_ref() else {
            return Ok(());
        };
        let columns = cursor.columns()?;
        match self.shape.as_mut() {
            Some(shape) if shape.same_types(&columns) => shape.columns = columns,
            _ => self.shape = Some(Shape::new(columns)),
        }
        self.shape_stale = false;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let fired = self.fire_out_handler();
        self.release();
        fired
    }

    fn fire_out_handler(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.out_handler, OutHandler::Fired) {
            OutHandler::Armed(handler) => {
                let Some(statement) = self.statement.as_ref() else {
                    return Ok(());
                };
                handler(&OutParams::new(statement, &self.out_slots))
            }
            other => {
                self.out_handler = other;
                Ok(())
            }
        }
    }

    fn fail(&mut self, err: DriverError) -> Error {
        let err = Error::from(err);
        log::debug!("Result cursor failed: {err}");
        self.release();
        err
    }

    fn release(&mut self) {
        if let Some(mut cursor) = self.current.take() {
            if let Err(err) = cursor.close() {
                log::warn!("Failed to close result cursor: {err}");
            }
        }
        if let Some(mut statement) = self.statement.take() {
            if let Err(err) = statement.close() {
                log::warn!("Failed to close statement: {err}");
            }
        }
        self.shape = None;
        self.closed = true;
    }

    /// Releases the statement without reading further rows. A registered OUT
    /// handler is not invoked.
    pub fn close(mut self) -> Result<()> {
        let mut outcome = Ok(());
        if let Some(mut cursor) = self.current.take() {
            if let Err(err) = cursor.close() {
                outcome = Err(Error::from(err));
            }
        }
        if let Some(mut statement) = self.statement.take() {
            if let Err(err) = statement.close() {
                if outcome.is_ok() {
                    outcome = Err(Error::from(err));
                }
            }
        }
        self.closed = true;
        outcome
    }

    /// Maps every row through `mapper`, lazily.
    pub fn map<T, F>(self, mapper: F) -> MappedRows<'h, S, F>
    where
        F: FnMut(&ResultRow<'_, S::Cursor>) -> Result<T>,
    {
        MappedRows {
            cursor: self,
            mapper,
        }
    }

    /// Reads the remaining rows with the default row-to-map mapping.
    pub fn into_maps(self) -> Result<Vec<RowMap>> {
        self.map(|row| row.to_map()).collect()
    }
}

impl<'h, S: Statement> Drop for ResultCursor<'h, S> {
    fn drop(&mut self) {
        if !self.closed {
            self.release();
        }
    }
}

/// Iterator adapter returned by [`ResultCursor::map`].
pub struct MappedRows<'h, S: Statement, F> {
    cursor: ResultCursor<'h, S>,
    mapper: F,
}

impl<'h, S: Statement, F> MappedRows<'h, S, F> {
    pub fn into_inner(self) -> ResultCursor<'h, S> {
        self.cursor
    }
}

impl<'h, S, F, T> Iterator for MappedRows<'h, S, F>
where
    S: Statement,
    F: FnMut(&ResultRow<'_, S::Cursor>) -> Result<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let mapped = match self.cursor.next_row() {
            Ok(Some(row)) => (self.mapper)(&row),
            Ok(None) => return None,
            Err(err) => return Some(Err(err)),
        };
        if mapped.is_err() {
            self.cursor.release();
        }
        Some(mapped)
    }
}
