//! Named-parameter SQL queries, stored procedure calls and transacted batch
//! updates over a blocking database driver.
//!
//! A [`Db`] turns SQL text into [`Select`], [`Update`] or [`ProcedureCall`]
//! builders. Results come back through a lazy [`ResultCursor`] that owns its
//! statement until the last row is read or the cursor is closed.

pub mod db;
pub mod utils;

pub use db::{
    ConnectionProvider, Db, Error, GeneratedKeys, NamedBindings, Param, Params, ProcedureCall,
    Result, ResultCursor, ResultRow, Select, SingleConnection, SqlType, TransactionIsolation,
    Update, Value,
};
pub use utils::QueryConfig;
