mod classify;
mod cursor;
mod executor;
mod params;
mod script;
mod types;

pub use classify::{classify, is_dml, is_procedure_call};
pub use cursor::{
    reader_for, MappedRows, OutCallback, OutParams, OutSlot, Reader, ResultCursor, ResultRow,
};
pub use executor::*;
pub use params::{check_positional, check_uniform_style, named_tokens, resolve, resolve_call};
pub use script::normalize;
pub use types::*;
