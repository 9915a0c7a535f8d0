pub mod connection;
pub mod database;
pub mod error;
#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "oracle")]
pub mod oracle;
pub mod query;
pub mod session;
pub mod value;

pub use connection::*;
pub use database::*;
pub use error::{chain_message, DriverError, DriverErrorKind, Error, Result};
pub use query::*;
pub use session::*;
pub use value::*;
