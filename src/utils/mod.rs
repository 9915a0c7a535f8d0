pub mod config;

pub use config::QueryConfig;
