/// Data source trait and closure adapter
pub mod data_source;

/// Data source that loads values with the reqwest HTTP client
#[cfg(feature = "http")]
pub mod http;

pub use data_source::{from_fn, BoxError, DataSource, FnSource};
