use thiserror::Error;
use crate::data_sources::data_source::BoxError;

/// Why a single refresh attempt did not produce a candidate value.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("data source produced no value")]
    Empty,
    #[error("data source failed")]
    Source(#[source] BoxError),
}

/// Errors surfaced by [`RefreshableCache`](crate::cache::RefreshableCache).
///
/// Failures of scheduled or manual refreshes never show up here, they are logged and counted instead.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The initial load performed by `start` failed, the cache holds no value.
    #[error("initial refresh of '{name}' failed")]
    RefreshFailed {
        name: String,
        #[source]
        source: FetchError,
    },
    #[error("cache '{name}' was already started or stopped")]
    AlreadyStarted { name: String },
    #[error("refresh interval of '{name}' must be greater than zero")]
    InvalidInterval { name: String },
}

impl RefreshError {
    /// True for [`RefreshError::RefreshFailed`].
    pub fn is_refresh_failed(&self) -> bool {
        matches!(self, RefreshError::RefreshFailed { .. })
    }
}
