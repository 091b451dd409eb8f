#![cfg_attr(docsrs, feature(doc_auto_cfg))]
//! In-process cache for a single value that is refreshed on a fixed schedule.
//!
//! A [`RefreshableCache`] loads its first value when started, then asks its
//! [`DataSource`] for a new one every interval. When a refresh fails the last good
//! value keeps being served.
//!
//! ```no_run
//! use std::time::Duration;
//! use refresh_cache::{data_sources, BoxError, RefreshableCache};
//!
//! # async fn run() -> Result<(), refresh_cache::RefreshError> {
//! let source = data_sources::from_fn(|| async { Ok::<_, BoxError>(Some(String::from("v1"))) });
//! let cache: RefreshableCache<String, _> = RefreshableCache::builder(source)
//!     .name("greeting")
//!     .interval(Duration::from_secs(30))
//!     .build()?;
//! cache.start().await?;
//! assert_eq!(cache.get().as_deref().map(String::as_str), Some("v1"));
//! # Ok(())
//! # }
//! ```

/// Refreshable cache and its builder
pub mod cache;
/// Declarative cache settings
pub mod config;
/// Data sources for RefreshableCache instance.
/// Public traits are included to allow easy use of custom implementations.
pub mod data_sources;
/// Errors returned by the cache
pub mod error;
/// Update policies deciding whether a new value replaces the cached one
pub mod policy;
/// Self-starting, config driven wrapper around the cache
pub mod refresher;

pub use cache::{CacheBuilder, RefreshOutcome, RefreshStats, RefreshableCache};
pub use config::{CacheConfig, TimeUnit};
pub use data_sources::{BoxError, DataSource};
pub use error::{FetchError, RefreshError};
pub use policy::{AlwaysReplace, NamedPolicy, ReplaceIfChanged, UpdatePolicy};
pub use refresher::Refresher;
