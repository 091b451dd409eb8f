use std::error::Error;
use std::future::Future;

/// Error type returned by data sources.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Source of fresh values for a [`RefreshableCache`](crate::cache::RefreshableCache).
///
/// A successful call either yields a value or `Ok(None)` when there is nothing to load.
/// The cache treats `Ok(None)` exactly like an error: the attempt fails and the
/// cached value stays untouched.
///
/// The cache never calls `produce` concurrently with itself.
/// # Errors
/// Any error can be returned by custom implementation.
pub trait DataSource<Data>: Send + Sync {
    /// Try to produce one value
    fn produce(&self) -> impl Future<Output = Result<Option<Data>, BoxError>> + Send;

    /// Name used in diagnostics when the cache is not given one explicitly.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }
}

/// [`DataSource`] backed by an async closure. See [`from_fn`].
#[derive(Clone)]
pub struct FnSource<F> {
    f: F,
}

/// Wrap an async closure as a [`DataSource`].
///
/// ```
/// use refresh_cache::data_sources::from_fn;
///
/// let source = from_fn(|| async { Ok::<_, refresh_cache::BoxError>(Some(42u32)) });
/// ```
pub fn from_fn<Data, F, Fut>(f: F) -> FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Data>, BoxError>> + Send,
{
    FnSource { f }
}

impl<Data, F, Fut> DataSource<Data> for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Data>, BoxError>> + Send,
{
    fn produce(&self) -> impl Future<Output = Result<Option<Data>, BoxError>> + Send {
        (self.f)()
    }
}
