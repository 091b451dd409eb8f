/// Decides whether a freshly produced value replaces the cached one.
///
/// Called with the value about to be displaced (`None` before the first accepted value)
/// and the new candidate. Must not have side effects.
/// A rejected candidate is not a failure: the cache keeps its value and timestamp.
pub trait UpdatePolicy<Data>: Send + Sync {
    fn should_replace(&self, current: Option<&Data>, candidate: &Data) -> bool;
}

/// Accepts every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReplace;

impl<Data> UpdatePolicy<Data> for AlwaysReplace {
    fn should_replace(&self, _current: Option<&Data>, _candidate: &Data) -> bool {
        true
    }
}

/// Rejects candidates equal to the cached value, so the last update timestamp only moves
/// when the data actually changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceIfChanged;

impl<Data: PartialEq> UpdatePolicy<Data> for ReplaceIfChanged {
    fn should_replace(&self, current: Option<&Data>, candidate: &Data) -> bool {
        current != Some(candidate)
    }
}

/// Policy backed by a closure. See [`from_fn`].
#[derive(Clone)]
pub struct FnPolicy<F> {
    f: F,
}

/// Wrap a predicate as an [`UpdatePolicy`].
///
/// ```
/// use refresh_cache::policy::from_fn;
///
/// // never replace with an empty list
/// let policy = from_fn(|_current: Option<&Vec<u32>>, candidate: &Vec<u32>| !candidate.is_empty());
/// ```
pub fn from_fn<Data, F>(f: F) -> FnPolicy<F>
where
    F: Fn(Option<&Data>, &Data) -> bool + Send + Sync,
{
    FnPolicy { f }
}

impl<Data, F> UpdatePolicy<Data> for FnPolicy<F>
where
    F: Fn(Option<&Data>, &Data) -> bool + Send + Sync,
{
    fn should_replace(&self, current: Option<&Data>, candidate: &Data) -> bool {
        (self.f)(current, candidate)
    }
}

/// Policies that can be selected by name from a [`CacheConfig`](crate::config::CacheConfig).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NamedPolicy {
    #[default]
    Always,
    IfChanged,
}

impl<Data: PartialEq> UpdatePolicy<Data> for NamedPolicy {
    fn should_replace(&self, current: Option<&Data>, candidate: &Data) -> bool {
        match self {
            NamedPolicy::Always => AlwaysReplace.should_replace(current, candidate),
            NamedPolicy::IfChanged => ReplaceIfChanged.should_replace(current, candidate),
        }
    }
}
