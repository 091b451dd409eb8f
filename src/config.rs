use std::time::Duration;
use crate::error::RefreshError;
use crate::policy::NamedPolicy;

/// Unit of [`CacheConfig::refresh_interval`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TimeUnit {
    Millis,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Millis => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3600)),
        }
    }
}

/// Declarative cache settings, usually loaded from the host application's config file.
///
/// ```
/// # #[cfg(feature = "json")] {
/// use refresh_cache::config::{CacheConfig, TimeUnit};
///
/// let config: CacheConfig = serde_json::from_str(r#"{
///     "name": "feature-flags",
///     "refresh_interval": 30,
///     "time_unit": "seconds",
///     "update_policy": "if_changed"
/// }"#).unwrap();
/// assert!(config.periodic_refresh);
/// assert_eq!(config.time_unit, TimeUnit::Seconds);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
    /// Diagnostic name, only used in logs
    pub name: String,
    pub refresh_interval: u64,
    pub time_unit: TimeUnit,
    /// When false the value only changes through manual refreshes
    pub periodic_refresh: bool,
    pub update_policy: NamedPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            name: "refresh-cache".to_string(),
            refresh_interval: 60,
            time_unit: TimeUnit::Seconds,
            periodic_refresh: true,
            update_policy: NamedPolicy::Always,
        }
    }
}

impl CacheConfig {
    /// Refresh interval as a [`Duration`].
    /// # Errors
    /// [`RefreshError::InvalidInterval`] if the interval is zero.
    pub fn interval(&self) -> Result<Duration, RefreshError> {
        if self.refresh_interval == 0 {
            return Err(RefreshError::InvalidInterval { name: self.name.clone() });
        }
        Ok(self.time_unit.to_duration(self.refresh_interval))
    }
}
