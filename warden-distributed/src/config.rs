//! Distributed lock configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::store::KEY_PREFIX;

/// Lease lifetime used when none (or zero) is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// How the renewer extends a held lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenewalPolicy {
    /// Extend only while the remote value still equals this handle's token.
    #[default]
    Checked,
    /// Extend whatever currently lives under the key. A renewer that outlived
    /// its own lease will extend the next holder's lease.
    Unchecked,
}

impl RenewalPolicy {
    /// Parse `checked` / `unchecked`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "checked" => Some(Self::Checked),
            "unchecked" => Some(Self::Unchecked),
            _ => None,
        }
    }
}

/// Distributed lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease lifetime; renewed every `ttl / 2` while held.
    #[serde(with = "millis_serde", default = "default_ttl")]
    pub ttl: Duration,
    /// Prefix applied to every resource name.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Renewal policy.
    #[serde(default)]
    pub renewal: RenewalPolicy,
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_namespace() -> String {
    KEY_PREFIX.to_string()
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            namespace: default_namespace(),
            renewal: RenewalPolicy::default(),
        }
    }
}

impl LockConfig {
    /// Load configuration from environment variables.
    ///
    /// - `WARDEN_LOCK_TTL_MS` - lease lifetime in milliseconds
    /// - `WARDEN_LOCK_NAMESPACE` - key prefix
    /// - `WARDEN_LOCK_RENEWAL` - `checked` or `unchecked`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ttl) = std::env::var("WARDEN_LOCK_TTL_MS")
            && let Ok(ms) = ttl.parse::<u64>() {
                config.ttl = Duration::from_millis(ms);
            }

        if let Ok(namespace) = std::env::var("WARDEN_LOCK_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Some(policy) = std::env::var("WARDEN_LOCK_RENEWAL")
            .ok()
            .and_then(|s| RenewalPolicy::parse(&s))
        {
            config.renewal = policy;
        }

        config
    }

    /// TTL actually used: zero falls back to [`DEFAULT_TTL`].
    pub fn effective_ttl(&self) -> Duration {
        if self.ttl.is_zero() { DEFAULT_TTL } else { self.ttl }
    }
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
