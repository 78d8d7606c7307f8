//! Resource keys and cached entries
//!
//! A [`CachedEntry`] is immutable once built. Updating a key means building
//! a new entry and handing it to the backends, which replace the old one
//! wholesale.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a cacheable unit, e.g. an API route plus query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&ResourceKey> for ResourceKey {
    fn from(key: &ResourceKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an entry's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Ephemeral request cache
    #[serde(rename = "cache")]
    RequestCache,
    /// Key-value store
    #[serde(rename = "localStorage")]
    KeyValue,
    /// Structured store
    #[serde(rename = "indexedDb")]
    Structured,
    /// Caller-supplied origin fetch
    #[serde(rename = "network")]
    Network,
}

impl Origin {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCache => "cache",
            Self::KeyValue => "localStorage",
            Self::Structured => "indexedDb",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value stored in one or more backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry {
    key: ResourceKey,
    value: serde_json::Value,
    stored_at: DateTime<Utc>,
    origin: Origin,
}

impl CachedEntry {
    /// Build an entry stamped with the current time
    pub fn new(key: impl Into<ResourceKey>, value: serde_json::Value, origin: Origin) -> Self {
        Self::with_timestamp(key, value, origin, Utc::now())
    }

    pub fn with_timestamp(
        key: impl Into<ResourceKey>,
        value: serde_json::Value,
        origin: Origin,
        stored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at,
            origin,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Deserialize the payload into a concrete type
    pub fn value_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.value)
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Approximate footprint used for quota accounting
    pub fn size_hint(&self) -> u64 {
        let value_len = serde_json::to_vec(&self.value)
            .map(|v| v.len())
            .unwrap_or_default();
        (self.key.as_str().len() + value_len) as u64
    }
}
