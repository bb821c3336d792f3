//! A newtype for values that must never be printed, logged, or otherwise
//! leaked through `Debug`/`Display` — registry passwords, KV store tokens.

use std::{convert::Infallible, str::FromStr};

use serde::{Deserialize, Deserializer};

/// A secret string. The only way to get the raw value back out is
/// [`Secret::expose`]; `Debug` and `Display` both print `"[redacted]"`.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    /// Create a secret from a raw string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw secret value. Callers should not log or print the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl FromStr for Secret {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Secret(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[redacted]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[redacted]")
    }
}
