//! Rate limit key construction and validation.

use std::fmt;

use crate::error::{KvGuardError, Result};

/// A key that uniquely identifies a rate-limited caller/action pair.
///
/// Keys are non-empty printable ASCII without whitespace, so they can be
/// embedded in store keys verbatim. The conventional shape is
/// `{scope}:{identity}:{action}`, e.g. `user:42:msg`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Build a `{scope}:{identity}:{action}` key.
    pub fn new(scope: &str, identity: impl fmt::Display, action: &str) -> Result<Self> {
        Self::parse(format!("{}:{}:{}", scope, identity, action))
    }

    /// Validate an already-formatted key.
    pub fn parse(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_key(&key, "rate limit key")?;
        Ok(Self(key))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RateLimitKey {
    type Error = KvGuardError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for RateLimitKey {
    type Error = KvGuardError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Reject empty, non-ASCII, whitespace or control characters.
pub(crate) fn validate_key(key: &str, what: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KvGuardError::invalid(format!("{what} must not be empty")));
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(KvGuardError::invalid(format!(
            "{what} must be printable ASCII without spaces: {key:?}"
        )));
    }
    Ok(())
}
