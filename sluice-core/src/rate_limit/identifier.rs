//! Derivation of the key a request is counted under.
//!
//! An authenticated user is always counted as `user:<id>`. Anonymous traffic
//! is counted by the first address in the forwarded-for chain, and traffic
//! with no usable address at all shares the single `ip:unknown` bucket.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_ADDRESS: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentifier(String);

impl RequestIdentifier {
    pub fn user(user_id: &str) -> Self {
        Self(format!("user:{user_id}"))
    }

    pub fn ip(address: &str) -> Self {
        Self(format!("ip:{address}"))
    }

    pub fn unknown() -> Self {
        Self::ip(UNKNOWN_ADDRESS)
    }

    /// Derive the identifier from what is known about the caller.
    ///
    /// `forwarded_for` is the raw value of an `X-Forwarded-For` style header.
    pub fn from_request(user_id: Option<&str>, forwarded_for: Option<&str>) -> Self {
        if let Some(user_id) = user_id.map(str::trim).filter(|id| !id.is_empty()) {
            return Self::user(user_id);
        }

        match forwarded_for.and_then(first_forwarded_address) {
            Some(address) => Self::ip(address),
            None => Self::unknown(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Convenience wrapper returning the identifier as a plain string.
pub fn request_identifier(user_id: Option<&str>, forwarded_for: Option<&str>) -> String {
    RequestIdentifier::from_request(user_id, forwarded_for).into_inner()
}

fn first_forwarded_address(header: &str) -> Option<&str> {
    header
        .split(',')
        .next()
        .map(str::trim)
        .filter(|address| !address.is_empty())
}
