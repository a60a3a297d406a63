//! Custom RPC headers
//!
//! Raw `"name: value"` strings become an ordered [`HeaderSet`] ending in a
//! `user-agent` entry. gRPC treats `user-agent` as a reserved transport
//! header, so it is handed to the channel while everything else is sent as
//! call metadata.

use crate::error::ProbeError;
use std::fmt;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};

pub const USER_AGENT: &str = "user-agent";

/// Split `"name: value"` into a trimmed pair
///
/// Empty pieces between colons are dropped, so `a::b` reads as `a: b`.
/// Exactly two pieces must remain and neither may be blank.
pub fn parse_header(raw: &str) -> Result<(String, String), ProbeError> {
    let invalid = || {
        ProbeError::validation(format!(
            "invalid RPC header, expected 'key: value', got {:?}",
            raw
        ))
    };

    let mut parts = raw.split(':').filter(|part| !part.is_empty());
    let (name, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(value), None) => (name.trim(), value.trim()),
        _ => return Err(invalid()),
    };

    if name.is_empty() || value.is_empty() {
        return Err(invalid());
    }

    Ok((name.to_string(), value.to_string()))
}

/// Ordered (name, value) pairs attached to the health RPC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    /// Parse every raw header in order, then append the user-agent entry
    pub fn compose(raw_headers: &[String], user_agent: &str) -> Result<Self, ProbeError> {
        let mut entries = raw_headers
            .iter()
            .map(|raw| parse_header(raw))
            .collect::<Result<Vec<_>, _>>()?;
        entries.push((USER_AGENT.to_string(), user_agent.to_string()));

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Effective user-agent: the last `user-agent` entry wins
    pub fn user_agent(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| name.eq_ignore_ascii_case(USER_AGENT))
            .map(|(_, value)| value.as_str())
    }

    /// Call metadata for every non-`user-agent` entry, duplicates kept
    pub fn metadata(&self) -> Result<MetadataMap, ProbeError> {
        let mut metadata = MetadataMap::with_capacity(self.entries.len());

        for (name, value) in &self.entries {
            if name.eq_ignore_ascii_case(USER_AGENT) {
                continue;
            }

            let key = AsciiMetadataKey::from_bytes(name.as_bytes()).map_err(|_| {
                ProbeError::validation(format!("invalid RPC header name {:?}", name))
            })?;
            let value = AsciiMetadataValue::try_from(value.as_str()).map_err(|_| {
                ProbeError::validation(format!("invalid value for RPC header {:?}", name))
            })?;

            metadata.append(key, value);
        }

        Ok(metadata)
    }
}

impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{}': '{}'", name, value)?;
        }
        f.write_str("]")
    }
}
