//! Per-process client identity
//!
//! The identity doubles as the MQTT session identifier and the per-instance
//! presence topic suffix. It is generated once from the creation time and a
//! random token and never changes for the lifetime of the process.

use super::topics::{validate_client_id, ValidationError};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    id: String,
}

impl ClientIdentity {
    /// Generate `{prefix}-{unix_millis}-{token}`
    pub fn generate(prefix: &str) -> Result<Self, ValidationError> {
        validate_client_id(prefix)?;
        Ok(Self::generate_at(prefix, Utc::now()))
    }

    fn generate_at(prefix: &str, created_at: DateTime<Utc>) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{prefix}-{}-{}", created_at.timestamp_millis(), &token[..8]),
        }
    }

    /// Wrap an already-built identifier (used by tests and tooling)
    pub fn from_parts(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_identity_format() {
        let created_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let identity = ClientIdentity::generate_at("device", created_at);

        let parts: Vec<&str> = identity.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "device");
        assert_eq!(parts[1], "1700000000000");
        assert_eq!(parts[2].len(), 8);
        assert!(validate_client_id(identity.as_str()).is_ok());
    }

    #[test]
    fn test_identities_are_unique() {
        let a = ClientIdentity::generate("device").unwrap();
        let b = ClientIdentity::generate("device").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_rejects_invalid_prefix() {
        assert!(ClientIdentity::generate("bad prefix").is_err());
        assert!(ClientIdentity::generate("").is_err());
    }

    #[test]
    fn test_display_matches_as_str() {
        let identity = ClientIdentity::from_parts("device-1-abc");
        assert_eq!(identity.to_string(), "device-1-abc");
    }
}
