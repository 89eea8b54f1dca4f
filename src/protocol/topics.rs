//! Topic normalization and identifier validation
//!
//! Status and command topics come from configuration; they are normalized once
//! and validated so that publish topics never contain MQTT wildcards.

use super::identity::ClientIdentity;
use thiserror::Error;

/// Collapse repeated separators and strip trailing slashes
///
/// A leading slash is preserved because `/a/b` and `a/b` are distinct MQTT
/// topics.
pub fn normalize_topic(topic: &str) -> String {
    let mut result = topic.to_string();

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    while result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

pub fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    if client_id.is_empty() {
        return Err(ValidationError::EmptyClientId);
    }

    for ch in client_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validate a topic used for publishing or exact-match subscription
pub fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() || topic == "/" {
        return Err(ValidationError::EmptyTopic);
    }

    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(ValidationError::InvalidTopicChar {
            topic: topic.to_string(),
            ch,
        });
    }

    Ok(())
}

/// Validation errors for identifiers and topics
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic '{topic}' contains invalid character: '{ch}'")]
    InvalidTopicChar { topic: String, ch: char },
}

/// Topic construction for presence and commands
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build the status topic, optionally suffixed with the client identity:
    /// `{base}/{client_id}`
    pub fn build_status_topic(base: &str, identity: &ClientIdentity, per_instance: bool) -> String {
        if per_instance {
            normalize_topic(&format!("{base}/{}", identity.as_str()))
        } else {
            normalize_topic(base)
        }
    }

    pub fn build_command_topic(base: &str) -> String {
        normalize_topic(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn normalize_topic_is_idempotent(topic in ".*") {
            let first = normalize_topic(&topic);
            let second = normalize_topic(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn normalize_topic_has_no_double_slashes(topic in "[a-z/]*") {
            let result = normalize_topic(&topic);
            prop_assert!(!result.contains("//"), "Topic should not contain //: {}", result);
        }

        #[test]
        fn normalize_topic_has_no_trailing_slash(topic in "[a-z]+[a-z/]*") {
            let result = normalize_topic(&topic);
            prop_assert!(!result.ends_with('/'), "Topic should not end with /: {}", result);
        }

        #[test]
        fn valid_client_ids_accepted(id in "[a-zA-Z0-9._-]{1,40}") {
            prop_assert!(validate_client_id(&id).is_ok());
        }
    }

    #[test]
    fn test_normalize_topic_examples() {
        assert_eq!(normalize_topic("clients/status"), "clients/status");
        assert_eq!(normalize_topic("clients//status/"), "clients/status");
        assert_eq!(normalize_topic("/clients/status//"), "/clients/status");
        assert_eq!(normalize_topic("/"), "/");
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("device-01_a.b").is_ok());
        assert_eq!(validate_client_id(""), Err(ValidationError::EmptyClientId));
        assert_eq!(
            validate_client_id("dev ice"),
            Err(ValidationError::InvalidClientIdChar(' '))
        );
        assert_eq!(
            validate_client_id("dev/ice"),
            Err(ValidationError::InvalidClientIdChar('/'))
        );
    }

    #[test]
    fn test_validate_topic_rejects_wildcards() {
        assert!(validate_topic("clients/status").is_ok());
        assert_eq!(validate_topic(""), Err(ValidationError::EmptyTopic));
        assert!(matches!(
            validate_topic("clients/+/status"),
            Err(ValidationError::InvalidTopicChar { ch: '+', .. })
        ));
        assert!(matches!(
            validate_topic("clients/#"),
            Err(ValidationError::InvalidTopicChar { ch: '#', .. })
        ));
    }

    #[test]
    fn test_status_topic_construction() {
        let identity = ClientIdentity::from_parts("device-1700000000000-abcd1234");

        assert_eq!(
            TopicBuilder::build_status_topic("clients/status/", &identity, true),
            "clients/status/device-1700000000000-abcd1234"
        );
        assert_eq!(
            TopicBuilder::build_status_topic("clients/status/", &identity, false),
            "clients/status"
        );
        assert_eq!(
            TopicBuilder::build_command_topic("clients//commands"),
            "clients/commands"
        );
    }
}
