//! Stream and store wiring
//!
//! The upstream stream controller sends each scorer its consumer and store
//! settings as JSON-encoded strings. This module decodes them and opens the
//! connections the pipeline runs against.

use crate::store::{HistoricalStore, SqlHistoricalStore};
use crate::stream::{EventLogSource, StreamSource};
use etp_common::config::{ResourceSettings, StoreConfig, StreamConfig};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ResourceError {
    /// Settings could not be decoded or failed validation
    #[error("Invalid resource configuration: {0}")]
    Configuration(String),

    /// Settings were fine but the target could not be reached
    #[error("Cannot connect to {target}: {reason}")]
    Connection { target: &'static str, reason: String },
}

/// Body of `POST /init_data_resources`
#[derive(Debug, Clone, Deserialize)]
pub struct DataResourceConfig {
    /// JSON-encoded [`StreamConfig`]
    #[serde(alias = "kafka_config")]
    pub stream_config: String,
    /// JSON-encoded [`StoreConfig`]
    #[serde(alias = "mysql_config")]
    pub store_config: String,
}

impl DataResourceConfig {
    /// Decode and validate both embedded configurations
    pub fn parse(&self) -> Result<ResourceSettings, ResourceError> {
        let stream: StreamConfig = serde_json::from_str(&self.stream_config)
            .map_err(|e| ResourceError::Configuration(format!("stream_config: {}", e)))?;
        let store: StoreConfig = serde_json::from_str(&self.store_config)
            .map_err(|e| ResourceError::Configuration(format!("store_config: {}", e)))?;

        stream
            .validate()
            .map_err(|e| ResourceError::Configuration(e.to_string()))?;
        store
            .validate()
            .map_err(|e| ResourceError::Configuration(e.to_string()))?;

        Ok(ResourceSettings { stream, store })
    }
}

/// An open stream consumer plus a store handle
pub struct Resources {
    source: Box<dyn StreamSource>,
    store: Arc<dyn HistoricalStore>,
    topic: String,
    group_id: String,
}

impl Resources {
    pub fn new(
        source: Box<dyn StreamSource>,
        store: Arc<dyn HistoricalStore>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            store,
            topic: topic.into(),
            group_id: group_id.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub(crate) fn parts(&mut self) -> (&mut dyn StreamSource, &dyn HistoricalStore) {
        (self.source.as_mut(), self.store.as_ref())
    }
}

/// Open the event log consumer and the feature store
///
/// Error reasons name the failure class only; connection targets may carry
/// credentials and never appear in them.
pub async fn connect(settings: &ResourceSettings) -> Result<Resources, ResourceError> {
    let source = EventLogSource::connect(&settings.stream)
        .await
        .map_err(|e| ResourceError::Connection {
            target: "stream",
            reason: reason(&e.to_string()),
        })?;

    let store = SqlHistoricalStore::connect(&settings.store)
        .await
        .map_err(|e| ResourceError::Connection {
            target: "store",
            reason: reason(&e.to_string()),
        })?;

    info!(
        topic = %settings.stream.topics,
        group_id = %settings.stream.group_id,
        "Data resources connected"
    );

    Ok(Resources::new(
        Box::new(source),
        Arc::new(store),
        settings.stream.topics.clone(),
        settings.stream.group_id.clone(),
    ))
}

/// First line of a driver message, with anything URL-like removed
fn reason(message: &str) -> String {
    let line = message.lines().next().unwrap_or_default();
    line.split_whitespace()
        .map(|word| {
            if word.contains("://") || word.starts_with("sqlite:") || word.contains('/') {
                "<target>"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use etp_common::config::OffsetReset;
    use tempfile::TempDir;

    fn body(stream: &str, store: &str) -> DataResourceConfig {
        DataResourceConfig {
            stream_config: stream.to_string(),
            store_config: store.to_string(),
        }
    }

    #[test]
    fn test_parse_accepts_legacy_field_names() {
        let raw = r#"{
            "kafka_config": "{\"bootstrap_servers\": \"sqlite::memory:\", \"topics\": \"user_events\", \"group_id\": \"g1\", \"auto_offset_reset\": \"latest\", \"enable_auto_commit\": false}",
            "mysql_config": "{\"database\": \"features.db\", \"host\": \"ignored\"}"
        }"#;
        let config: DataResourceConfig = serde_json::from_str(raw).unwrap();
        let settings = config.parse().unwrap();

        assert_eq!(settings.stream.topics, "user_events");
        assert_eq!(settings.stream.auto_offset_reset, OffsetReset::Latest);
        assert!(!settings.stream.enable_auto_commit);
        assert_eq!(settings.store.database, "features.db");
        assert!(settings.store.read_only);
    }

    #[test]
    fn test_parse_rejects_bad_json_and_empty_values() {
        assert!(matches!(
            body("{not json", r#"{"database": "x"}"#).parse(),
            Err(ResourceError::Configuration(_))
        ));
        assert!(matches!(
            body(
                r#"{"bootstrap_servers": "a", "topics": "t", "group_id": " "}"#,
                r#"{"database": "x"}"#
            )
            .parse(),
            Err(ResourceError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_fails_for_missing_store() {
        let dir = TempDir::new().unwrap();
        let settings = body(
            &format!(
                r#"{{"bootstrap_servers": "{}", "topics": "t", "group_id": "g"}}"#,
                dir.path().join("events.db").display()
            ),
            &format!(r#"{{"database": "{}"}}"#, dir.path().join("absent.db").display()),
        )
        .parse()
        .unwrap();

        match connect(&settings).await {
            Err(ResourceError::Connection { target, reason }) => {
                assert_eq!(target, "store");
                assert!(!reason.contains("absent.db"));
            }
            Err(other) => panic!("expected store connection error, got {:?}", other),
            Ok(_) => panic!("expected store connection error"),
        }
    }

    #[test]
    fn test_reason_hides_targets() {
        assert_eq!(
            reason("error opening sqlite:///data/x.db: denied\nmore"),
            "error opening <target> denied"
        );
    }
}
