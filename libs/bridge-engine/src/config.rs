use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::EngineError;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Listen address of the WebSocket gateway.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default)]
    pub broker: BrokerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            broker: BrokerConfig::default(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    Kafka,
    /// In-process broker, for local development.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,

    #[serde(default = "default_seed_brokers")]
    pub seed_brokers: Vec<String>,

    /// Budget for the reachability probe when a session opens its endpoint.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound of records returned by one poll.
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Where a consumer group without committed offsets starts reading.
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,

    /// Pass-through client properties. Applied last, so they override the above.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            seed_brokers: default_seed_brokers(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_poll_records: default_max_poll_records(),
            send_timeout_ms: default_send_timeout_ms(),
            auto_offset_reset: default_auto_offset_reset(),
            properties: BTreeMap::new(),
        }
    }
}

fn default_broker_kind() -> BrokerKind {
    BrokerKind::Kafka
}
fn default_seed_brokers() -> Vec<String> {
    vec!["localhost:9092".into()]
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_max_poll_records() -> usize {
    500
}
fn default_send_timeout_ms() -> u64 {
    30_000
}
fn default_auto_offset_reset() -> String {
    "earliest".into()
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.broker.kind == BrokerKind::Kafka && self.broker.seed_brokers.is_empty() {
            return Err(EngineError::Config("broker.seed_brokers must not be empty".into()));
        }
        if self.broker.max_poll_records == 0 {
            return Err(EngineError::Config("broker.max_poll_records must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.broker.kind, BrokerKind::Kafka);
        assert_eq!(config.broker.seed_brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.broker.auto_offset_reset, "earliest");
        assert!(config.broker.properties.is_empty());
    }

    #[test]
    fn full_file() {
        let config = BridgeConfig::parse(
            r#"
            bind_address = "127.0.0.1:9000"

            [broker]
            kind = "kafka"
            seed_brokers = ["k1:9092", "k2:9092"]
            connect_timeout_ms = 1000
            max_poll_records = 10
            send_timeout_ms = 2000
            auto_offset_reset = "latest"

            [broker.properties]
            "security.protocol" = "plaintext"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.broker.seed_brokers.len(), 2);
        assert_eq!(config.broker.connect_timeout_ms, 1000);
        assert_eq!(config.broker.max_poll_records, 10);
        assert_eq!(config.broker.send_timeout_ms, 2000);
        assert_eq!(config.broker.auto_offset_reset, "latest");
        assert_eq!(
            config.broker.properties.get("security.protocol").map(String::as_str),
            Some("plaintext")
        );
    }

    #[test]
    fn memory_broker_needs_no_seeds() {
        let config = BridgeConfig::parse(
            r#"
            [broker]
            kind = "memory"
            seed_brokers = []
            "#,
        )
        .unwrap();
        assert_eq!(config.broker.kind, BrokerKind::Memory);
    }

    #[test]
    fn rejects_bad_values() {
        let err = BridgeConfig::parse("[broker]\nseed_brokers = []\n").unwrap_err();
        assert!(err.to_string().contains("seed_brokers"));

        let err = BridgeConfig::parse("[broker]\nmax_poll_records = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_poll_records"));

        let err = BridgeConfig::parse("[broker]\nkind = \"redis\"\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn missing_file_names_path() {
        let err = BridgeConfig::load("/nonexistent/bridge.toml").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("/nonexistent/bridge.toml"));
    }
}
