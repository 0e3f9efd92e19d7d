//! Config - relay の設定
//!
//! # 読み込み順（後勝ち）
//! 1. デフォルト値
//! 2. JSON ファイル（`--config`）
//! 3. 環境変数 / CLI フラグ（relay-cli 側で上書き）
//!
//! JSON のキー名は既存デプロイの設定ファイル（`postgresql_url`, `nats_url`,
//! `polling_interval`）に合わせてある。

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ClaimPolicy, RelayError};
use crate::domain::subject::validate_token;
use crate::impls::validate_table_name;

pub const DEFAULT_OUTBOX_TABLE: &str = "events";
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 250;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_RETRY_LIMIT: u32 = 10;
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Deployment environment; selects the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEnvironment {
    Dev,
    Test,
    #[default]
    Prod,
}

impl ServiceEnvironment {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceEnvironment::Dev => "dev",
            ServiceEnvironment::Test => "test",
            ServiceEnvironment::Prod => "prod",
        }
    }
}

impl fmt::Display for ServiceEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(ServiceEnvironment::Dev),
            "test" => Ok(ServiceEnvironment::Test),
            "prod" => Ok(ServiceEnvironment::Prod),
            other => Err(format!(
                "invalid service_environment '{other}', expected dev, test or prod"
            )),
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Stream name and first subject token.
    pub service_name: String,
    pub service_environment: ServiceEnvironment,
    #[serde(rename = "postgresql_url")]
    pub database_url: String,
    #[serde(rename = "nats_url")]
    pub broker_url: String,
    pub outbox_table: String,
    /// Sleep between iterations of one loop (ms). Also the retry interval
    /// for failed records under the `unpublished` claim policy.
    #[serde(rename = "polling_interval")]
    pub polling_interval_ms: u64,
    pub batch_size: usize,
    pub worker_count: usize,
    /// Reserved. Accepted and validated but not consumed by the relay.
    pub retry_limit: u32,
    pub claim_policy: ClaimPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            service_environment: ServiceEnvironment::default(),
            database_url: String::new(),
            broker_url: String::new(),
            outbox_table: DEFAULT_OUTBOX_TABLE.to_string(),
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            retry_limit: DEFAULT_RETRY_LIMIT,
            claim_policy: ClaimPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RelayError> {
        serde_json::from_str(json).map_err(|e| RelayError::Config(format!("invalid config: {e}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RelayError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Check everything `run` needs.
    pub fn validate(&self) -> Result<(), RelayError> {
        self.validate_store()?;
        if self.broker_url.is_empty() {
            return Err(RelayError::Config("nats_url is required".into()));
        }
        Ok(())
    }

    /// Check the fields that table-only commands (`status`, `requeue`) need.
    /// The broker is not consulted.
    pub fn validate_store(&self) -> Result<(), RelayError> {
        if self.service_name.is_empty() {
            return Err(RelayError::Config("service_name is required".into()));
        }
        validate_token(&self.service_name)
            .map_err(|e| RelayError::Config(format!("service_name: {e}")))?;
        if self.database_url.is_empty() {
            return Err(RelayError::Config("postgresql_url is required".into()));
        }
        validate_table_name(&self.outbox_table)
            .map_err(|e| RelayError::Config(format!("outbox_table: {e}")))?;
        if self.batch_size == 0 {
            return Err(RelayError::Config("batch_size must be at least 1".into()));
        }
        if self.worker_count == 0 {
            return Err(RelayError::Config("worker_count must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid() -> RelayConfig {
        RelayConfig {
            service_name: "orders".into(),
            database_url: "postgres://localhost/orders".into(),
            broker_url: "nats://localhost:4222".into(),
            ..RelayConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.service_environment, ServiceEnvironment::Prod);
        assert_eq!(config.outbox_table, "events");
        assert_eq!(config.polling_interval(), Duration::from_millis(250));
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.retry_limit, 10);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.claim_policy, ClaimPolicy::Unpublished);
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[rstest]
    #[case::missing_service(RelayConfig { service_name: String::new(), ..valid() })]
    #[case::dotted_service(RelayConfig { service_name: "orders.eu".into(), ..valid() })]
    #[case::missing_database(RelayConfig { database_url: String::new(), ..valid() })]
    #[case::missing_broker(RelayConfig { broker_url: String::new(), ..valid() })]
    #[case::bad_table(RelayConfig { outbox_table: "events; --".into(), ..valid() })]
    #[case::zero_batch(RelayConfig { batch_size: 0, ..valid() })]
    #[case::zero_workers(RelayConfig { worker_count: 0, ..valid() })]
    fn invalid_config_is_rejected(#[case] config: RelayConfig) {
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn store_only_validation_ignores_the_broker() {
        let config = RelayConfig {
            broker_url: String::new(),
            ..valid()
        };
        assert!(config.validate_store().is_ok());
        assert!(matches!(config.validate(), Err(RelayError::Config(msg)) if msg.contains("nats_url")));

        let config = RelayConfig {
            database_url: String::new(),
            ..valid()
        };
        assert!(config.validate_store().is_err());
    }

    #[test]
    fn json_uses_deployment_key_names_and_fills_defaults() {
        let config = RelayConfig::from_json_str(
            r#"{
                "service_name": "orders",
                "service_environment": "dev",
                "postgresql_url": "postgres://db/orders",
                "nats_url": "nats://nats:4222",
                "polling_interval": 500,
                "claim_policy": "pending_only"
            }"#,
        )
        .unwrap();

        assert_eq!(config.service_environment, ServiceEnvironment::Dev);
        assert_eq!(config.database_url, "postgres://db/orders");
        assert_eq!(config.broker_url, "nats://nats:4222");
        assert_eq!(config.polling_interval_ms, 500);
        assert_eq!(config.claim_policy, ClaimPolicy::PendingOnly);
        assert_eq!(config.outbox_table, "events");
        assert_eq!(config.batch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(r#"{"service_environment": "staging"}"#)]
    #[case(r#"{"batch_size": -1}"#)]
    #[case("not json")]
    fn malformed_json_is_a_config_error(#[case] json: &str) {
        assert!(matches!(
            RelayConfig::from_json_str(json),
            Err(RelayError::Config(_))
        ));
    }

    #[rstest]
    #[case("dev", ServiceEnvironment::Dev)]
    #[case("test", ServiceEnvironment::Test)]
    #[case("prod", ServiceEnvironment::Prod)]
    fn environment_parses(#[case] raw: &str, #[case] expected: ServiceEnvironment) {
        assert_eq!(raw.parse::<ServiceEnvironment>().unwrap(), expected);
        assert_eq!(expected.to_string(), raw);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = RelayConfig::from_json_file(Path::new("/nonexistent/relay.json")).unwrap_err();
        assert!(matches!(err, RelayError::Config(msg) if msg.contains("cannot read")));
    }
}
