use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secrets::EncryptedValue;

/// Default bound on how long record processing waits for throttling to clear
/// before the consumer shuts itself down.
pub const DEFAULT_THROTTLED_WAIT: Duration = Duration::from_secs(60);

/// Default spacing between checkpoint commits for one shard.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unknown AWS region: {0}")]
    InvalidRegion(String),

    #[error("Stream name must not be empty")]
    MissingStreamName,

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// AWS regions a Kinesis stream can live in.
///
/// Parsing an unknown region name is a launch failure, never a runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    UsEast1,
    UsEast2,
    UsWest1,
    UsWest2,
    CaCentral1,
    EuWest1,
    EuWest2,
    EuWest3,
    EuCentral1,
    EuNorth1,
    ApSouth1,
    ApNortheast1,
    ApNortheast2,
    ApSoutheast1,
    ApSoutheast2,
    SaEast1,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast1 => "us-east-1",
            Region::UsEast2 => "us-east-2",
            Region::UsWest1 => "us-west-1",
            Region::UsWest2 => "us-west-2",
            Region::CaCentral1 => "ca-central-1",
            Region::EuWest1 => "eu-west-1",
            Region::EuWest2 => "eu-west-2",
            Region::EuWest3 => "eu-west-3",
            Region::EuCentral1 => "eu-central-1",
            Region::EuNorth1 => "eu-north-1",
            Region::ApSouth1 => "ap-south-1",
            Region::ApNortheast1 => "ap-northeast-1",
            Region::ApNortheast2 => "ap-northeast-2",
            Region::ApSoutheast1 => "ap-southeast-1",
            Region::ApSoutheast2 => "ap-southeast-2",
            Region::SaEast1 => "sa-east-1",
        }
    }

    pub fn all() -> &'static [Region] {
        &[
            Region::UsEast1,
            Region::UsEast2,
            Region::UsWest1,
            Region::UsWest2,
            Region::CaCentral1,
            Region::EuWest1,
            Region::EuWest2,
            Region::EuWest3,
            Region::EuCentral1,
            Region::EuNorth1,
            Region::ApSouth1,
            Region::ApNortheast1,
            Region::ApNortheast2,
            Region::ApSoutheast1,
            Region::ApSoutheast2,
            Region::SaEast1,
        ]
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Region::all()
            .iter()
            .copied()
            .find(|region| region.as_str() == normalized)
            .ok_or_else(|| ConfigError::InvalidRegion(s.to_string()))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-input configuration for one Kinesis stream consumer.
#[derive(Debug, Clone)]
pub struct KinesisInputConfig {
    pub stream_name: String,
    pub region: Region,
    /// Access key of an AWS user with sufficient permissions. Optional; the
    /// provider chain is used when absent.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Role ARN with required permissions (cross account access).
    pub assume_role_arn: Option<String>,
    pub proxy_url: Option<String>,
    /// Upper bound on records per fetched batch. None keeps the coordination
    /// service default.
    pub record_batch_size: Option<usize>,
    pub max_throttle_wait: Duration,
    pub checkpoint_interval: Duration,
    /// Stable identity of this node in the lease table.
    pub worker_id: Option<String>,
}

impl KinesisInputConfig {
    pub fn new(stream_name: impl Into<String>, region: Region) -> Self {
        Self {
            stream_name: stream_name.into(),
            region,
            access_key: None,
            secret_key: None,
            assume_role_arn: None,
            proxy_url: None,
            record_batch_size: None,
            max_throttle_wait: DEFAULT_THROTTLED_WAIT,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            worker_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_name.trim().is_empty() {
            return Err(ConfigError::MissingStreamName);
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let stream_name = env::var("KINESIS_STREAM_NAME")
            .map_err(|_| ConfigError::MissingEnvVar("KINESIS_STREAM_NAME".to_string()))?;
        let region: Region = env::var("AWS_REGION")
            .map_err(|_| ConfigError::MissingEnvVar("AWS_REGION".to_string()))?
            .parse()?;

        let mut config = Self::new(stream_name, region);
        config.access_key = env::var("AWS_ACCESS_KEY_ID").ok();
        config.secret_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        config.assume_role_arn = env::var("AWS_ASSUME_ROLE_ARN").ok();
        config.proxy_url = env::var("HTTP_PROXY").ok();

        if let Ok(val) = env::var("MAX_THROTTLE_WAIT_MS") {
            let millis: u64 = val
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MAX_THROTTLE_WAIT_MS", val))?;
            config.max_throttle_wait = Duration::from_millis(millis);
        }
        if let Ok(val) = env::var("RECORD_BATCH_SIZE") {
            let size: usize = val
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RECORD_BATCH_SIZE", val))?;
            config.record_batch_size = Some(size);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Cluster-wide AWS plugin settings persisted as a JSON document.
///
/// The secret key is stored encrypted at rest; see the migration module for
/// the upgrade path from the legacy plaintext form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsPluginConfig {
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<EncryptedValue>,
    #[serde(default)]
    pub proxy_enabled: bool,
}

impl AwsPluginConfig {
    /// Opens the stored secret key with the node's password secret.
    pub fn decrypted_secret_key(
        &self,
        password_secret: &str,
    ) -> Result<Option<String>, crate::secrets::SecretsError> {
        self.secret_key
            .as_ref()
            .map(|sealed| crate::secrets::decrypt(sealed, password_secret))
            .transpose()
    }
}

/// Pre-migration document shape with the secret key still in plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyAwsPluginConfig {
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub proxy_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_round_trips_through_str() {
        for region in Region::all() {
            let parsed: Region = region.as_str().parse().expect("known region");
            assert_eq!(*region, parsed);
        }
    }

    #[test]
    fn unknown_region_is_rejected() {
        let err = "us-moon-1".parse::<Region>().expect_err("invalid region");
        assert!(matches!(err, ConfigError::InvalidRegion(name) if name == "us-moon-1"));
    }

    #[test]
    fn region_parse_trims_and_lowercases() {
        let parsed: Region = " EU-WEST-1 ".parse().expect("region");
        assert_eq!(parsed, Region::EuWest1);
    }

    #[test]
    fn defaults_match_transport_policy() {
        let config = KinesisInputConfig::new("logs", Region::UsEast1);
        assert_eq!(config.max_throttle_wait, Duration::from_secs(60));
        assert_eq!(config.checkpoint_interval, Duration::from_secs(60));
        assert!(config.record_batch_size.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_stream_name_fails_validation() {
        let config = KinesisInputConfig::new("  ", Region::UsEast1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingStreamName)
        ));
    }

    #[test]
    fn plugin_config_secret_key_round_trips() {
        let salt = crate::secrets::generate_salt();
        let sealed = crate::secrets::encrypt("aws-secret", "password-secret", &salt)
            .expect("encrypt");
        let config = AwsPluginConfig {
            access_key: Some("AKIAEXAMPLE".to_string()),
            secret_key: Some(sealed),
            proxy_enabled: false,
        };
        assert_eq!(
            config
                .decrypted_secret_key("password-secret")
                .expect("decrypt")
                .as_deref(),
            Some("aws-secret")
        );

        let empty = AwsPluginConfig {
            access_key: None,
            secret_key: None,
            proxy_enabled: false,
        };
        assert!(empty
            .decrypted_secret_key("password-secret")
            .expect("no secret")
            .is_none());
    }
}
