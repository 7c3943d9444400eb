use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{AwsPluginConfig, LegacyAwsPluginConfig};
use crate::secrets::{self, SecretsError};

/// Document key of the cluster-wide AWS plugin configuration.
pub const PLUGIN_CONFIG_KEY: &str = "aws.plugin_config";

/// Idempotency marker written once the secret-key migration has run.
pub const MIGRATION_MARKER_KEY: &str = "aws.migrations.encrypt_secret_key";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Config store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error("Malformed config document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Keyed JSON document store, the interface to the cluster configuration
/// service. Implementations must make `put` a full-document overwrite.
pub trait ClusterConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// In-memory store used by tests and local runs.
#[derive(Default)]
pub struct InMemoryClusterConfig {
    docs: Mutex<HashMap<String, Value>>,
}

impl InMemoryClusterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, MigrationError> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), MigrationError> {
        self.put(key, serde_json::to_value(value)?)?;
        Ok(())
    }
}

impl ClusterConfigStore for InMemoryClusterConfig {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .docs
            .lock()
            .expect("config store poisoned")
            .get(key)
            .cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.docs
            .lock()
            .expect("config store poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyApplied,
    Migrated,
    NothingToMigrate,
}

/// One-time upgrade that re-encrypts the plugin's stored AWS secret key.
///
/// The legacy document kept the secret key in plaintext. This rewrites it as
/// an [`crate::secrets::EncryptedValue`] sealed under the node's password
/// secret with a fresh salt, then records a marker so the migration never
/// runs twice.
pub struct EncryptSecretKeyMigration<'a> {
    store: &'a dyn ClusterConfigStore,
    password_secret: &'a str,
}

impl<'a> EncryptSecretKeyMigration<'a> {
    pub fn new(store: &'a dyn ClusterConfigStore, password_secret: &'a str) -> Self {
        Self {
            store,
            password_secret,
        }
    }

    pub fn apply(&self) -> Result<MigrationOutcome, MigrationError> {
        if self.store.get(MIGRATION_MARKER_KEY)?.is_some() {
            debug!("Secret key migration already completed");
            return Ok(MigrationOutcome::AlreadyApplied);
        }

        let legacy = match self.store.get(PLUGIN_CONFIG_KEY)? {
            Some(doc) => Some(serde_json::from_value::<LegacyAwsPluginConfig>(doc)?),
            None => None,
        };

        let outcome = match legacy {
            Some(legacy) => {
                let secret_key = match legacy.secret_key {
                    Some(ref plaintext) => {
                        let salt = secrets::generate_salt();
                        Some(secrets::encrypt(plaintext, self.password_secret, &salt)?)
                    }
                    None => None,
                };
                let migrated = AwsPluginConfig {
                    access_key: legacy.access_key,
                    secret_key,
                    proxy_enabled: legacy.proxy_enabled,
                };
                self.store
                    .put(PLUGIN_CONFIG_KEY, serde_json::to_value(&migrated)?)?;
                info!("Re-encrypted stored AWS secret key");
                MigrationOutcome::Migrated
            }
            None => MigrationOutcome::NothingToMigrate,
        };

        self.store
            .put(MIGRATION_MARKER_KEY, serde_json::json!({ "completed": true }))?;
        Ok(outcome)
    }
}
