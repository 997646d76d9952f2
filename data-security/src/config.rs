// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Pipeline configuration.
//!
//! Sources, lowest precedence first:
//! - built-in defaults, seeded from `AWS_REGION` and `KMS_ENDPOINT`
//! - the configuration file, any format supported by the `config` crate
//! - `DATA_SECURITY__*` environment variables, e.g.
//!   `DATA_SECURITY__KMS__REGION=us-east-1`

use std::{env, path::Path, sync::Arc};

use config::{Config, Environment, File};
use kms::{KmsClient, ProviderSettings, RetryProfile, RetryingKmsClient};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::{Error, Result};

pub const CONFIG_PATH_ENV: &str = "DATA_SECURITY_CONFIG_PATH";

const ENV_PREFIX: &str = "DATA_SECURITY";

const DEFAULT_PROVIDER: &str = "aws";

const DEFAULT_REGION: &str = "eu-west-1";

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct KmsConfig {
    pub provider: String,

    pub region: String,

    /// KMS endpoint. Defaults to `https://kms.<region>.amazonaws.com`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Role used by producers.
    #[serde(default)]
    pub encrypt_role: Option<String>,

    /// Role used by consumers.
    #[serde(default)]
    pub decrypt_role: Option<String>,

    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub profile: RetryProfile,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct PipelineConfig {
    pub kms: KmsConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Which side of the pipeline a KMS client is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Encrypt,
    Decrypt,
}

impl PipelineConfig {
    /// Load the configuration. Without `config_path` the path is taken from
    /// `DATA_SECURITY_CONFIG_PATH`; without either, defaults and the
    /// environment are used.
    pub fn new(config_path: Option<String>) -> Result<Self> {
        let config_path = config_path.or_else(|| {
            if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
                debug!("Read config path from env: {env_path}");
                return Some(env_path);
            }
            None
        });

        if let Some(path) = &config_path {
            info!("Use configuration file {path}");
            if !Path::new(path).exists() {
                return Err(Error::Configuration(format!(
                    "Config file {path} not found."
                )));
            }
        }

        let config = Self::load(config_path.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    fn load(config_path: Option<&str>) -> Result<Self> {
        let to_error = |e: config::ConfigError| Error::Configuration(e.to_string());

        let region = env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let mut builder = Config::builder()
            .set_default("kms.provider", DEFAULT_PROVIDER)
            .map_err(to_error)?
            .set_default("kms.region", region)
            .map_err(to_error)?;
        if let Ok(endpoint) = env::var("KMS_ENDPOINT") {
            builder = builder
                .set_default("kms.endpoint", endpoint)
                .map_err(to_error)?;
        }
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(to_error)?
            .try_deserialize()
            .map_err(|e| Error::Configuration(format!("invalid config: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.kms.region.trim().is_empty() {
            return Err(Error::Configuration("kms.region must be set".into()));
        }
        Url::parse(&self.kms_endpoint()).map_err(|e| {
            Error::Configuration(format!(
                "malformed KMS endpoint `{}`: {e}",
                self.kms_endpoint()
            ))
        })?;
        Ok(())
    }

    /// The configured endpoint, or the regional default.
    pub fn kms_endpoint(&self) -> String {
        self.kms
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://kms.{}.amazonaws.com", self.kms.region))
    }

    /// [`ProviderSettings`] for a client acting as `role`.
    pub fn provider_settings(&self, role: Role) -> ProviderSettings {
        let role_arn = match role {
            Role::Encrypt => &self.kms.encrypt_role,
            Role::Decrypt => &self.kms.decrypt_role,
        };

        let settings = json!({
            "region": self.kms.region,
            "endpoint": self.kms_endpoint(),
            "role_arn": role_arn,
            "attempt_timeout_ms": self.kms.attempt_timeout_ms,
        });
        match settings {
            Value::Object(map) => map,
            _ => ProviderSettings::new(),
        }
    }

    /// Build the retrying KMS client for `role`.
    pub async fn kms_client(&self, role: Role) -> Result<Arc<dyn KmsClient>> {
        let client =
            kms::new_client(&self.kms.provider, self.provider_settings(role)).await?;
        Ok(Arc::new(RetryingKmsClient::new(client, self.retry.profile)))
    }
}
