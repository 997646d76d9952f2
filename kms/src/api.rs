// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Api definitions for KMS drivers
//!
//! A KMS holds customer master keys (CMKs) and never releases them. The
//! envelope pipeline only asks it for three things, captured by
//! [`KmsClient`]:
//! - `create_cmk`: provision a new master key.
//! - `generate_data_key`: mint a fresh AES-256 data key, returned both in
//!   plaintext and wrapped under a CMK.
//! - `decrypt_data_key`: unwrap a wrapped data key.
//!
//! Public parameters of a driver (region, endpoint, ...) are passed as
//! [`ProviderSettings`]. Credentials are captured inside the driver's
//! constructor and never travel in the settings.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use crypto::SecureKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display};

use crate::Result;

/// ProviderSettings are extra information to create a client
pub type ProviderSettings = Map<String, Value>;

/// Reference to a customer master key held by the KMS.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cmk {
    pub id: String,

    #[serde(default)]
    pub arn: Option<String>,
}

impl Cmk {
    pub fn new(id: impl Into<String>, arn: Option<String>) -> Self {
        Self {
            id: id.into(),
            arn,
        }
    }
}

impl fmt::Display for Cmk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CMK(id={}, arn={})",
            self.id,
            self.arn.as_deref().unwrap_or("<none>")
        )
    }
}

/// A data key encrypted under a CMK. Only the KMS can open it, so it is
/// safe to store and transmit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedDataKey(pub Vec<u8>);

impl WrappedDataKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for WrappedDataKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Result of `generate_data_key`.
#[derive(Debug)]
pub struct DataKey {
    pub wrapped: WrappedDataKey,
    pub plaintext: SecureKey,
}

/// Operations a [`KmsClient`] exposes, used to label metrics and faults.
#[derive(AsRefStr, Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    CreateCmk,
    GenerateDataKey,
    DecryptDataKey,
}

#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Create a new customer master key. Not idempotent: every call
    /// provisions a distinct key.
    async fn create_cmk(&self) -> Result<Cmk>;

    /// Generate a 256-bit AES data key under `cmk`. The plaintext half is
    /// handed over as a [`SecureKey`] and the caller must destroy it.
    async fn generate_data_key(&self, cmk: &Cmk) -> Result<DataKey>;

    /// Unwrap `wrapped`, which must have been produced under `cmk`.
    async fn decrypt_data_key(&self, cmk: &Cmk, wrapped: &WrappedDataKey) -> Result<SecureKey>;
}

#[async_trait]
impl<T: KmsClient + ?Sized> KmsClient for Arc<T> {
    async fn create_cmk(&self) -> Result<Cmk> {
        (**self).create_cmk().await
    }

    async fn generate_data_key(&self, cmk: &Cmk) -> Result<DataKey> {
        (**self).generate_data_key(cmk).await
    }

    async fn decrypt_data_key(&self, cmk: &Cmk, wrapped: &WrappedDataKey) -> Result<SecureKey> {
        (**self).decrypt_data_key(cmk, wrapped).await
    }
}

#[async_trait]
impl<T: KmsClient + ?Sized> KmsClient for Box<T> {
    async fn create_cmk(&self) -> Result<Cmk> {
        (**self).create_cmk().await
    }

    async fn generate_data_key(&self, cmk: &Cmk) -> Result<DataKey> {
        (**self).generate_data_key(cmk).await
    }

    async fn decrypt_data_key(&self, cmk: &Cmk, wrapped: &WrappedDataKey) -> Result<SecureKey> {
        (**self).decrypt_data_key(cmk, wrapped).await
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{Cmk, Operation};

    #[rstest]
    #[case(Cmk::new("1234", Some("arn:aws:kms:eu-west-1:111122223333:key/1234".into())), "CMK(id=1234, arn=arn:aws:kms:eu-west-1:111122223333:key/1234)")]
    #[case(Cmk::new("alias/test", None), "CMK(id=alias/test, arn=<none>)")]
    fn cmk_display(#[case] cmk: Cmk, #[case] expected: &str) {
        assert_eq!(cmk.to_string(), expected);
    }

    #[test]
    fn operation_names() {
        assert_eq!(Operation::GenerateDataKey.as_ref(), "generate_data_key");
        assert_eq!(Operation::CreateCmk.to_string(), "create_cmk");
    }
}
