// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use strum::{AsRefStr, EnumString};

use crate::{Error, KmsClient, ProviderSettings, Result};

#[cfg(feature = "aws")]
pub mod aws;

pub mod memory;

#[derive(AsRefStr, EnumString, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KmsProvider {
    #[cfg(feature = "aws")]
    #[strum(ascii_case_insensitive)]
    Aws,
}

/// Create a new [`KmsClient`] by given provider name and [`ProviderSettings`]
pub async fn new_client(
    provider_name: &str,
    _provider_settings: ProviderSettings,
) -> Result<Box<dyn KmsClient>> {
    let provider = KmsProvider::try_from(provider_name)
        .map_err(|_| Error::UnsupportedProvider(provider_name.to_string()))?;
    match provider {
        #[cfg(feature = "aws")]
        KmsProvider::Aws => Ok(Box::new(
            aws::AwsKmsClient::from_provider_settings(&_provider_settings).await?,
        ) as Box<dyn KmsClient>),
    }
}
