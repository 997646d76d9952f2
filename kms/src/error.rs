// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Network failure, throttling, a 5xx answer or a timed out attempt.
    /// Only this kind is retried.
    #[error("transient KMS failure: {0}")]
    Transient(String),

    #[error("KMS denied access to the key: {0}")]
    Unauthorized(String),

    #[error("KMS key is disabled: {0}")]
    KeyDisabled(String),

    #[error("KMS key not found: {0}")]
    NotFound(String),

    #[error("KMS rejected the request: {0}")]
    BadRequest(String),

    #[error("KMS client configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("data key handling failed: {0}")]
    Crypto(#[from] crypto::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
