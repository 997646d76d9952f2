// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("KMS is unavailable, retries exhausted: {0}")]
    KmsTransient(#[source] kms::Error),

    #[error("KMS refused the request: {0}")]
    KmsPermanent(#[source] kms::Error),

    #[error("message failed authentication")]
    CryptoAuthenticationFailed,

    #[error("crypto backend error: {0}")]
    CryptoBackend(String),

    #[error("key material was used after it had been destroyed")]
    Destroyed,

    #[error("plaintext memory could not be scrubbed")]
    ScrubFailed,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("processor failed")]
    Processor(#[source] anyhow::Error),

    #[error("blocking crypto task did not complete: {0}")]
    Executor(String),

    #[error("malformed message: {0}")]
    Codec(String),
}

impl From<crypto::Error> for Error {
    fn from(e: crypto::Error) -> Self {
        match e {
            crypto::Error::AuthenticationFailed => Error::CryptoAuthenticationFailed,
            crypto::Error::Destroyed => Error::Destroyed,
            crypto::Error::DestroyFailed | crypto::Error::ScrubFailed => Error::ScrubFailed,
            e @ (crypto::Error::InvalidIv { .. }
            | crypto::Error::InvalidKeyLength { .. }
            | crypto::Error::CryptoBackend(_)) => Error::CryptoBackend(e.to_string()),
        }
    }
}

impl From<kms::Error> for Error {
    fn from(e: kms::Error) -> Self {
        match e {
            kms::Error::Transient(_) => Error::KmsTransient(e),
            kms::Error::Configuration(_) | kms::Error::UnsupportedProvider(_) => {
                Error::Configuration(e.to_string())
            }
            kms::Error::Crypto(e) => e.into(),
            kms::Error::Unauthorized(_)
            | kms::Error::KeyDisabled(_)
            | kms::Error::NotFound(_)
            | kms::Error::BadRequest(_) => Error::KmsPermanent(e),
        }
    }
}
