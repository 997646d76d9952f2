// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("key material has already been destroyed")]
    Destroyed,

    #[error("invalid IV length: expected {expected} octets, got {actual}")]
    InvalidIv { expected: usize, actual: usize },

    #[error("invalid key length: expected {expected} octets, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("authentication tag mismatch")]
    AuthenticationFailed,

    #[error("crypto backend error: {0}")]
    CryptoBackend(String),

    #[error("key material could not be destroyed")]
    DestroyFailed,

    #[error("plaintext buffer could not be scrubbed")]
    ScrubFailed,
}
