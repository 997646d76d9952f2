// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Crypto
//!
//! Key material handling and the symmetric cipher used by the envelope
//! pipeline. Features select the AES-256-GCM backend:
//! - `rust-crypto`: Use purely rust.
//! - `openssl`: Use openssl. If `rust-crypto` and `openssl` are both
//!   enabled, use `openssl`.
//!
//! ## Components
//!
//! - `key`: [`SecureKey`], a plaintext data key that is scrubbed on destroy.
//! - `buffer`: [`SecureBuffer`], locked scratch memory for transient plaintext.
//! - `cipher`: AES-256-GCM with a 16 byte IV and a 16 byte inline tag.

#[cfg(feature = "openssl")]
mod native;
#[cfg(all(feature = "rust-crypto", not(feature = "openssl")))]
mod rust;

pub mod buffer;
pub use buffer::SecureBuffer;

pub mod cipher;
pub use cipher::*;

pub mod error;
pub use error::*;

pub mod key;
pub use key::{DestroyWatch, SecureKey};

mod memory;

pub mod rand;
