// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Plaintext data keys.
//!
//! A [`SecureKey`] owns the only copy of a plaintext data key. The key is
//! `Live` until [`SecureKey::destroy`] runs, then `Destroyed` for good: the
//! bytes are zeroed and every later use fails with [`Error::Destroyed`].
//! Dropping a live key destroys it, so a key never outlives the scope that
//! owns it, including when a future holding it is cancelled.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::warn;
use strum::{AsRefStr, Display, EnumString};

use crate::{memory::LockedBytes, Error, Result, IV_LENGTH, TAG_LENGTH};

/// Algorithms a data key may be used with.
#[derive(AsRefStr, Display, EnumString, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    #[strum(serialize = "AES-256-GCM")]
    Aes256Gcm,
}

pub struct SecureKey {
    bytes: LockedBytes,
    destroyed: Arc<AtomicBool>,
}

impl SecureKey {
    /// Copy `bytes` into locked storage. The caller should scrub its own copy.
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: LockedBytes::from_slice(bytes),
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Gcm
    }

    /// IV length in octets.
    pub fn iv_length(&self) -> usize {
        IV_LENGTH
    }

    /// Authentication tag length in bits.
    pub fn tag_length_bits(&self) -> usize {
        TAG_LENGTH * 8
    }

    pub fn len(&self) -> usize {
        self.bytes.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with a read-only view of the key bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        if self.is_destroyed() {
            return Err(Error::Destroyed);
        }
        Ok(f(self.bytes.as_slice()))
    }

    /// Zero the key bytes and mark the key destroyed. Calling it again is
    /// a no-op.
    pub fn destroy(&mut self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }

        if !self.bytes.scrub() {
            return Err(Error::DestroyFailed);
        }
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// A handle that observes whether this key has been destroyed without
    /// holding any key material.
    pub fn watch(&self) -> DestroyWatch {
        DestroyWatch {
            destroyed: self.destroyed.clone(),
        }
    }

    /// Scoped release: run `f` with the key and destroy the key afterwards.
    ///
    /// The key is destroyed on every exit path. If `f` panics the key is
    /// destroyed while unwinding.
    pub fn consume<R>(mut self, f: impl FnOnce(&SecureKey) -> R) -> Result<R> {
        let res = f(&self);
        self.destroy()?;
        Ok(res)
    }
}

impl Drop for SecureKey {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!("destroying data key on drop failed: {e}");
        }
    }
}

impl fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureKey([REDACTED])")
    }
}

/// Read-only view of a [`SecureKey`]'s destroyed flag.
#[derive(Clone, Debug)]
pub struct DestroyWatch {
    destroyed: Arc<AtomicBool>,
}

impl DestroyWatch {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}
