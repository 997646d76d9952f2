// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;

use crate::{memory::LockedBytes, Error, Result};

/// Locked scratch memory for plaintext that only lives for the duration of
/// one envelope operation. The contents are zeroed on [`SecureBuffer::scrub`]
/// and again when the buffer is dropped.
pub struct SecureBuffer {
    inner: LockedBytes,
}

impl SecureBuffer {
    /// Allocate a zero-filled buffer of `len` octets.
    pub fn zeroed(len: usize) -> Self {
        Self {
            inner: LockedBytes::zeroed(len),
        }
    }

    /// Copy `data` into a new buffer. The caller keeps ownership of `data`
    /// and is responsible for it.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            inner: LockedBytes::from_slice(data),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.inner.as_mut_slice()
    }

    /// Zero every octet of the buffer.
    pub fn scrub(&mut self) -> Result<()> {
        if !self.inner.scrub() {
            return Err(Error::ScrubFailed);
        }
        Ok(())
    }

    pub fn is_zeroed(&self) -> bool {
        self.as_slice().iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer([REDACTED; {}])", self.len())
    }
}
