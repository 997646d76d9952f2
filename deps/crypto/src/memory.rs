// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Heap storage for secrets. Pages are locked in RAM where the platform
//! allows it and every byte is zeroed before the storage is released.

use std::sync::atomic::{compiler_fence, Ordering};

use log::debug;
use zeroize::Zeroize;

/// Zero `data` with volatile writes that the optimizer may not elide.
pub(crate) fn scrub_bytes(data: &mut [u8]) {
    data.zeroize();
    compiler_fence(Ordering::SeqCst);
}

/// Fixed size heap allocation that never reallocates, so the bytes are
/// never copied behind our back.
pub(crate) struct LockedBytes {
    bytes: Box<[u8]>,
    locked: bool,
}

impl LockedBytes {
    pub(crate) fn zeroed(len: usize) -> Self {
        let mut this = Self {
            bytes: vec![0u8; len].into_boxed_slice(),
            locked: false,
        };
        this.lock();
        this
    }

    pub(crate) fn from_slice(data: &[u8]) -> Self {
        let mut this = Self::zeroed(data.len());
        this.bytes.copy_from_slice(data);
        this
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Zero the contents and read them back.
    pub(crate) fn scrub(&mut self) -> bool {
        scrub_bytes(&mut self.bytes);
        self.bytes.iter().all(|b| *b == 0)
    }

    #[cfg(unix)]
    fn lock(&mut self) {
        use nix::sys::mman::mlock;
        use std::{ffi::c_void, ptr::NonNull};

        let len = self.bytes.len();
        if len == 0 {
            return;
        }

        let Some(ptr) = NonNull::new(self.bytes.as_mut_ptr().cast::<c_void>()) else {
            return;
        };

        // SAFETY: the range is owned by `self.bytes` and outlives the lock.
        match unsafe { mlock(ptr, len) } {
            Ok(()) => self.locked = true,
            Err(e) => debug!("mlock of {len} bytes not permitted, continuing unlocked: {e}"),
        }
    }

    #[cfg(not(unix))]
    fn lock(&mut self) {}

    #[cfg(unix)]
    fn unlock(&mut self) {
        use nix::sys::mman::munlock;
        use std::{ffi::c_void, ptr::NonNull};

        if !self.locked {
            return;
        }

        if let Some(ptr) = NonNull::new(self.bytes.as_mut_ptr().cast::<c_void>()) {
            // SAFETY: the same range was locked in `lock`.
            if let Err(e) = unsafe { munlock(ptr, self.bytes.len()) } {
                debug!("munlock failed: {e}");
            }
        }
        self.locked = false;
    }

    #[cfg(not(unix))]
    fn unlock(&mut self) {}
}

impl Drop for LockedBytes {
    fn drop(&mut self) {
        scrub_bytes(&mut self.bytes);
        self.unlock();
    }
}
