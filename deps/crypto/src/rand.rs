// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use rand::Rng;
use zeroize::Zeroizing;

use crate::IV_LENGTH;

/// Random bytes from the thread-local CSPRNG, zeroed when dropped.
pub fn random_bytes<const N: usize>() -> Zeroizing<[u8; N]> {
    let mut buffer = Zeroizing::new([0u8; N]);
    rand::rng().fill(&mut buffer[..]);
    buffer
}

/// A fresh IV for one message.
pub fn random_iv() -> [u8; IV_LENGTH] {
    let mut iv = [0u8; IV_LENGTH];
    rand::rng().fill(&mut iv[..]);
    iv
}
