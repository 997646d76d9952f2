// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! This mod implements aes-256-gcm encryption & decryption with a 16 byte
//! nonce.

use aes::Aes256;
use aes_gcm::{aead::consts::U16, AeadInPlace, AesGcm, KeyInit, Nonce, Tag};
use zeroize::Zeroize;

use crate::{Error, Result, TAG_LENGTH};

/// Both `aes` and `aes-gcm` are built with `zeroize`, so the key schedule
/// and the GHASH key are wiped when the cipher is dropped.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

fn cipher(key: &[u8]) -> Result<Aes256Gcm16> {
    Aes256Gcm16::new_from_slice(key)
        .map_err(|e| Error::CryptoBackend(format!("aes-256-gcm key setup failed: {e}")))
}

pub fn encrypt(key: &[u8], data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    let nonce = Nonce::<U16>::from_slice(iv);

    let mut buffer = Vec::with_capacity(data.len() + TAG_LENGTH);
    buffer.extend_from_slice(data);
    let tag = match cipher.encrypt_in_place_detached(nonce, b"", &mut buffer) {
        Ok(tag) => tag,
        Err(e) => {
            buffer.zeroize();
            return Err(Error::CryptoBackend(format!(
                "aes-256-gcm encrypt failed: {e:?}"
            )));
        }
    };
    buffer.extend_from_slice(&tag);
    Ok(buffer)
}

/// `out` must be `encrypted_data.len() - TAG_LENGTH` long. The caller
/// scrubs `out` on failure.
pub fn decrypt(key: &[u8], encrypted_data: &[u8], iv: &[u8], out: &mut [u8]) -> Result<()> {
    let cipher = cipher(key)?;
    let nonce = Nonce::<U16>::from_slice(iv);
    let (data, tag) = encrypted_data.split_at(encrypted_data.len() - TAG_LENGTH);

    out.copy_from_slice(data);
    cipher
        .decrypt_in_place_detached(nonce, b"", out, Tag::<U16>::from_slice(tag))
        .map_err(|_| Error::AuthenticationFailed)
}
