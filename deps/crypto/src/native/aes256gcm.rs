// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! This mod implements aes-256-gcm encryption & decryption.

use openssl::{cipher::Cipher, cipher_ctx::CipherCtx, symm};

use crate::{Error, Result, TAG_LENGTH};

pub fn encrypt(key: &[u8], data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let cipher = symm::Cipher::aes_256_gcm();
    let mut tag = [0u8; TAG_LENGTH];
    let mut ciphertext = symm::encrypt_aead(cipher, key, Some(iv), &[], data, &mut tag)
        .map_err(|e| Error::CryptoBackend(e.to_string()))?;
    ciphertext.extend_from_slice(&tag);
    Ok(ciphertext)
}

/// `out` must be `encrypted_data.len() - TAG_LENGTH` long. Candidate
/// plaintext is only ever written to `out`; the caller scrubs it on failure.
pub fn decrypt(key: &[u8], encrypted_data: &[u8], iv: &[u8], out: &mut [u8]) -> Result<()> {
    let backend = |e: openssl::error::ErrorStack| Error::CryptoBackend(e.to_string());
    let (data, tag) = encrypted_data.split_at(encrypted_data.len() - TAG_LENGTH);

    let mut ctx = CipherCtx::new().map_err(backend)?;
    ctx.decrypt_init(Some(Cipher::aes_256_gcm()), None, None)
        .map_err(backend)?;
    ctx.set_iv_length(iv.len()).map_err(backend)?;
    ctx.decrypt_init(None, Some(key), Some(iv)).map_err(backend)?;

    let count = ctx.cipher_update(data, Some(&mut *out)).map_err(backend)?;
    ctx.set_tag(tag).map_err(backend)?;
    ctx.cipher_final(&mut out[count..])
        .map_err(|_| Error::AuthenticationFailed)?;
    Ok(())
}
