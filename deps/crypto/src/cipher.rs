// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! AES-256-GCM envelope cipher.
//!
//! The ciphertext layout is `ciphertext || tag`, so the ciphertext is always
//! exactly [`TAG_LENGTH`] octets longer than the plaintext. No associated
//! data is used.

#[cfg(feature = "openssl")]
use crate::native::*;

#[cfg(all(feature = "rust-crypto", not(feature = "openssl")))]
use crate::rust::*;

use crate::{memory::scrub_bytes, Error, Result, SecureKey};

pub const KEY_LENGTH: usize = 32;

pub const IV_LENGTH: usize = 16;

pub const TAG_LENGTH: usize = 16;

/// Largest plaintext a single GCM invocation may protect: 2^39 - 256 bits.
pub const MAX_PLAINTEXT_LENGTH: u64 = (1 << 36) - 32;

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() != IV_LENGTH {
        return Err(Error::InvalidIv {
            expected: IV_LENGTH,
            actual: iv.len(),
        });
    }
    Ok(())
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LENGTH {
        return Err(Error::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: key.len(),
        });
    }
    Ok(())
}

/// Reject plaintexts longer than [`MAX_PLAINTEXT_LENGTH`].
pub fn check_plaintext_length(len: u64) -> Result<()> {
    if len > MAX_PLAINTEXT_LENGTH {
        return Err(Error::CryptoBackend(format!(
            "plaintext of {len} octets exceeds the AES-GCM limit of {MAX_PLAINTEXT_LENGTH}"
        )));
    }
    Ok(())
}

/// Encrypt `plaintext` under `key` and `iv`, returning `ciphertext || tag`.
pub fn encrypt(key: &SecureKey, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    key.with_bytes(|key| {
        check_key(key)?;
        check_iv(iv)?;
        check_plaintext_length(plaintext.len() as u64)?;

        aes256gcm::encrypt(key, plaintext, iv)
    })?
}

/// Verify and decrypt `ciphertext || tag` into `out`, which must be exactly
/// `ciphertext.len() - TAG_LENGTH` octets long.
///
/// On any failure `out` is zero-filled, so no unauthenticated plaintext
/// is ever left behind.
pub fn decrypt(key: &SecureKey, iv: &[u8], ciphertext: &[u8], out: &mut [u8]) -> Result<()> {
    let res = key
        .with_bytes(|key| {
            check_key(key)?;
            check_iv(iv)?;
            let len = plaintext_length(ciphertext.len())?;
            if out.len() != len {
                return Err(Error::CryptoBackend(format!(
                    "output buffer holds {} octets, {len} required",
                    out.len()
                )));
            }

            aes256gcm::decrypt(key, ciphertext, iv, out)
        })
        .and_then(|res| res);

    if res.is_err() {
        scrub_bytes(out);
    }
    res
}

/// Length of the plaintext carried by a ciphertext of `ciphertext_len` octets.
pub fn plaintext_length(ciphertext_len: usize) -> Result<usize> {
    ciphertext_len.checked_sub(TAG_LENGTH).ok_or_else(|| {
        Error::CryptoBackend(format!(
            "ciphertext of {ciphertext_len} octets is shorter than the {TAG_LENGTH} octet tag"
        ))
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{
        check_plaintext_length, decrypt, encrypt, plaintext_length, IV_LENGTH,
        MAX_PLAINTEXT_LENGTH, TAG_LENGTH,
    };
    use crate::{Error, SecureKey};

    const KEY: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
    const IV: &[u8; 16] = b"unique nonce 16b";

    #[rstest]
    #[case(b"")]
    #[case(b"plaintext1")]
    #[case(&[0x5a; 4096])]
    fn en_decrypt(#[case] plaintext: &[u8]) {
        let key = SecureKey::new(KEY);
        let ciphertext = encrypt(&key, IV, plaintext).expect("encryption failed");
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LENGTH);

        let mut out = vec![0u8; plaintext_length(ciphertext.len()).unwrap()];
        decrypt(&key, IV, &ciphertext, &mut out).expect("decryption failed");
        assert_eq!(plaintext, &out[..]);
    }

    #[rstest]
    #[case(0)]
    #[case(15)]
    #[case(20)]
    fn tampered_ciphertext(#[case] index: usize) {
        let key = SecureKey::new(KEY);
        let mut ciphertext = encrypt(&key, IV, b"attack at dawn!!!!!!").unwrap();
        ciphertext[index] ^= 0x01;

        let mut out = vec![0xaa; ciphertext.len() - TAG_LENGTH];
        assert_eq!(
            decrypt(&key, IV, &ciphertext, &mut out),
            Err(Error::AuthenticationFailed)
        );
        assert!(out.iter().all(|b| *b == 0));
    }

    #[rstest]
    #[case(0, true)]
    #[case(MAX_PLAINTEXT_LENGTH, true)]
    #[case(MAX_PLAINTEXT_LENGTH + 1, false)]
    #[case(u64::MAX, false)]
    fn gcm_length_limit(#[case] len: u64, #[case] accepted: bool) {
        let res = check_plaintext_length(len);
        if accepted {
            assert_eq!(res, Ok(()));
        } else {
            assert!(matches!(res, Err(Error::CryptoBackend(_))));
        }
    }

    #[test]
    fn tampered_iv() {
        let key = SecureKey::new(KEY);
        let ciphertext = encrypt(&key, IV, b"payload").unwrap();
        let mut iv = *IV;
        iv[3] ^= 0x80;

        let mut out = vec![0u8; 7];
        assert_eq!(
            decrypt(&key, &iv, &ciphertext, &mut out),
            Err(Error::AuthenticationFailed)
        );
    }

    #[rstest]
    #[case(12)]
    #[case(0)]
    #[case(17)]
    fn wrong_iv_length(#[case] len: usize) {
        let key = SecureKey::new(KEY);
        let iv = vec![1u8; len];
        assert_eq!(
            encrypt(&key, &iv, b"x"),
            Err(Error::InvalidIv {
                expected: IV_LENGTH,
                actual: len
            })
        );
    }

    #[rstest]
    #[case(16)]
    #[case(31)]
    #[case(33)]
    fn wrong_key_length(#[case] len: usize) {
        let key = SecureKey::new(&vec![9u8; len]);
        assert!(matches!(
            encrypt(&key, IV, b"x"),
            Err(Error::InvalidKeyLength { actual, .. }) if actual == len
        ));
    }

    #[test]
    fn short_ciphertext_and_bad_output() {
        let key = SecureKey::new(KEY);
        let mut out = [0u8; 0];
        assert!(matches!(
            decrypt(&key, IV, &[0u8; 15], &mut out),
            Err(Error::CryptoBackend(_))
        ));

        let ciphertext = encrypt(&key, IV, b"four").unwrap();
        let mut out = [0u8; 3];
        assert!(matches!(
            decrypt(&key, IV, &ciphertext, &mut out),
            Err(Error::CryptoBackend(_))
        ));
    }

    #[test]
    fn destroyed_key() {
        let mut key = SecureKey::new(KEY);
        let ciphertext = encrypt(&key, IV, b"payload").unwrap();
        key.destroy().unwrap();

        assert_eq!(encrypt(&key, IV, b"payload"), Err(Error::Destroyed));
        let mut out = vec![0u8; 7];
        assert_eq!(
            decrypt(&key, IV, &ciphertext, &mut out),
            Err(Error::Destroyed)
        );
    }
}
