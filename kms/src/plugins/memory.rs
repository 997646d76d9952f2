// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! An in-process KMS.
//!
//! Every CMK owns a random AES-256 master key kept in a [`SecureKey`]. A
//! wrapped data key is laid out as
//!
//! ```text
//! version (1) || len(cmk id) (u16 BE) || cmk id || iv (16) || AES-256-GCM(master, data key)
//! ```
//!
//! so a blob handed to a different CMK, or modified in transit, is refused
//! the way a cloud KMS refuses it.
//!
//! The client is meant for tests and local runs. It can inject failures,
//! stall operations forever and reports the destroy state of every key it
//! handed out.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError, RwLock},
};

use async_trait::async_trait;
use crypto::{rand::random_bytes, rand::random_iv, DestroyWatch, SecureBuffer, SecureKey};
use log::debug;

use crate::{Cmk, DataKey, Error, KmsClient, Operation, Result, WrappedDataKey};

const WRAP_VERSION: u8 = 1;

const DATA_KEY_LENGTH: usize = crypto::KEY_LENGTH;

struct CmkEntry {
    cmk: Cmk,
    master: SecureKey,
    enabled: bool,
}

#[derive(Default)]
pub struct MemoryKms {
    keys: RwLock<HashMap<String, CmkEntry>>,
    faults: Mutex<HashMap<Operation, VecDeque<Error>>>,
    stalled: Mutex<HashSet<Operation>>,
    calls: Mutex<HashMap<Operation, usize>>,
    issued: Mutex<Vec<DestroyWatch>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryKms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `op` fail with the given errors, in order,
    /// one per call.
    pub fn inject_failures(&self, op: Operation, errors: impl IntoIterator<Item = Error>) {
        lock(&self.faults).entry(op).or_default().extend(errors);
    }

    /// Make `op` mint its key material and then never complete.
    pub fn stall(&self, op: Operation) {
        lock(&self.stalled).insert(op);
    }

    pub fn resume(&self, op: Operation) {
        lock(&self.stalled).remove(&op);
    }

    /// Disable `cmk`. Later calls with it fail with [`Error::KeyDisabled`].
    pub fn disable(&self, cmk: &Cmk) -> Result<()> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let entry = keys
            .get_mut(&cmk.id)
            .ok_or_else(|| Error::NotFound(cmk.id.clone()))?;
        entry.enabled = false;
        Ok(())
    }

    /// Number of times `op` was called, failed calls included.
    pub fn calls(&self, op: Operation) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or_default()
    }

    /// Destroy watches of every plaintext data key this KMS handed out.
    pub fn issued_keys(&self) -> Vec<DestroyWatch> {
        lock(&self.issued).clone()
    }

    fn enter(&self, op: Operation) -> Result<()> {
        *lock(&self.calls).entry(op).or_default() += 1;
        match lock(&self.faults).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(e) => {
                debug!("memory kms: injected failure for {op}: {e}");
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn issue(&self, key: &SecureKey) {
        lock(&self.issued).push(key.watch());
    }

    async fn stall_point(&self, op: Operation) {
        let stalled = lock(&self.stalled).contains(&op);
        if stalled {
            debug!("memory kms: stalling {op}");
            std::future::pending::<()>().await;
        }
    }

    fn with_entry<R>(&self, cmk: &Cmk, f: impl FnOnce(&CmkEntry) -> Result<R>) -> Result<R> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let entry = keys
            .get(&cmk.id)
            .ok_or_else(|| Error::NotFound(format!("{cmk}")))?;
        if !entry.enabled {
            return Err(Error::KeyDisabled(format!("{}", entry.cmk)));
        }
        f(entry)
    }
}

fn wrap(cmk_id: &str, master: &SecureKey, data_key: &[u8]) -> Result<WrappedDataKey> {
    let id_len = u16::try_from(cmk_id.len())
        .map_err(|_| Error::BadRequest(format!("CMK id of {} octets is too long", cmk_id.len())))?;
    let iv = random_iv();
    let sealed = crypto::encrypt(master, &iv, data_key)?;

    let mut blob = Vec::with_capacity(1 + 2 + cmk_id.len() + iv.len() + sealed.len());
    blob.push(WRAP_VERSION);
    blob.extend_from_slice(&id_len.to_be_bytes());
    blob.extend_from_slice(cmk_id.as_bytes());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&sealed);
    Ok(WrappedDataKey(blob))
}

/// Split a wrapped blob into `(cmk id, iv, sealed key)`.
fn unframe(blob: &[u8]) -> Result<(&str, &[u8], &[u8])> {
    let invalid = || Error::Unauthorized("invalid ciphertext".into());

    let (version, rest) = blob.split_first().ok_or_else(invalid)?;
    if *version != WRAP_VERSION {
        return Err(invalid());
    }
    if rest.len() < 2 {
        return Err(invalid());
    }
    let (len, rest) = rest.split_at(2);
    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
    if rest.len() < len + crypto::IV_LENGTH {
        return Err(invalid());
    }
    let (id, rest) = rest.split_at(len);
    let id = std::str::from_utf8(id).map_err(|_| invalid())?;
    let (iv, sealed) = rest.split_at(crypto::IV_LENGTH);
    Ok((id, iv, sealed))
}

#[async_trait]
impl KmsClient for MemoryKms {
    async fn create_cmk(&self) -> Result<Cmk> {
        self.enter(Operation::CreateCmk)?;

        let id = uuid::Uuid::new_v4().to_string();
        let cmk = Cmk::new(id.clone(), Some(format!("arn:memory:kms:local:key/{id}")));
        let master = SecureKey::new(&random_bytes::<DATA_KEY_LENGTH>()[..]);
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                CmkEntry {
                    cmk: cmk.clone(),
                    master,
                    enabled: true,
                },
            );

        debug!("memory kms: created {cmk}");
        Ok(cmk)
    }

    async fn generate_data_key(&self, cmk: &Cmk) -> Result<DataKey> {
        self.enter(Operation::GenerateDataKey)?;

        let key_bytes = random_bytes::<DATA_KEY_LENGTH>();
        let wrapped = self.with_entry(cmk, |entry| wrap(&entry.cmk.id, &entry.master, &key_bytes[..]))?;
        let data_key = DataKey {
            wrapped,
            plaintext: SecureKey::new(&key_bytes[..]),
        };
        drop(key_bytes);
        self.issue(&data_key.plaintext);

        self.stall_point(Operation::GenerateDataKey).await;
        Ok(data_key)
    }

    async fn decrypt_data_key(&self, cmk: &Cmk, wrapped: &WrappedDataKey) -> Result<SecureKey> {
        self.enter(Operation::DecryptDataKey)?;

        let key = self.with_entry(cmk, |entry| {
            let (id, iv, sealed) = unframe(wrapped.as_bytes())?;
            if id != entry.cmk.id {
                return Err(Error::Unauthorized(format!(
                    "data key was not wrapped under {}",
                    entry.cmk
                )));
            }

            let len = crypto::plaintext_length(sealed.len())
                .map_err(|_| Error::Unauthorized("invalid ciphertext".into()))?;
            let mut out = SecureBuffer::zeroed(len);
            crypto::decrypt(&entry.master, iv, sealed, out.as_mut_slice()).map_err(|e| match e {
                crypto::Error::AuthenticationFailed | crypto::Error::InvalidIv { .. } => {
                    Error::Unauthorized("invalid ciphertext".into())
                }
                e => Error::Crypto(e),
            })?;
            Ok(SecureKey::new(out.as_slice()))
        })?;
        self.issue(&key);

        self.stall_point(Operation::DecryptDataKey).await;
        Ok(key)
    }
}
