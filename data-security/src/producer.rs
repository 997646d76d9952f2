// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use crypto::{rand::random_iv, SecureBuffer};
use kms::{Cmk, DataKey, KmsClient};
use log::debug;
use tokio::runtime::Handle;

use crate::{Error, Message, Result};

/// Seals payloads into [`Message`]s.
pub struct Producer {
    kms: Arc<dyn KmsClient>,
    executor: Handle,
}

impl Producer {
    /// `executor` runs the cipher work on its blocking pool.
    pub fn new(kms: Arc<dyn KmsClient>, executor: Handle) -> Self {
        Self { kms, executor }
    }

    /// Encrypt `plaintext` under a fresh data key wrapped by `cmk`.
    ///
    /// The data key is destroyed before this returns, whatever the outcome,
    /// and so is the internal copy of `plaintext`. The caller's buffer is
    /// left alone.
    pub async fn encrypt(&self, cmk: &Cmk, plaintext: &[u8]) -> Result<Message> {
        let staging = SecureBuffer::from_slice(plaintext);

        let DataKey { wrapped, plaintext: key } = self.kms.generate_data_key(cmk).await?;
        let iv = random_iv();

        // The task owns the key and the staging copy, so both are released
        // by the blocking pool even if this future is dropped meanwhile.
        let data = self
            .executor
            .spawn_blocking(move || {
                let res = key.consume(|key| crypto::encrypt(key, &iv, staging.as_slice()));
                drop(staging);
                res
            })
            .await
            .map_err(|e| Error::Executor(e.to_string()))???;

        debug!("sealed {} octets under {cmk}", plaintext.len());
        Ok(Message::new(data, wrapped, iv.to_vec(), cmk.clone()))
    }
}
