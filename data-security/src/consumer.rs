// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use async_trait::async_trait;
use crypto::SecureBuffer;
use kms::KmsClient;
use log::{debug, warn};
use tokio::runtime::Handle;

use crate::{Error, Message, Result};

/// Receives the decrypted payload of a message.
///
/// The slice is only valid for the duration of the call. It is zeroed as
/// soon as `process` returns, so implementations must copy whatever they
/// need to keep.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, plaintext: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> Processor for F
where
    F: Fn(&[u8]) -> anyhow::Result<()> + Send + Sync,
{
    async fn process(&self, plaintext: &[u8]) -> anyhow::Result<()> {
        self(plaintext)
    }
}

/// Zeroes the borrowed buffer when dropped, also when the owning future is
/// cancelled.
struct ScrubGuard<'a> {
    buffer: &'a mut SecureBuffer,
}

impl ScrubGuard<'_> {
    fn finish(self) -> Result<()> {
        let res = self.buffer.scrub();
        std::mem::forget(self);
        Ok(res?)
    }
}

impl Drop for ScrubGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.scrub() {
            warn!("scrubbing plaintext buffer failed: {e}");
        }
    }
}

/// Opens [`Message`]s and feeds their payload to a [`Processor`].
pub struct Consumer<P> {
    kms: Arc<dyn KmsClient>,
    processor: P,
    executor: Handle,
}

impl<P: Processor> Consumer<P> {
    /// `executor` runs the cipher work on its blocking pool.
    pub fn new(kms: Arc<dyn KmsClient>, processor: P, executor: Handle) -> Self {
        Self {
            kms,
            processor,
            executor,
        }
    }

    /// Decrypt `message` and pass the plaintext to the processor.
    ///
    /// The processor is not invoked when the message fails authentication.
    /// The data key is destroyed and the plaintext zeroed on every path.
    pub async fn receive(&self, message: &Message) -> Result<()> {
        let mut buffer = SecureBuffer::zeroed(0);
        self.receive_into(message, &mut buffer).await
    }

    /// Same as [`Consumer::receive`], decrypting into `buffer` so the caller
    /// can observe it afterwards.
    pub(crate) async fn receive_into(
        &self,
        message: &Message,
        buffer: &mut SecureBuffer,
    ) -> Result<()> {
        let key = self
            .kms
            .decrypt_data_key(&message.cmk, &message.wrapped_key())
            .await?;

        let len = crypto::plaintext_length(message.data.len())?;
        let out = SecureBuffer::zeroed(len);
        let data = message.data.clone();
        let iv = message.iv.clone();

        // The buffer travels to the blocking pool and back. If this future is
        // dropped meanwhile, the task drops it, which zeroes it.
        let (out, res) = self
            .executor
            .spawn_blocking(move || {
                let mut out = out;
                let res = key.consume(|key| crypto::decrypt(key, &iv, &data, out.as_mut_slice()));
                (out, res)
            })
            .await
            .map_err(|e| Error::Executor(e.to_string()))?;
        *buffer = out;
        res??;

        let guard = ScrubGuard { buffer };
        let processed = self.processor.process(guard.buffer.as_slice()).await;
        guard.finish()?;

        processed.map_err(Error::Processor)?;
        debug!("processed message under {}", message.cmk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::bail;
    use async_trait::async_trait;
    use crypto::SecureBuffer;
    use kms::{plugins::memory::MemoryKms, Cmk, KmsClient};
    use rstest::rstest;
    use tokio::{runtime::Handle, sync::Notify};

    use super::{Consumer, Processor};
    use crate::{Error, Message, Producer};

    async fn seal(kms: &Arc<MemoryKms>, plaintext: &[u8]) -> (Cmk, Message) {
        let cmk = kms.create_cmk().await.unwrap();
        let producer = Producer::new(kms.clone(), Handle::current());
        let message = producer.encrypt(&cmk, plaintext).await.unwrap();
        (cmk, message)
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl Processor for Recorder {
        async fn process(&self, plaintext: &[u8]) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(plaintext.to_vec());
            if self.fail {
                bail!("processing failed");
            }
            Ok(())
        }
    }

    struct Stuck {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl Processor for Stuck {
        async fn process(&self, _plaintext: &[u8]) -> anyhow::Result<()> {
            self.entered.notify_one();
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test(flavor = "multi_thread")]
    async fn buffer_is_zeroed_after_processing(#[case] fail: bool) {
        let kms = Arc::new(MemoryKms::new());
        let (_, message) = seal(&kms, b"sixteen byte msg").await;
        let consumer = Consumer::new(
            kms.clone(),
            Recorder {
                fail,
                ..Default::default()
            },
            Handle::current(),
        );

        let mut buffer = SecureBuffer::zeroed(0);
        let res = consumer.receive_into(&message, &mut buffer).await;
        assert_eq!(res.is_err(), fail);
        if fail {
            assert!(matches!(res, Err(Error::Processor(_))));
        }

        assert_eq!(buffer.len(), 16);
        assert!(buffer.is_zeroed());
        assert_eq!(
            consumer.processor.seen.lock().unwrap().as_slice(),
            &[b"sixteen byte msg".to_vec()]
        );
        assert!(kms.issued_keys().iter().all(|k| k.is_destroyed()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn buffer_is_zeroed_on_cancellation() {
        let kms = Arc::new(MemoryKms::new());
        let (_, message) = seal(&kms, b"cancel me").await;
        let entered = Arc::new(Notify::new());
        let consumer = Consumer::new(
            kms.clone(),
            Stuck {
                entered: entered.clone(),
            },
            Handle::current(),
        );

        let mut buffer = SecureBuffer::zeroed(0);
        {
            let receive = consumer.receive_into(&message, &mut buffer);
            tokio::pin!(receive);
            tokio::select! {
                _ = &mut receive => panic!("processor never returns"),
                _ = entered.notified() => {}
            }
        }

        assert_eq!(buffer.len(), 9);
        assert!(buffer.is_zeroed());
        assert!(kms.issued_keys().iter().all(|k| k.is_destroyed()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tampered_message_never_reaches_processor() {
        let kms = Arc::new(MemoryKms::new());
        let (_, mut message) = seal(&kms, b"payload").await;
        message.data[0] ^= 0x01;
        let consumer = Consumer::new(kms.clone(), Recorder::default(), Handle::current());

        let mut buffer = SecureBuffer::zeroed(0);
        let res = consumer.receive_into(&message, &mut buffer).await;
        assert!(matches!(res, Err(Error::CryptoAuthenticationFailed)));
        assert!(buffer.is_zeroed());
        assert!(consumer.processor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closure_processor() {
        let kms = Arc::new(MemoryKms::new());
        let (_, message) = seal(&kms, b"closure").await;
        let consumer = Consumer::new(
            kms,
            |plaintext: &[u8]| -> anyhow::Result<()> {
                assert_eq!(plaintext, b"closure");
                Ok(())
            },
            Handle::current(),
        );
        consumer.receive(&message).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn short_ciphertext() {
        let kms = Arc::new(MemoryKms::new());
        let (_, mut message) = seal(&kms, b"").await;
        message.data.truncate(10);
        let consumer = Consumer::new(kms.clone(), Recorder::default(), Handle::current());

        let res = consumer.receive(&message).await;
        assert!(matches!(res, Err(Error::CryptoBackend(_))));
        assert!(kms.issued_keys().iter().all(|k| k.is_destroyed()));
    }
}
