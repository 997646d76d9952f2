// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use data_security::{Consumer, Error, Message, Processor, Producer};
use kms::{plugins::memory::MemoryKms, Cmk, KmsClient, Operation, RetryProfile, RetryingKmsClient};
use rstest::rstest;
use tokio::{runtime::Handle, time::Instant};

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Recorder {
    fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Processor for Recorder {
    async fn process(&self, plaintext: &[u8]) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(plaintext.to_vec());
        Ok(())
    }
}

struct Pipeline {
    kms: Arc<MemoryKms>,
    cmk: Cmk,
    producer: Producer,
    consumer: Consumer<Recorder>,
    recorder: Recorder,
}

impl Pipeline {
    async fn new() -> Self {
        let kms = Arc::new(MemoryKms::new());
        let cmk = kms.create_cmk().await.unwrap();
        let recorder = Recorder::default();
        Self {
            producer: Producer::new(kms.clone(), Handle::current()),
            consumer: Consumer::new(kms.clone(), recorder.clone(), Handle::current()),
            kms,
            cmk,
            recorder,
        }
    }

    fn all_keys_destroyed(&self) -> bool {
        self.kms.issued_keys().iter().all(|k| k.is_destroyed())
    }
}

#[rstest]
#[case(b"".to_vec())]
#[case(b"hello, envelope".to_vec())]
#[case(vec![0x5a; 64 * 1024])]
#[tokio::test(flavor = "multi_thread")]
async fn round_trip(#[case] plaintext: Vec<u8>) {
    let pipeline = Pipeline::new().await;

    let message = pipeline.producer.encrypt(&pipeline.cmk, &plaintext).await.unwrap();
    assert_eq!(message.data.len(), plaintext.len() + 16);
    assert_eq!(message.iv.len(), 16);
    assert_eq!(message.cmk, pipeline.cmk);
    assert!(!message.data_key.is_empty());

    pipeline.consumer.receive(&message).await.unwrap();
    assert_eq!(pipeline.recorder.seen(), vec![plaintext]);
    assert_eq!(pipeline.kms.issued_keys().len(), 2);
    assert!(pipeline.all_keys_destroyed());
}

#[tokio::test(flavor = "multi_thread")]
async fn every_message_gets_a_fresh_iv_and_data_key() {
    let pipeline = Pipeline::new().await;

    let first = pipeline.producer.encrypt(&pipeline.cmk, b"same").await.unwrap();
    let second = pipeline.producer.encrypt(&pipeline.cmk, b"same").await.unwrap();
    assert_ne!(first.iv, second.iv);
    assert_ne!(first.data_key, second.data_key);
    assert_ne!(first.data, second.data);
}

#[rstest]
#[case::ciphertext(|m: &mut Message| m.data[0] ^= 0x80)]
#[case::tag(|m: &mut Message| { let last = m.data.len() - 1; m.data[last] ^= 0x01 })]
#[case::iv(|m: &mut Message| m.iv[15] ^= 0x01)]
#[case::truncated(|m: &mut Message| { m.data.pop(); })]
#[tokio::test(flavor = "multi_thread")]
async fn tampering_is_detected(#[case] tamper: fn(&mut Message)) {
    let pipeline = Pipeline::new().await;
    let mut message = pipeline.producer.encrypt(&pipeline.cmk, b"attack at dawn").await.unwrap();
    tamper(&mut message);

    let err = pipeline.consumer.receive(&message).await.unwrap_err();
    assert!(matches!(err, Error::CryptoAuthenticationFailed), "{err:?}");
    assert!(pipeline.recorder.seen().is_empty());
    assert!(pipeline.all_keys_destroyed());
}

#[tokio::test(flavor = "multi_thread")]
async fn swapped_data_key_fails_authentication() {
    let pipeline = Pipeline::new().await;
    let mut first = pipeline.producer.encrypt(&pipeline.cmk, b"first").await.unwrap();
    let second = pipeline.producer.encrypt(&pipeline.cmk, b"second").await.unwrap();
    first.data_key = second.data_key;

    let err = pipeline.consumer.receive(&first).await.unwrap_err();
    assert!(matches!(err, Error::CryptoAuthenticationFailed), "{err:?}");
    assert!(pipeline.recorder.seen().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn short_iv_is_rejected() {
    let pipeline = Pipeline::new().await;
    let mut message = pipeline.producer.encrypt(&pipeline.cmk, b"payload").await.unwrap();
    message.iv.truncate(12);

    let err = pipeline.consumer.receive(&message).await.unwrap_err();
    assert!(matches!(err, Error::CryptoBackend(_)), "{err:?}");
    assert!(pipeline.recorder.seen().is_empty());
    assert!(pipeline.all_keys_destroyed());
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_cmk_is_refused_by_kms() {
    let pipeline = Pipeline::new().await;
    let other = pipeline.kms.create_cmk().await.unwrap();
    let mut message = pipeline.producer.encrypt(&pipeline.cmk, b"payload").await.unwrap();
    message.cmk = other;

    let err = pipeline.consumer.receive(&message).await.unwrap_err();
    assert!(matches!(err, Error::KmsPermanent(kms::Error::Unauthorized(_))), "{err:?}");
    assert!(pipeline.recorder.seen().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_and_disabled_cmks() {
    let pipeline = Pipeline::new().await;

    let unknown = Cmk::new("no-such-key", None);
    let err = pipeline.producer.encrypt(&unknown, b"payload").await.unwrap_err();
    assert!(matches!(err, Error::KmsPermanent(kms::Error::NotFound(_))), "{err:?}");

    let message = pipeline.producer.encrypt(&pipeline.cmk, b"payload").await.unwrap();
    pipeline.kms.disable(&pipeline.cmk).unwrap();
    let err = pipeline.consumer.receive(&message).await.unwrap_err();
    assert!(matches!(err, Error::KmsPermanent(kms::Error::KeyDisabled(_))), "{err:?}");
    assert!(pipeline.recorder.seen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_kms_failures_are_retried() {
    let kms = Arc::new(MemoryKms::new());
    let cmk = kms.create_cmk().await.unwrap();
    kms.inject_failures(
        Operation::GenerateDataKey,
        [
            kms::Error::Transient("throttled".into()),
            kms::Error::Transient("503".into()),
        ],
    );

    let client: Arc<dyn KmsClient> = Arc::new(RetryingKmsClient::new(kms.clone(), RetryProfile::Fast));
    let producer = Producer::new(client.clone(), Handle::current());

    let started = Instant::now();
    let message = producer.encrypt(&cmk, b"eventually").await.unwrap();
    assert!(started.elapsed() <= Duration::from_millis(30));
    assert_eq!(kms.calls(Operation::GenerateDataKey), 3);

    let recorder = Recorder::default();
    let consumer = Consumer::new(client, recorder.clone(), Handle::current());
    consumer.receive(&message).await.unwrap();
    assert_eq!(recorder.seen(), vec![b"eventually".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_as_transient() {
    let kms = Arc::new(MemoryKms::new());
    let cmk = kms.create_cmk().await.unwrap();
    kms.inject_failures(
        Operation::GenerateDataKey,
        (0..10).map(|i| kms::Error::Transient(format!("failure {i}"))),
    );

    let client = Arc::new(RetryingKmsClient::new(kms.clone(), RetryProfile::Fast));
    let producer = Producer::new(client, Handle::current());
    let err = producer.encrypt(&cmk, b"never").await.unwrap_err();
    assert!(matches!(err, Error::KmsTransient(_)), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_receive_destroys_the_data_key() {
    let pipeline = Pipeline::new().await;
    let message = pipeline.producer.encrypt(&pipeline.cmk, b"payload").await.unwrap();
    pipeline.kms.stall(Operation::DecryptDataKey);

    let res = tokio::time::timeout(Duration::from_millis(20), pipeline.consumer.receive(&message)).await;
    assert!(res.is_err());
    assert_eq!(pipeline.kms.calls(Operation::DecryptDataKey), 1);
    assert_eq!(pipeline.kms.issued_keys().len(), 2);
    assert!(pipeline.all_keys_destroyed());
    assert!(pipeline.recorder.seen().is_empty());

    pipeline.kms.resume(Operation::DecryptDataKey);
    pipeline.consumer.receive(&message).await.unwrap();
    assert_eq!(pipeline.recorder.seen(), vec![b"payload".to_vec()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_encrypt_destroys_the_data_key() {
    let pipeline = Pipeline::new().await;
    pipeline.kms.stall(Operation::GenerateDataKey);

    let res =
        tokio::time::timeout(Duration::from_millis(20), pipeline.producer.encrypt(&pipeline.cmk, b"payload")).await;
    assert!(res.is_err());
    assert_eq!(pipeline.kms.issued_keys().len(), 1);
    assert!(pipeline.all_keys_destroyed());
}

#[rstest]
#[case::binary(true)]
#[case::json(false)]
#[tokio::test(flavor = "multi_thread")]
async fn encoded_message_survives_transport(#[case] binary: bool) {
    let pipeline = Pipeline::new().await;
    let message = pipeline.producer.encrypt(&pipeline.cmk, b"over the wire").await.unwrap();

    let received = if binary {
        Message::from_bytes(&message.to_bytes().unwrap()).unwrap()
    } else {
        Message::from_json(&message.to_json().unwrap()).unwrap()
    };
    assert_eq!(received, message);

    pipeline.consumer.receive(&received).await.unwrap();
    assert_eq!(pipeline.recorder.seen(), vec![b"over the wire".to_vec()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn diagnostics_carry_no_plaintext() {
    let pipeline = Pipeline::new().await;
    let message = pipeline.producer.encrypt(&pipeline.cmk, b"SECRET").await.unwrap();

    let rendered = message.to_string();
    assert!(rendered.starts_with("Message(data=0x"));
    assert!(rendered.ends_with(&format!("cmk={})", pipeline.cmk)));
    assert!(!rendered.contains(&hex::encode_upper(b"SECRET")));
    assert_eq!(message.to_map()["iv"], serde_json::json!(hex::encode_upper(&message.iv)));
}
