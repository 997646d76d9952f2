// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Retries for transient KMS failures.
//!
//! [`RetryingKmsClient`] wraps any [`KmsClient`] and retries calls that fail
//! with [`Error::Transient`] using full-jitter exponential backoff: the wait
//! before retry `n` (0-based) is drawn uniformly from
//! `[0, min(cap, base * 2^n)]`. Every attempt is bounded by an attempt
//! timeout and the whole call by a call timeout. Non-transient failures are
//! returned at once.
//!
//! Each call emits one metric line through `log` with the operation, the
//! number of attempts, the elapsed time and the outcome.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use crypto::SecureKey;
use log::{debug, info, warn};
use rand::Rng;
use serde::Deserialize;
use strum::{AsRefStr, Display, EnumString};
use tokio::time::{sleep, timeout, Instant};

use crate::{Cmk, DataKey, Error, KmsClient, Operation, Result, WrappedDataKey};

/// Named retry schedules.
#[derive(
    AsRefStr, Display, EnumString, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RetryProfile {
    /// Latency sensitive callers: 10ms base, 1s cap, 7 attempts.
    #[default]
    Fast,

    /// Batch callers that prefer waiting over failing: 200ms base, 10s cap,
    /// 5 attempts.
    Resilient,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn fast() -> Self {
        Self {
            base: Duration::from_millis(10),
            cap: Duration::from_secs(1),
            max_attempts: 7,
            attempt_timeout: Duration::from_millis(50),
            call_timeout: Duration::from_secs(1),
        }
    }

    pub fn resilient() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(10),
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(60),
        }
    }

    /// Upper bound of the wait before retry `retry` (0-based).
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Full-jitter wait before retry `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry).as_micros() as u64;
        Duration::from_micros(rand::rng().random_range(0..=ceiling))
    }
}

impl From<RetryProfile> for RetryPolicy {
    fn from(profile: RetryProfile) -> Self {
        match profile {
            RetryProfile::Fast => RetryPolicy::fast(),
            RetryProfile::Resilient => RetryPolicy::resilient(),
        }
    }
}

pub struct RetryingKmsClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: KmsClient> RetryingKmsClient<C> {
    pub fn new(inner: C, profile: RetryProfile) -> Self {
        Self::with_policy(inner, profile.into())
    }

    pub fn with_policy(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, op: Operation, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let deadline = started + self.policy.call_timeout;
        let mut attempts = 0;

        let res = loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(Error::Transient(format!(
                    "{op} exceeded the call timeout of {:?}",
                    self.policy.call_timeout
                )));
            }

            let budget = self.policy.attempt_timeout.min(remaining);
            let res = match timeout(budget, call()).await {
                Ok(res) => res,
                Err(_) => Err(Error::Transient(format!(
                    "{op} attempt {attempts} timed out after {budget:?}"
                ))),
            };

            match res {
                Err(e) if e.is_transient() && attempts < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempts - 1);
                    if Instant::now() + delay >= deadline {
                        break Err(e);
                    }
                    debug!("{op} attempt {attempts} failed: {e}, retrying in {delay:?}");
                    sleep(delay).await;
                }
                res => break res,
            }
        };

        let elapsed = started.elapsed();
        match &res {
            Ok(_) => info!(
                "kms metric: operation={op} attempts={attempts} elapsed_ms={} outcome=success",
                elapsed.as_millis()
            ),
            Err(e) => warn!(
                "kms metric: operation={op} attempts={attempts} elapsed_ms={} outcome=failure error={e}",
                elapsed.as_millis()
            ),
        }
        res
    }
}

#[async_trait]
impl<C: KmsClient> KmsClient for RetryingKmsClient<C> {
    async fn create_cmk(&self) -> Result<Cmk> {
        self.run(Operation::CreateCmk, || self.inner.create_cmk())
            .await
    }

    async fn generate_data_key(&self, cmk: &Cmk) -> Result<DataKey> {
        self.run(Operation::GenerateDataKey, || {
            self.inner.generate_data_key(cmk)
        })
        .await
    }

    async fn decrypt_data_key(&self, cmk: &Cmk, wrapped: &WrappedDataKey) -> Result<SecureKey> {
        self.run(Operation::DecryptDataKey, || {
            self.inner.decrypt_data_key(cmk, wrapped)
        })
        .await
    }
}
