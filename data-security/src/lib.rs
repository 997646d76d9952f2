// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Envelope encryption on top of a KMS.
//!
//! A [`Producer`] seals payloads under fresh data keys minted by the KMS and
//! emits [`Message`]s. A [`Consumer`] asks the KMS to unwrap the data key of
//! a message, decrypts the payload into locked memory, hands it to a
//! [`Processor`] and scrubs it afterwards.

pub mod config;
pub use config::{PipelineConfig, Role};

pub mod consumer;
pub use consumer::{Consumer, Processor};

pub mod error;
pub use error::*;

pub mod message;
pub use message::Message;

pub mod producer;
pub use producer::Producer;
