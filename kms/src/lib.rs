// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

pub mod api;
pub use api::*;

pub mod error;
pub use error::*;

pub mod plugins;
pub use plugins::new_client;

pub mod retry;
pub use retry::{RetryPolicy, RetryProfile, RetryingKmsClient};
