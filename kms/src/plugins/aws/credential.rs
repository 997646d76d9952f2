// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Credentials to access AWS KMS

use std::{env, fmt};

use zeroize::Zeroizing;

use crate::{Error, Result};

pub const ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

#[derive(Clone)]
pub struct Credential {
    pub(crate) access_key_id: String,
    pub(crate) secret_access_key: Zeroizing<String>,
    pub(crate) session_token: Option<Zeroizing<String>>,
}

impl Credential {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: Zeroizing::new(secret_access_key.to_string()),
            session_token: session_token.map(|t| Zeroizing::new(t.to_string())),
        }
    }

    /// Read static credentials from the standard AWS environment variables.
    pub fn from_env() -> Result<Self> {
        let access_key_id = env::var(ACCESS_KEY_ID_ENV)
            .map_err(|_| Error::Configuration(format!("{ACCESS_KEY_ID_ENV} is not set")))?;
        let secret_access_key = Zeroizing::new(
            env::var(SECRET_ACCESS_KEY_ENV)
                .map_err(|_| Error::Configuration(format!("{SECRET_ACCESS_KEY_ENV} is not set")))?,
        );
        let session_token = env::var(SESSION_TOKEN_ENV).ok().map(Zeroizing::new);

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
