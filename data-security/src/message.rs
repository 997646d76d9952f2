// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! The envelope.
//!
//! A [`Message`] carries everything a consumer needs except key material:
//! the ciphertext with its authentication tag, the wrapped data key, the IV
//! and the CMK the data key was wrapped under.
//!
//! Binary layout: a version octet followed by the bincode encoding
//! (big-endian, fixed-width integers) of
//!
//! ```text
//! cmk.id:  u64 length || utf-8
//! cmk.arn: u8 presence (0|1) [|| u64 length || utf-8]
//! dataKey: u64 length || octets
//! iv:      u64 length || octets
//! data:    u64 length || octets
//! ```

use std::fmt;

use bincode::Options;
use crypto::IV_LENGTH;
use kms::{Cmk, WrappedDataKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_with::{base64::Base64, serde_as};

use crate::{Error, Result};

pub const WIRE_VERSION: u8 = 1;

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// `ciphertext || tag`
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,

    /// Data key wrapped under `cmk`.
    #[serde_as(as = "Base64")]
    pub data_key: Vec<u8>,

    #[serde_as(as = "Base64")]
    pub iv: Vec<u8>,

    pub cmk: Cmk,
}

#[derive(Serialize)]
struct WireRef<'a> {
    cmk_id: &'a str,
    cmk_arn: Option<&'a str>,
    data_key: &'a [u8],
    iv: &'a [u8],
    data: &'a [u8],
}

#[derive(Deserialize)]
struct Wire {
    cmk_id: String,
    cmk_arn: Option<String>,
    data_key: Vec<u8>,
    iv: Vec<u8>,
    data: Vec<u8>,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
}

impl Message {
    pub fn new(data: Vec<u8>, data_key: WrappedDataKey, iv: Vec<u8>, cmk: Cmk) -> Self {
        Self {
            data,
            data_key: data_key.into_bytes(),
            iv,
            cmk,
        }
    }

    pub fn wrapped_key(&self) -> WrappedDataKey {
        WrappedDataKey(self.data_key.clone())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = WireRef {
            cmk_id: &self.cmk.id,
            cmk_arn: self.cmk.arn.as_deref(),
            data_key: &self.data_key,
            iv: &self.iv,
            data: &self.data,
        };
        let mut out = vec![WIRE_VERSION];
        wire_options()
            .serialize_into(&mut out, &wire)
            .map_err(|e| Error::Codec(format!("encode message: {e}")))?;
        Ok(out)
    }

    /// Decode the binary layout. Trailing bytes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (version, body) = bytes
            .split_first()
            .ok_or_else(|| Error::Codec("truncated version".into()))?;
        if *version != WIRE_VERSION {
            return Err(Error::Codec(format!("unsupported version {version}")));
        }

        let wire: Wire = wire_options()
            .with_limit(body.len() as u64)
            .reject_trailing_bytes()
            .deserialize(body)
            .map_err(|e| Error::Codec(format!("decode message: {e}")))?;

        Self {
            data: wire.data,
            data_key: wire.data_key,
            iv: wire.iv,
            cmk: Cmk::new(wire.cmk_id, wire.cmk_arn),
        }
        .checked()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Codec(format!("serialize message: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str::<Self>(json)
            .map_err(|e| Error::Codec(format!("parse message: {e}")))?
            .checked()
    }

    fn checked(self) -> Result<Self> {
        if self.iv.len() != IV_LENGTH {
            return Err(Error::Codec(format!(
                "iv must be {IV_LENGTH} octets, got {}",
                self.iv.len()
            )));
        }
        Ok(self)
    }

    /// Diagnostic view with hex encoded binary fields.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("data".into(), json!(hex::encode_upper(&self.data)));
        map.insert("dataKey".into(), json!(hex::encode_upper(&self.data_key)));
        map.insert("iv".into(), json!(hex::encode_upper(&self.iv)));
        map.insert(
            "cmk".into(),
            json!({ "id": self.cmk.id, "arn": self.cmk.arn }),
        );
        map
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(data=0x{}, dataKey=0x{}, iv=0x{}, cmk={})",
            hex::encode_upper(&self.data),
            hex::encode_upper(&self.data_key),
            hex::encode_upper(&self.iv),
            self.cmk
        )
    }
}
