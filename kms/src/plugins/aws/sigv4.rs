// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! AWS Signature Version 4 request signing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::{form_urlencoded::byte_serialize, Url};
use zeroize::Zeroizing;

use super::credential::Credential;
use crate::{Error, Result};

pub(crate) const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub(crate) const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const SCOPE_DATE_FORMAT: &str = "%Y%m%d";

type HmacSha256 = Hmac<Sha256>;

/// The parts of an HTTP request covered by the signature. Header names must
/// be lowercase.
pub(crate) struct SigningRequest<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    pub headers: &'a BTreeMap<String, String>,
    pub payload: &'a [u8],
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Configuration(format!("initialize hmac failed: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 3986 percent-encoding, leaving only unreserved characters as is.
pub(crate) fn uri_encode(s: &str) -> String {
    let s: String = byte_serialize(s.as_bytes()).collect();
    s.replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the canonical request and the signed header list.
pub(crate) fn canonical_request(req: &SigningRequest<'_>) -> (String, String) {
    let path = match req.url.path() {
        "" => "/",
        path => path,
    };

    let canonical_headers = req
        .headers
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect::<String>();
    let signed_headers = req
        .headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        path,
        canonical_query(req.url),
        canonical_headers,
        signed_headers,
        hex_sha256(req.payload)
    );
    (canonical, signed_headers)
}

pub(crate) fn credential_scope(date: &str, region: &str, service: &str) -> String {
    format!("{date}/{region}/{service}/aws4_request")
}

pub(crate) fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    )
}

pub(crate) fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let secret = Zeroizing::new(format!("AWS4{secret}"));
    let k_date = Zeroizing::new(hmac_sha256(secret.as_bytes(), date.as_bytes())?);
    let k_region = Zeroizing::new(hmac_sha256(&k_date, region.as_bytes())?);
    let k_service = Zeroizing::new(hmac_sha256(&k_region, service.as_bytes())?);
    Ok(Zeroizing::new(hmac_sha256(&k_service, b"aws4_request")?))
}

/// Compute the `Authorization` header value. `req.headers` must already
/// hold `host` and `x-amz-date` (and `x-amz-security-token` when the
/// credential carries a session token).
pub(crate) fn authorization(
    req: &SigningRequest<'_>,
    credential: &Credential,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
    let date = now.format(SCOPE_DATE_FORMAT).to_string();
    let scope = credential_scope(&date, region, service);

    let (canonical, signed_headers) = canonical_request(req);
    let string_to_sign = string_to_sign(&amz_date, &scope, &canonical);
    let key = signing_key(&credential.secret_access_key, &date, region, service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credential.access_key_id
    ))
}
