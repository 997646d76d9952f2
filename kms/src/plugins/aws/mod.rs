// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! AWS KMS client speaking the KMS JSON 1.1 protocol.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use crypto::SecureKey;
use bytes::BytesMut;
use log::{debug, error, info};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    ClientBuilder, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use zeroize::{Zeroize, Zeroizing};

mod credential;
mod sigv4;

pub use credential::Credential;

use crate::{Cmk, DataKey, Error, KmsClient, ProviderSettings, Result, WrappedDataKey};

pub const DEFAULT_REGION: &str = "eu-west-1";

const SERVICE: &str = "kms";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const TARGET_PREFIX: &str = "TrentService";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// `https://kms.<region>.amazonaws.com`
pub fn default_endpoint(region: &str) -> String {
    format!("https://{SERVICE}.{region}.amazonaws.com")
}

/// Serialized [`crate::ProviderSettings`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsProviderSettings {
    #[serde(default = "default_region")]
    pub region: String,

    /// Overrides the regional endpoint, e.g. for VPC endpoints or local
    /// emulators.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// IAM role the calls are expected to run under. Obtaining credentials
    /// for it is left to whoever provides the environment credentials.
    #[serde(default)]
    pub role_arn: Option<String>,

    /// HTTP timeout of a single request.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

#[derive(Debug)]
pub struct AwsKmsClient {
    credential: Credential,
    region: String,
    endpoint: Url,
    host: String,
    role_arn: Option<String>,
    http_client: reqwest::Client,
}

impl AwsKmsClient {
    pub fn new(settings: AwsProviderSettings, credential: Credential) -> Result<Self> {
        if settings.region.is_empty() {
            return Err(Error::Configuration("region must not be empty".into()));
        }

        let endpoint = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| default_endpoint(&settings.region));
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            Error::Configuration(format!("malformed KMS endpoint `{endpoint}`: {e}"))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::Configuration(format!(
                    "KMS endpoint `{endpoint}` has no host"
                )))
            }
        };

        let mut builder = ClientBuilder::new().use_rustls_tls();
        if let Some(ms) = settings.attempt_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let http_client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("build http client failed: {e:?}")))?;

        if let Some(role) = &settings.role_arn {
            info!("AWS KMS client for {} will act as {role}", settings.region);
        }

        Ok(Self {
            credential,
            region: settings.region,
            endpoint,
            host,
            role_arn: settings.role_arn,
            http_client,
        })
    }

    /// Build a client from [`ProviderSettings`]. Credentials are read from
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.
    pub async fn from_provider_settings(provider_settings: &ProviderSettings) -> Result<Self> {
        let settings: AwsProviderSettings =
            serde_json::from_value(Value::Object(provider_settings.clone())).map_err(|e| {
                Error::Configuration(format!("parse aws provider setting failed: {e:?}"))
            })?;
        Self::new(settings, Credential::from_env()?)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn role_arn(&self) -> Option<&str> {
        self.role_arn.as_deref()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GenerateDataKeyRequest<'a> {
    key_id: &'a str,
    key_spec: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GenerateDataKeyResponse {
    ciphertext_blob: String,
    plaintext: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptRequest<'a> {
    key_id: &'a str,
    ciphertext_blob: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateKeyRequest<'a> {
    key_spec: &'a str,
    key_usage: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateKeyResponse {
    key_metadata: KeyMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyMetadata {
    key_id: String,
    arn: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(rename = "__type", default)]
    error_type: String,

    #[serde(alias = "Message", default)]
    message: String,
}

/// Map a failed KMS answer onto the error taxonomy.
pub(crate) fn map_error(status: StatusCode, body: &[u8]) -> Error {
    let (kind, message) = match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(e) => {
            let kind = match e.error_type.rsplit_once('#') {
                Some((_, kind)) => kind.to_string(),
                None => e.error_type,
            };
            (kind, e.message)
        }
        Err(_) => (String::new(), String::from_utf8_lossy(body).into_owned()),
    };
    let details = format!("status code: {status}, error code: {kind}, message: {message}");

    match kind.as_str() {
        "ThrottlingException"
        | "KMSInternalException"
        | "DependencyTimeoutException"
        | "KeyUnavailableException"
        | "LimitExceededException" => Error::Transient(details),
        "NotFoundException" => Error::NotFound(details),
        "DisabledException" | "KMSInvalidStateException" => Error::KeyDisabled(details),
        "AccessDeniedException"
        | "IncorrectKeyException"
        | "InvalidCiphertextException"
        | "UnrecognizedClientException"
        | "InvalidSignatureException" => Error::Unauthorized(details),
        _ if status.is_server_error() => Error::Transient(details),
        _ => Error::BadRequest(details),
    }
}

fn decode_key(mut encoded: String) -> Result<SecureKey> {
    let decoded = STANDARD.decode(&encoded).map(Zeroizing::new);
    encoded.zeroize();
    let decoded = decoded
        .map_err(|e| Error::BadRequest(format!("decode plaintext data key failed: {e}")))?;
    Ok(SecureKey::new(&decoded))
}

impl AwsKmsClient {
    fn build_headers(&self, action: &str, body: &[u8]) -> Result<HeaderMap> {
        let now = Utc::now();
        let mut signed = BTreeMap::from([
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), self.host.clone()),
            (
                "x-amz-date".to_string(),
                now.format(sigv4::AMZ_DATE_FORMAT).to_string(),
            ),
            (
                "x-amz-target".to_string(),
                format!("{TARGET_PREFIX}.{action}"),
            ),
        ]);
        if let Some(token) = &self.credential.session_token {
            signed.insert("x-amz-security-token".to_string(), token.as_str().to_owned());
        }

        let req = sigv4::SigningRequest {
            method: "POST",
            url: &self.endpoint,
            headers: &signed,
            payload: body,
        };
        let authorization =
            sigv4::authorization(&req, &self.credential, &self.region, SERVICE, now)?;

        let mut headers = HeaderMap::new();
        for (name, value) in signed.iter().filter(|(name, _)| *name != "host") {
            let name: HeaderName = name
                .parse()
                .map_err(|e| Error::Configuration(format!("invalid header name: {e}")))?;
            let value: HeaderValue = value
                .parse()
                .map_err(|e| Error::Configuration(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        let authorization: HeaderValue = authorization
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid authorization: {e}")))?;
        headers.insert("authorization", authorization);
        Ok(headers)
    }

    async fn do_request<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)
            .map_err(|e| Error::BadRequest(format!("serialize {action} request failed: {e}")))?;
        let headers = self.build_headers(action, &body)?;

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("send {action} request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transient(format!("read {action} response failed: {e}")))?;

        if !status.is_success() {
            error!("aws kms: {action} request failed with status {status}");
            return Err(map_error(status, &body));
        }

        match body.try_into_mut() {
            Ok(mut body) => parse_and_scrub(action, &mut body),
            Err(body) => {
                debug!("aws kms: {action} response body is shared with the connection buffer");
                parse_body(action, &body)
            }
        }
    }
}

fn parse_body<T: DeserializeOwned>(action: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::BadRequest(format!("parse {action} response failed: {e}")))
}

/// Parse a response body in place, then zero it. Bodies of `GenerateDataKey`
/// and `Decrypt` carry the plaintext data key.
fn parse_and_scrub<T: DeserializeOwned>(action: &str, body: &mut BytesMut) -> Result<T> {
    let res = parse_body(action, body);
    body[..].zeroize();
    res
}

#[async_trait]
impl KmsClient for AwsKmsClient {
    async fn create_cmk(&self) -> Result<Cmk> {
        let request = CreateKeyRequest {
            key_spec: "SYMMETRIC_DEFAULT",
            key_usage: "ENCRYPT_DECRYPT",
        };
        let response: CreateKeyResponse = self.do_request("CreateKey", &request).await?;
        Ok(Cmk::new(
            response.key_metadata.key_id,
            response.key_metadata.arn,
        ))
    }

    async fn generate_data_key(&self, cmk: &Cmk) -> Result<DataKey> {
        let request = GenerateDataKeyRequest {
            key_id: cmk.arn.as_deref().unwrap_or(&cmk.id),
            key_spec: "AES_256",
        };
        let response: GenerateDataKeyResponse =
            self.do_request("GenerateDataKey", &request).await?;

        let plaintext = decode_key(response.plaintext)?;
        let wrapped = STANDARD.decode(&response.ciphertext_blob).map_err(|e| {
            Error::BadRequest(format!("decode wrapped data key failed: {e}"))
        })?;
        Ok(DataKey {
            wrapped: WrappedDataKey(wrapped),
            plaintext,
        })
    }

    async fn decrypt_data_key(&self, cmk: &Cmk, wrapped: &WrappedDataKey) -> Result<SecureKey> {
        let request = DecryptRequest {
            key_id: cmk.arn.as_deref().unwrap_or(&cmk.id),
            ciphertext_blob: STANDARD.encode(wrapped.as_bytes()),
        };
        let response: DecryptResponse = self.do_request("Decrypt", &request).await?;
        decode_key(response.plaintext)
    }
}
