//! S3 `GetObject` over plain HTTPS with AWS Signature Version 4.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use opentelemetry::KeyValue;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use super::ObjectStore;
use crate::error::{Error, Result};
use crate::telemetry::metrics;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_REGION: &str = "eu-west-2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// SHA-256 of the empty request body.
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const BODY_EXCERPT_LEN: usize = 200;

/// Static AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
}

impl AwsCredentials {
    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::Config("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::Config("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;
        Ok(Self {
            access_key_id,
            secret_access_key: SecretString::from(secret_access_key),
            session_token: std::env::var("AWS_SESSION_TOKEN").ok().map(SecretString::from),
        })
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("session_token", &self.session_token.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    credentials: AwsCredentials,
    region: String,
    /// Custom endpoint for S3-compatible services; switches to path-style URLs.
    endpoint: Option<String>,
    http_client: Client,
}

impl S3ObjectStore {
    pub fn new(credentials: AwsCredentials, region: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            credentials,
            region: region.into(),
            endpoint: None,
            http_client,
        })
    }

    /// Build from the standard AWS environment variables.
    ///
    /// Region comes from `AWS_REGION`, then `AWS_DEFAULT_REGION`, then
    /// `eu-west-2`. `AWS_ENDPOINT_URL` selects a custom endpoint.
    pub fn from_env() -> Result<Self> {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let mut store = Self::new(AwsCredentials::from_env()?, region)?;
        store.endpoint = std::env::var("AWS_ENDPOINT_URL").ok();
        Ok(store)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Scheme, host and canonical path for an object.
    fn locate(&self, bucket: &str, key: &str) -> (String, String, String) {
        let encoded_key = uri_encode(key, false);
        match &self.endpoint {
            Some(endpoint) => {
                let (scheme, host) = match endpoint.split_once("://") {
                    Some((scheme, host)) => (scheme.to_string(), host.trim_end_matches('/')),
                    None => ("https".to_string(), endpoint.trim_end_matches('/')),
                };
                (
                    scheme,
                    host.to_string(),
                    format!("/{}/{encoded_key}", uri_encode(bucket, true)),
                )
            }
            None => (
                "https".to_string(),
                format!("{bucket}.s3.{}.amazonaws.com", self.region),
                format!("/{encoded_key}"),
            ),
        }
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let (scheme, host, path) = self.locate(bucket, key);
        let signed = sign_get(&self.credentials, &self.region, &host, &path, Utc::now());
        let url = format!("{scheme}://{host}{path}");

        tracing::debug!(%url, "fetching object from S3");

        let mut request = self
            .http_client
            .get(&url)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)
            .header("authorization", &signed.authorization);
        if let Some(token) = &self.credentials.session_token {
            request = request.header("x-amz-security-token", token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
            return Err(Error::Store(format!(
                "GET s3://{bucket}/{key} returned {status}: {excerpt}"
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let result = self.fetch(bucket, key).await;
        metrics::object_fetches().add(
            1,
            &[
                KeyValue::new("backend", self.backend()),
                KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
            ],
        );
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SignedRequest {
    amz_date: String,
    authorization: String,
}

/// Sign an empty-bodied `GET` of `path` on `host`.
fn sign_get(
    credentials: &AwsCredentials,
    region: &str,
    host: &str,
    path: &str,
    now: DateTime<Utc>,
) -> SignedRequest {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let scope = format!("{date_stamp}/{region}/s3/aws4_request");

    // Header names must be lowercase and sorted.
    let mut headers = vec![
        ("host", host.to_string()),
        ("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token", token.expose_secret().to_string()));
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "GET\n{path}\n\n{canonical_headers}\n{signed_headers}\n{EMPTY_PAYLOAD_SHA256}"
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(
        credentials.secret_access_key.expose_secret(),
        &date_stamp,
        region,
    );
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    SignedRequest {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
        amz_date,
    }
}

fn signing_key(secret: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode everything except RFC 3986 unreserved characters.
/// `/` survives unless `encode_slash` is set.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
