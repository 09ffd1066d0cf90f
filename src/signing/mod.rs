//! AWS Signature Version 4 request signing.
//!
//! Used by the SQS dead-letter queue adapter. Signing takes the request's
//! method, URL, headers and body and adds `x-amz-date`,
//! `x-amz-content-sha256`, the optional `x-amz-security-token` and the
//! `authorization` header.

mod canonical;

pub use canonical::{canonical_headers, canonical_query_string, normalize_uri_path, uri_encode};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use url::Url;

use crate::errors::{PipelineError, PipelineResult};

type HmacSha256 = Hmac<Sha256>;

/// Signature algorithm identifier.
pub const AWS_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Credentials and scope for signing.
#[derive(Clone, Debug)]
pub struct SigningParams {
    /// AWS region, e.g. `us-east-1`.
    pub region: String,
    /// Service name, e.g. `sqs`.
    pub service: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: SecretString,
    /// Session token for temporary credentials.
    pub session_token: Option<SecretString>,
}

impl SigningParams {
    /// Creates signing parameters with empty credentials.
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
            access_key_id: String::new(),
            secret_access_key: SecretString::new(String::new()),
            session_token: None,
        }
    }

    /// Sets the access key id.
    #[must_use]
    pub fn with_access_key(mut self, access_key_id: impl Into<String>) -> Self {
        self.access_key_id = access_key_id.into();
        self
    }

    /// Sets the secret access key.
    #[must_use]
    pub fn with_secret_key(mut self, secret: SecretString) -> Self {
        self.secret_access_key = secret;
        self
    }

    /// Sets the session token.
    #[must_use]
    pub fn with_session_token(mut self, token: Option<SecretString>) -> Self {
        self.session_token = token;
        self
    }
}

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> PipelineResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| PipelineError::Configuration {
        message: format!("Invalid signing key: {}", e),
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derives the signing key for a date, region and service.
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> PipelineResult<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn host_header(url: &Url) -> PipelineResult<String> {
    let host = url.host_str().ok_or_else(|| PipelineError::Configuration {
        message: format!("URL has no host: {}", url),
    })?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Signs a request, inserting the signing headers into `headers`.
///
/// `headers` keys are expected in lowercase. A `host` header is added from
/// the URL when missing.
pub fn sign_request(
    method: &str,
    url: &str,
    headers: &mut HashMap<String, String>,
    payload: &[u8],
    params: &SigningParams,
    timestamp: &DateTime<Utc>,
) -> PipelineResult<()> {
    if params.access_key_id.is_empty() || params.secret_access_key.expose_secret().is_empty() {
        return Err(PipelineError::Configuration {
            message: "AWS credentials are required for signing".to_string(),
        });
    }

    let parsed = Url::parse(url)?;
    let date_stamp = timestamp.format("%Y%m%d").to_string();
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = sha256_hex(payload);

    if !headers.contains_key("host") {
        headers.insert("host".to_string(), host_header(&parsed)?);
    }
    headers.insert("x-amz-date".to_string(), amz_date.clone());
    headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
    if let Some(token) = &params.session_token {
        headers.insert(
            "x-amz-security-token".to_string(),
            token.expose_secret().clone(),
        );
    }

    let query: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let (canonical_headers_str, signed_headers) = canonical_headers(headers);
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_uppercase(),
        uri_encode(&normalize_uri_path(parsed.path()), false),
        canonical_query_string(&query),
        canonical_headers_str,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, params.region, params.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        AWS_ALGORITHM,
        amz_date,
        credential_scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        params.secret_access_key.expose_secret(),
        &date_stamp,
        &params.region,
        &params.service,
    )?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    headers.insert(
        "authorization".to_string(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            AWS_ALGORITHM, params.access_key_id, credential_scope, signed_headers, signature
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params() -> SigningParams {
        SigningParams::new("us-east-1", "sqs")
            .with_access_key("AKIDEXAMPLE")
            .with_secret_key(SecretString::new(
                "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            ))
    }

    #[test]
    fn test_derive_signing_key_known_vector() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sha256_of_empty_payload() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sign_request_adds_headers() {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-amz-json-1.0".to_string(),
        );

        sign_request(
            "POST",
            "https://sqs.us-east-1.amazonaws.com/",
            &mut headers,
            b"{}",
            &params().with_session_token(Some(SecretString::new("token".to_string()))),
            &timestamp,
        )
        .unwrap();

        assert_eq!(headers["host"], "sqs.us-east-1.amazonaws.com");
        assert_eq!(headers["x-amz-date"], "20240115T103000Z");
        assert_eq!(headers["x-amz-security-token"], "token");
        let auth = &headers["authorization"];
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240115/us-east-1/sqs/aws4_request"
        ));
        assert!(auth.contains(
            "SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date;x-amz-security-token"
        ));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let sign = || {
            let mut headers = HashMap::new();
            sign_request(
                "POST",
                "http://localhost:4566/",
                &mut headers,
                b"payload",
                &params(),
                &timestamp,
            )
            .unwrap();
            headers
        };
        let first = sign();
        assert_eq!(first["host"], "localhost:4566");
        assert_eq!(first["authorization"], sign()["authorization"]);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut headers = HashMap::new();
        let result = sign_request(
            "POST",
            "https://sqs.us-east-1.amazonaws.com/",
            &mut headers,
            b"",
            &SigningParams::new("us-east-1", "sqs"),
            &Utc::now(),
        );
        assert!(matches!(result, Err(PipelineError::Configuration { .. })));
    }
}
