use std::collections::BTreeMap;

use md5::{Digest, Md5};
use rand::RngCore;
use thiserror::Error;
use url::Url;

use crate::credentials::DigestCredentials;

pub const NONCE_COUNT: &str = "00000001";
pub const QOP_AUTH: &str = "auth";
pub const DEFAULT_ALGORITHM: &str = "MD5";
pub const DEFAULT_BASE_URL: &str = "http://localhost";

const CNONCE_BYTES: usize = 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestChallengeError {
    #[error("WWW-Authenticate does not carry a Digest challenge")]
    NotDigest,
    #[error("digest challenge is missing \"{0}\"")]
    MissingParameter(&'static str),
    #[error("digest algorithm \"{0}\" is not supported")]
    UnsupportedAlgorithm(String),
    #[error("request url \"{url}\" cannot be resolved: {message}")]
    InvalidRequestUrl { url: String, message: String },
}

pub fn is_digest_challenge(header: &str) -> bool {
    header.trim().to_ascii_lowercase().starts_with("digest")
}

fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

/// Splits a challenge into lower-cased keys and unquoted values. Segments
/// without `=` are dropped; the scheme prefix is removed from the first key.
pub fn parse_auth_params(header: &str) -> BTreeMap<String, String> {
    header
        .split(',')
        .filter_map(|segment| segment.split_once('='))
        .filter_map(|(key, value)| {
            let key = strip_quotes(key).to_ascii_lowercase();
            let key = key.strip_prefix("digest ").unwrap_or(&key).trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some((key, strip_quotes(value).to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub algorithm: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Result<Self, DigestChallengeError> {
        if !is_digest_challenge(header) {
            return Err(DigestChallengeError::NotDigest);
        }
        let mut params = parse_auth_params(header);
        let mut required = |name: &'static str| {
            params
                .remove(name)
                .filter(|value| !value.is_empty())
                .ok_or(DigestChallengeError::MissingParameter(name))
        };
        let realm = required("realm")?;
        let nonce = required("nonce")?;
        let algorithm = match params.remove("algorithm") {
            Some(algorithm) if !algorithm.eq_ignore_ascii_case(DEFAULT_ALGORITHM) => {
                return Err(DigestChallengeError::UnsupportedAlgorithm(algorithm))
            }
            _ => DEFAULT_ALGORITHM.to_string(),
        };
        Ok(Self {
            realm,
            nonce,
            algorithm,
            qop: params.remove("qop"),
            opaque: params.remove("opaque").filter(|value| !value.is_empty()),
        })
    }
}

pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Hex encoding of 24 bytes from the thread-local CSPRNG.
pub fn generate_cnonce() -> String {
    let mut bytes = [0u8; CNONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn resolve_url(url: &str, base_url: Option<&str>) -> Result<Url, DigestChallengeError> {
    let invalid = |error: url::ParseError| DigestChallengeError::InvalidRequestUrl {
        url: url.to_string(),
        message: error.to_string(),
    };
    let base = Url::parse(base_url.unwrap_or(DEFAULT_BASE_URL)).map_err(invalid)?;
    base.join(url).map_err(invalid)
}

/// The `uri` digest field: path only, no query.
pub fn request_path(url: &str, base_url: Option<&str>) -> Result<String, DigestChallengeError> {
    resolve_url(url, base_url).map(|resolved| resolved.path().to_string())
}

pub fn compute_response(
    credentials: &DigestCredentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    md5_hex(&format!(
        "{}:{}:{}:{}:{}:{}",
        ha1, challenge.nonce, NONCE_COUNT, cnonce, QOP_AUTH, ha2
    ))
}

pub fn authorization_header(
    credentials: &DigestCredentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    let response = compute_response(credentials, challenge, method, uri, cnonce);
    let mut fields = vec![
        format!("username=\"{}\"", credentials.username),
        format!("realm=\"{}\"", challenge.realm),
        format!("nonce=\"{}\"", challenge.nonce),
        format!("uri=\"{}\"", uri),
        format!("qop=\"{}\"", QOP_AUTH),
        format!("algorithm=\"{}\"", challenge.algorithm),
        format!("response=\"{}\"", response),
        format!("nc=\"{}\"", NONCE_COUNT),
        format!("cnonce=\"{}\"", cnonce),
    ];
    if let Some(opaque) = &challenge.opaque {
        fields.push(format!("opaque=\"{}\"", opaque));
    }
    format!("Digest {}", fields.join(", "))
}
