//! Credential keys.
//!
//! Workers and users authenticate with an opaque token that travels as
//! base64. The coordinator never stores the token itself: it decodes the
//! bytes and hex-encodes them into a [`CredentialKey`], which is the lookup
//! key in the credential store (`worker:<hex>` / `user:<hex>`).

use std::fmt;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Socket tokens are accepted with or without trailing padding.
const SOCKET_TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Bearer tokens must be padded; unused bits in the last symbol are ignored.
const BEARER_TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// `Authorization` header grammar: `Bearer` followed by canonical, padded base64.
static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Bearer ((?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?)$")
        .expect("bearer pattern is valid")
});

/// Reasons a token cannot be turned into a [`CredentialKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The token is not base64.
    #[error("token is not valid base64")]
    InvalidEncoding,
    /// The token decodes to zero bytes.
    #[error("token decodes to an empty key")]
    Empty,
    /// The `Authorization` header is not `Bearer <base64>`.
    #[error("authorization header is not a bearer token")]
    MalformedHeader,
}

/// Canonical identity of a worker or user: lowercase hex of the token bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialKey(String);

impl CredentialKey {
    /// Decode a socket `auth` token.
    pub fn from_token(token: &str) -> Result<Self, TokenError> {
        let bytes = SOCKET_TOKEN_ENGINE
            .decode(token.trim())
            .map_err(|_| TokenError::InvalidEncoding)?;
        Self::from_bytes(&bytes)
    }

    /// Decode the value of an HTTP `Authorization` header.
    pub fn from_authorization(header: &str) -> Result<Self, TokenError> {
        let captures = BEARER_RE
            .captures(header)
            .ok_or(TokenError::MalformedHeader)?;
        let encoded = captures.get(1).map_or("", |m| m.as_str());
        let bytes = BEARER_TOKEN_ENGINE
            .decode(encoded)
            .map_err(|_| TokenError::InvalidEncoding)?;
        Self::from_bytes(&bytes)
    }

    /// Build a key from raw token bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        if bytes.is_empty() {
            return Err(TokenError::Empty);
        }
        Ok(Self(hex::encode(bytes)))
    }

    /// The hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode raw key bytes as a socket token. Mostly useful for tests and tooling.
    #[must_use]
    pub fn encode_token(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }
}

impl AsRef<str> for CredentialKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
