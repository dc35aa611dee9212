//! Rolling token derivation.
//!
//! A token is `{version}.{envelope}.{step_counter}.{signature}` where
//!
//! ```text
//! step_counter = floor(unix_seconds / step_seconds)
//! signature    = base64url_no_pad(HMAC_SHA256(key, envelope + "." + step_counter))
//! ```
//!
//! The counter only changes once per step, so every device holding the same
//! session produces the same token within a window and a different one in the
//! next. Scanners verify with [`TokenSigner::verify`].

use crate::error::{ConfigError, SigningError};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

type HmacSha256 = Hmac<Sha256>;

/// Version tag used when none is configured.
pub const DEFAULT_PROTOCOL_VERSION: &str = "v3";

const SEPARATOR: char = '.';

/// Number of whole steps since the unix epoch.
///
/// A zero step is treated as one second.
///
/// # Examples
///
/// ```
/// use ticket_qr::token::step_counter;
///
/// assert_eq!(step_counter(1_747_203_300, 60), 29_120_055);
/// assert_eq!(step_counter(1_747_203_359, 60), 29_120_055);
/// assert_eq!(step_counter(1_747_203_360, 60), 29_120_056);
/// ```
#[must_use]
pub fn step_counter(unix_seconds: i64, step_seconds: u64) -> i64 {
    let step = i64::try_from(step_seconds.max(1)).unwrap_or(i64::MAX);
    unix_seconds.div_euclid(step)
}

/// Token version tag (`v3` unless configured otherwise).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(String);

impl ProtocolVersion {
    /// Validate a version tag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProtocolVersion`] if the tag is empty,
    /// contains whitespace, or contains the token separator.
    pub fn new(tag: impl Into<String>) -> Result<Self, ConfigError> {
        let tag = tag.into();
        if tag.is_empty() || tag.contains(SEPARATOR) || tag.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidProtocolVersion(tag));
        }
        Ok(Self(tag))
    }

    /// The tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self(DEFAULT_PROTOCOL_VERSION.to_string())
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw HMAC key material. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode a base64url key as sent by the issuing server.
    ///
    /// The URL-safe alphabet is mapped back to the standard one and the
    /// input is padded to a multiple of four before decoding, so keys with
    /// or without trailing `=` are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::InvalidKeyEncoding`] if the input is not valid base64.
    pub fn from_base64url(encoded: &str) -> Result<Self, SigningError> {
        let mut standard: String = encoded
            .trim()
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();
        while standard.len() % 4 != 0 {
            standard.push('=');
        }

        STANDARD
            .decode(standard)
            .map(Self)
            .map_err(|e| SigningError::InvalidKeyEncoding(e.to_string()))
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey(<redacted {} bytes>)", self.0.len())
    }
}

/// Signs and verifies tokens with one session key.
#[derive(Debug, Clone)]
pub struct TokenSigner {
    key: SigningKey,
}

impl TokenSigner {
    /// Create a signer for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::EmptyKey`] for a zero-length key.
    pub fn new(key: SigningKey) -> Result<Self, SigningError> {
        if key.is_empty() {
            return Err(SigningError::EmptyKey);
        }
        Ok(Self { key })
    }

    fn mac(&self, envelope: &str, step_counter: i64) -> Result<HmacSha256, SigningError> {
        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
            .map_err(|_| SigningError::InvalidKeyLength)?;
        mac.update(envelope.as_bytes());
        mac.update(b".");
        mac.update(step_counter.to_string().as_bytes());
        Ok(mac)
    }

    /// Base64url (unpadded) HMAC-SHA256 of `"{envelope}.{step_counter}"`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::InvalidKeyLength`] if the HMAC cannot be keyed.
    pub fn signature(&self, envelope: &str, step_counter: i64) -> Result<String, SigningError> {
        let mac = self.mac(envelope, step_counter)?;
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Build the full token string.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::InvalidEnvelope`] if the envelope is empty or
    /// contains `.`, since the token could not be split again.
    pub fn sign(
        &self,
        version: &ProtocolVersion,
        envelope: &str,
        step_counter: i64,
    ) -> Result<String, SigningError> {
        if envelope.is_empty() || envelope.contains(SEPARATOR) {
            return Err(SigningError::InvalidEnvelope);
        }
        let signature = self.signature(envelope, step_counter)?;
        Ok(format!("{version}.{envelope}.{step_counter}.{signature}"))
    }

    /// Check that `token` was signed with this key.
    ///
    /// The comparison is constant time.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::SignatureMismatch`] if the signature does not match.
    pub fn verify(&self, token: &Token) -> Result<(), SigningError> {
        self.mac(&token.envelope, token.step_counter)?
            .verify_slice(&token.signature)
            .map_err(|_| SigningError::SignatureMismatch)
    }
}

/// A token split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Version tag
    pub version: String,
    /// Server-issued envelope
    pub envelope: String,
    /// Time step the token was signed for
    pub step_counter: i64,
    /// Raw HMAC bytes
    pub signature: Vec<u8>,
}

impl Token {
    /// Parse a token string.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::MalformedToken`] unless the input has exactly
    /// four non-empty segments, a decimal counter and a base64url signature.
    pub fn parse(raw: &str) -> Result<Self, SigningError> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let [version, envelope, counter, signature] = parts.as_slice() else {
            return Err(SigningError::MalformedToken(format!(
                "expected 4 segments, found {}",
                parts.len()
            )));
        };

        if version.is_empty() || envelope.is_empty() {
            return Err(SigningError::MalformedToken("empty segment".to_string()));
        }
        if counter.is_empty() || !counter.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SigningError::MalformedToken(format!(
                "step counter {counter:?} is not a decimal number"
            )));
        }
        let step_counter = counter
            .parse()
            .map_err(|e| SigningError::MalformedToken(format!("step counter: {e}")))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| SigningError::MalformedToken(format!("signature: {e}")))?;
        if signature.is_empty() {
            return Err(SigningError::MalformedToken("empty signature".to_string()));
        }

        Ok(Self {
            version: (*version).to_string(),
            envelope: (*envelope).to_string(),
            step_counter,
            signature,
        })
    }
}

impl FromStr for Token {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.version,
            self.envelope,
            self.step_counter,
            URL_SAFE_NO_PAD.encode(&self.signature)
        )
    }
}
