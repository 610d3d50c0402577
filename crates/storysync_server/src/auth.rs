//! Authentication support for the sync server.
//!
//! This module provides bearer tokens signed with HMAC-SHA256.
//! Tokens include a timestamp for expiration checking.
//!
//! ## Token Format
//!
//! Tokens are composed of:
//! - 8 bytes: user ID (big-endian)
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 48 bytes, URL-safe base64 (unpadded) for transport.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storysync_protocol::UserId;

type HmacSha256 = Hmac<Sha256>;

const PAYLOAD_LEN: usize = 16;
const TOKEN_LEN: usize = PAYLOAD_LEN + 32;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for a user, issued now.
    pub fn create_token(&self, user_id: UserId) -> ServerResult<String> {
        self.create_token_at(user_id, now_millis())
    }

    fn create_token_at(&self, user_id: UserId, issued_millis: u64) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(&user_id.to_be_bytes());
        token.extend_from_slice(&issued_millis.to_be_bytes());

        let mut mac = self.mac()?;
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Validates a token and returns the user it was issued to.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the token is malformed, its
    /// signature does not verify, or it has expired.
    pub fn validate_token(&self, token: &str) -> ServerResult<UserId> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }

        let (payload, signature) = bytes.split_at(PAYLOAD_LEN);
        let mut mac = self.mac()?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let (user_bytes, issued_bytes) = payload.split_at(8);
        let user_id = UserId::from_be_bytes(fixed(user_bytes)?);
        let issued = u64::from_be_bytes(fixed(issued_bytes)?);

        let expiry = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(user_id)
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key rejected: {e}")))
    }
}

fn fixed(bytes: &[u8]) -> ServerResult<[u8; 8]> {
    bytes
        .try_into()
        .map_err(|_| ServerError::NotAuthorized("invalid token layout".into()))
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token(7).unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), 7);
    }

    #[test]
    fn negative_user_ids_survive() {
        let validator = validator();
        let token = validator.create_token(-12).unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), -12);
    }

    #[test]
    fn reject_other_secret() {
        let token = validator().create_token(7).unwrap();
        let other = TokenValidator::new(AuthConfig::new(b"another-secret".to_vec()));
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let token = validator.create_token(7).unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[7] ^= 0x01; // claim a different user
        let forged = URL_SAFE_NO_PAD.encode(bytes);

        assert!(validator.validate_token(&forged).is_err());
    }

    #[test]
    fn reject_garbage() {
        let validator = validator();
        assert!(validator.validate_token("").is_err());
        assert!(validator.validate_token("not base64 !!").is_err());
        assert!(validator.validate_token("AAAA").is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = TokenValidator::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
                .with_expiry(Duration::from_secs(60)),
        );
        let issued = now_millis() - 61_000;
        let token = validator.create_token_at(7, issued).unwrap();
        assert!(matches!(
            validator.validate_token(&token),
            Err(ServerError::NotAuthorized(_))
        ));
    }
}
