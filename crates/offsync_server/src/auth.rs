//! Bearer token authentication.
//!
//! Tokens are HMAC-SHA256 signed and carry their issue time for expiry
//! checking. They are minted out of band (`offsync-server mint-token`).
//!
//! ## Token Format
//!
//! - 16 bytes: client id
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 24 bytes
//!
//! Total: 56 bytes, hex-encoded for transport.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use offsync_core::duration_ms;
use offsync_protocol::{ClientId, Timestamp};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const CLAIMS_LEN: usize = 24;
const TOKEN_LEN: usize = CLAIMS_LEN + 32;

/// Authentication configuration.
#[derive(Clone)]
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
            token_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Issues and checks bearer tokens.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a hex token for `client_id`, issued at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the MAC cannot be keyed.
    pub fn create_token(&self, client_id: ClientId, now: Timestamp) -> ServerResult<String> {
        let mut data = Vec::with_capacity(TOKEN_LEN);
        data.extend_from_slice(client_id.as_bytes());
        data.extend_from_slice(&now.to_be_bytes());

        let signature = self.mac(&data)?.finalize().into_bytes();
        data.extend_from_slice(&signature);
        Ok(hex::encode(data))
    }

    /// Validates a token and returns the client it was issued to.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] for a malformed, tampered or
    /// expired token.
    pub fn validate_token(&self, token: &str, now: Timestamp) -> ServerResult<ClientId> {
        let bytes = hex::decode(token)
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }
        let (claims, signature) = bytes.split_at(CLAIMS_LEN);

        self.mac(claims)?
            .verify_slice(signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let mut client = [0u8; 16];
        client.copy_from_slice(&claims[..16]);
        let mut issued = [0u8; 8];
        issued.copy_from_slice(&claims[16..]);
        let issued_at = u64::from_be_bytes(issued);

        if now > issued_at.saturating_add(duration_ms(self.config.token_expiry)) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }
        Ok(ClientId::from_bytes(client))
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}
