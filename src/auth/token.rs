//! HS256 bearer tokens.
//!
//! Tokens are standard compact JWTs produced and checked by `jsonwebtoken`.
//! [`TokenSigner`] pins the algorithm to HS256 and owns the expiry rule.
//!
//! # Security Properties
//!
//! - **Tamper evidence**: the signature covers the exact header and payload text
//! - **Algorithm pinning**: any `alg` other than HS256 is refused, `none` included
//! - **Time-limited**: tokens are rejected once `exp` is reached, with no clock skew allowance
//!
//! # Example
//!
//! ```rust
//! use account_api::auth::token::{Claims, TokenSigner};
//! use std::time::Duration;
//!
//! let signer = TokenSigner::new("my-secret-key").unwrap();
//! let claims = Claims::new("user-id", "alice", Duration::from_secs(3600));
//!
//! let token = signer.sign(&claims).unwrap();
//! assert_eq!(signer.parse(&token).unwrap(), claims);
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// The only algorithm this signer produces or accepts.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

// =============================================================================
// Claims
// =============================================================================

/// Claims carried in a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identifier of the user the token was issued to
    pub sub: String,

    /// Login name at issue time
    pub login: String,

    /// Issue time (Unix epoch seconds)
    pub iat: u64,

    /// Expiry time (Unix epoch seconds)
    pub exp: u64,
}

impl Claims {
    /// Build claims issued now and valid for `ttl`.
    pub fn new(sub: impl Into<String>, login: impl Into<String>, ttl: Duration) -> Self {
        let iat = unix_now();
        Self {
            sub: sub.into(),
            login: login.into(),
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
        }
    }
}

// =============================================================================
// Token Signer
// =============================================================================

/// Signs and validates bearer tokens with a fixed secret.
///
/// Built once at startup and shared read-only afterwards; there is no way
/// to change the secret of an existing signer.
#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret_key", &"<redacted>")
            .field("algorithm", &TOKEN_ALGORITHM)
            .finish()
    }
}

impl TokenSigner {
    /// Create a signer. An empty secret is rejected.
    pub fn new(secret_key: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        let secret_key = secret_key.as_ref();
        if secret_key.is_empty() {
            return Err(TokenError::EmptySecret);
        }

        // Expiry is checked in `parse_at` against an explicit clock
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret_key),
            decoding_key: DecodingKey::from_secret(secret_key),
            validation,
        })
    }

    /// Sign `claims` into a compact token.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(TOKEN_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Issue a token for a user, valid for `ttl` from now.
    pub fn issue(&self, sub: &str, login: &str, ttl: Duration) -> Result<String, TokenError> {
        self.sign(&Claims::new(sub, login, ttl))
    }

    /// Parse and validate a token against the current time.
    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        self.parse_at(token, unix_now())
    }

    /// Parse and validate a token as of `current_time` (Unix seconds).
    pub fn parse_at(&self, token: &str, current_time: u64) -> Result<Claims, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed);
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| token_error(token, e))?
            .claims;

        if current_time >= claims.exp {
            return Err(TokenError::Expired {
                expired_at: claims.exp,
                current_time,
            });
        }

        Ok(claims)
    }
}

fn token_error(token: &str, err: JwtError) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => match decode_header(token) {
            Ok(header) => TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)),
            Err(_) => TokenError::Malformed,
        },
        _ => TokenError::Malformed,
    }
}

/// Current time in Unix epoch seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
