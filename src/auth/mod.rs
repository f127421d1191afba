//! Authentication primitives.
//!
//! - [`token`] - HS256 JWT bearer tokens (`jsonwebtoken`)
//! - [`credentials`] - Basic/Bearer header parsing and bcrypt password checks
//!
//! The HTTP middleware built on top of these lives in [`crate::server::auth`].

pub mod credentials;
pub mod token;

pub use credentials::{bearer_token, BasicCredentials, PasswordHasher};
pub use token::{Claims, TokenSigner, TOKEN_ALGORITHM};
