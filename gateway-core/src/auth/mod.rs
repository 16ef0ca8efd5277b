//! Auth Verifier (C2): principal and role types, token extraction, and
//! JWT signature verification.

pub mod principal;
pub mod verifier;

pub use principal::{Principal, Role};
pub use verifier::{AuthMode, AuthVerifier, EmptyUserDirectory, HandshakeRequest, TokenClaims, TokenSource, UserDirectory};
