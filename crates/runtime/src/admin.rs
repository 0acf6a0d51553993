//! Admin access policy.
//!
//! When `CERISE_ADMIN_TOKEN` is set, admin surfaces must present the token
//! (Bearer or `X-Admin-Token`); the comparison happens in constant time over
//! SHA-256 digests so neither the token value nor its length leaks. Without
//! a token, access is restricted to loopback callers.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use cerise_domain::config::env_vars;

pub struct AdminGuard {
    /// SHA-256 of the configured token; `None` = loopback-only dev mode.
    token_hash: Option<[u8; 32]>,
}

impl AdminGuard {
    /// Read the token from the environment once at startup.
    pub fn from_env() -> Self {
        let token = std::env::var(env_vars::ADMIN_TOKEN).unwrap_or_default();
        Self::new(&token)
    }

    pub fn new(token: &str) -> Self {
        if token.is_empty() {
            tracing::warn!("no admin token configured, restricting admin access to localhost");
            return Self { token_hash: None };
        }
        Self {
            token_hash: Some(Sha256::digest(token.as_bytes()).into()),
        }
    }

    /// Decide whether a caller may use admin surfaces.
    ///
    /// `presented` is the token from `Authorization: Bearer …` or
    /// `X-Admin-Token`; `is_loopback` is whether the peer address is local.
    pub fn allow(&self, presented: Option<&str>, is_loopback: bool) -> bool {
        match &self.token_hash {
            None => is_loopback,
            Some(expected) => {
                let provided_hash = Sha256::digest(presented.unwrap_or("").as_bytes());
                bool::from(provided_hash.ct_eq(expected.as_slice()))
            }
        }
    }
}
