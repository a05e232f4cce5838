//! Secret protection for stored credential passwords
//!
//! The scan path only ever sees decrypted passwords. Storage and key
//! management live behind [`SecretProtector`]; deployments plug their own
//! implementation into [`crate::state::AppState`].

use crate::error::Result;

/// Opaque protect/unprotect service
pub trait SecretProtector: Send + Sync {
    /// Turn a plaintext secret into its stored form
    fn protect(&self, plaintext: &str) -> Result<String>;

    /// Recover the plaintext from its stored form
    fn unprotect(&self, protected: &str) -> Result<String>;
}

/// Identity protector. Development and tests only.
#[derive(Debug, Clone, Default)]
pub struct PlaintextProtector;

impl SecretProtector for PlaintextProtector {
    fn protect(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn unprotect(&self, protected: &str) -> Result<String> {
        Ok(protected.to_string())
    }
}
