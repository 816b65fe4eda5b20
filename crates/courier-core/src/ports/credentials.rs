//! CredentialResolver port - シークレットの解決
//!
//! `CredentialRef` は不透明なハンドルで、upload の直前にここで実体に解決します。
//!
//! # 設計原則
//! - 解決した値はログに出さない、run の状態にも保存しない
//! - `Credential` の Debug は常に伏せ字

use std::fmt;

use thiserror::Error;

use crate::domain::CredentialRef;

/// A resolved secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for storage clients only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Resolution failure. The message never names the reference or its source,
/// so it can be recorded in run state as-is.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential is not available")]
    NotFound,

    #[error("credential is empty")]
    Empty,
}

/// CredentialResolver は CredentialRef を Credential に解決
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, reference: &CredentialRef) -> Result<Credential, CredentialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_shows_secret() {
        let c = Credential::new("hunter2");
        let shown = format!("{c:?}");
        assert!(!shown.contains("hunter2"));
        assert_eq!(c.expose(), "hunter2");
    }
}
