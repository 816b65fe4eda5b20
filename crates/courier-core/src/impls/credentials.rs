//! CredentialResolver の実装
//!
//! - **EnvCredentialResolver**: 環境変数から読む（本番・CI 用）
//! - **StaticCredentialResolver**: 固定の map（テスト用）

use std::collections::HashMap;

use crate::domain::CredentialRef;
use crate::ports::{Credential, CredentialError, CredentialResolver};

/// Reads the environment variable `<prefix><reference>`.
///
/// With prefix `COURIER_`, the reference `STAGING_TOKEN` reads
/// `COURIER_STAGING_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialResolver {
    prefix: String,
}

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable(&self, reference: &CredentialRef) -> String {
        format!("{}{}", self.prefix, reference.as_str())
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, reference: &CredentialRef) -> Result<Credential, CredentialError> {
        match std::env::var(self.variable(reference)) {
            Ok(value) if value.trim().is_empty() => Err(CredentialError::Empty),
            Ok(value) => Ok(Credential::new(value)),
            Err(_) => Err(CredentialError::NotFound),
        }
    }
}

/// Fixed reference -> secret map.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    secrets: HashMap<String, String>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(reference.into(), secret.into());
        self
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, reference: &CredentialRef) -> Result<Credential, CredentialError> {
        match self.secrets.get(reference.as_str()) {
            Some(secret) if secret.is_empty() => Err(CredentialError::Empty),
            Some(secret) => Ok(Credential::new(secret.clone())),
            None => Err(CredentialError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_looks_up_by_reference() {
        let resolver = StaticCredentialResolver::new()
            .with("STAGING_TOKEN", "abc")
            .with("EMPTY", "");

        let c = resolver.resolve(&CredentialRef::new("STAGING_TOKEN")).unwrap();
        assert_eq!(c.expose(), "abc");
        assert_eq!(
            resolver.resolve(&CredentialRef::new("EMPTY")).unwrap_err(),
            CredentialError::Empty
        );
        assert_eq!(
            resolver.resolve(&CredentialRef::new("MISSING")).unwrap_err(),
            CredentialError::NotFound
        );
    }

    #[test]
    fn env_resolver_applies_prefix() {
        let resolver = EnvCredentialResolver::with_prefix("COURIER_TEST_");
        assert_eq!(
            resolver.variable(&CredentialRef::new("STAGING_TOKEN")),
            "COURIER_TEST_STAGING_TOKEN"
        );
        // a variable nobody sets
        let err = resolver
            .resolve(&CredentialRef::new("SURELY_UNSET_9F2A"))
            .unwrap_err();
        assert_eq!(err, CredentialError::NotFound);
        assert!(!err.to_string().contains("SURELY_UNSET_9F2A"));
    }

    #[test]
    fn env_resolver_reads_existing_variable() {
        // PATH is present in every test environment
        let resolver = EnvCredentialResolver::new();
        let c = resolver.resolve(&CredentialRef::new("PATH")).unwrap();
        assert!(!c.expose().is_empty());
    }
}
