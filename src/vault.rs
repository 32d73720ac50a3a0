//! Secret lookup for credentials used by the network fetcher

use std::collections::HashMap;
use std::fmt;

/// Read-only store of named secrets
pub trait Vault: Send + Sync + fmt::Debug {
    /// Returns the secret stored under `name`, if any
    fn secret(&self, name: &str) -> Option<String>;
}

/// Vault backed by process environment variables
///
/// A secret named `api-token` is read from `<PREFIX>API_TOKEN`: the name is
/// upper-cased and `-`/`.` become `_`.
#[derive(Debug, Clone, Default)]
pub struct EnvVault {
    prefix: String,
}

impl EnvVault {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for a secret name
    pub fn variable(&self, name: &str) -> String {
        let name: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, name)
    }
}

impl Vault for EnvVault {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(self.variable(name))
            .ok()
            .filter(|value| !value.is_empty())
    }
}

/// Vault holding a fixed set of secrets
#[derive(Clone, Default)]
pub struct StaticVault {
    secrets: HashMap<String, String>,
}

impl StaticVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

// Keep secret values out of logs
impl fmt::Debug for StaticVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticVault")
            .field("names", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Vault for StaticVault {
    fn secret(&self, name: &str) -> Option<String> {
        self.secrets.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_vault_variable_naming() {
        let vault = EnvVault::new("ORIGIN_CACHE_");
        assert_eq!(vault.variable("api-token"), "ORIGIN_CACHE_API_TOKEN");
        assert_eq!(vault.variable("origin.key"), "ORIGIN_CACHE_ORIGIN_KEY");
    }

    #[test]
    fn test_env_vault_reads_environment() {
        let vault = EnvVault::new("ORIGIN_CACHE_VAULT_TEST_");
        std::env::set_var("ORIGIN_CACHE_VAULT_TEST_TOKEN", "s3cret");

        assert_eq!(vault.secret("token").as_deref(), Some("s3cret"));
        assert!(vault.secret("missing").is_none());
    }

    #[test]
    fn test_static_vault_debug_hides_values() {
        let vault = StaticVault::new().with_secret("token", "s3cret");

        assert_eq!(vault.secret("token").as_deref(), Some("s3cret"));
        assert!(!format!("{vault:?}").contains("s3cret"));
    }
}
