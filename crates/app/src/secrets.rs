//! Credential resolution.
//!
//! Each secret is looked up once at startup, in order: environment
//! variable, then the OS keyring. Never commit keys to the repo.

use shared::error::ChatError;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const KEYRING_SERVICE: &str = "dual-llm-chat";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ADMIN_PASSWORD: &str = "ADMIN_PASSWORD";

pub enum SecretLookup {
    Found(Zeroizing<String>),
    Missing,
}

impl SecretLookup {
    pub fn into_option(self) -> Option<Zeroizing<String>> {
        match self {
            SecretLookup::Found(v) => Some(v),
            SecretLookup::Missing => None,
        }
    }
}

/// Second place to look after the environment.
pub trait SecretStore {
    fn get(&self, name: &str) -> Option<Zeroizing<String>>;
}

pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn get(&self, name: &str) -> Option<Zeroizing<String>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, name).ok()?;
        match entry.get_password() {
            Ok(value) => Some(Zeroizing::new(value)),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                debug!("keyring lookup for {} failed: {}", name, e);
                None
            }
        }
    }
}

/// Resolve `name` from `env`, then `store`. Blank values count as missing.
pub fn resolve_secret_with(
    name: &str,
    env: impl Fn(&str) -> Option<String>,
    store: &dyn SecretStore,
) -> SecretLookup {
    if let Some(value) = env(name).filter(|v| !v.trim().is_empty()) {
        debug!("{} resolved from environment", name);
        return SecretLookup::Found(Zeroizing::new(value));
    }
    if let Some(value) = store.get(name).filter(|v| !v.trim().is_empty()) {
        debug!("{} resolved from keyring", name);
        return SecretLookup::Found(value);
    }
    SecretLookup::Missing
}

pub fn resolve_secret(name: &str) -> SecretLookup {
    resolve_secret_with(name, |n| std::env::var(n).ok(), &KeyringStore)
}

pub struct Credentials {
    pub openai_api_key: Zeroizing<String>,
    pub admin_password: Option<Zeroizing<String>>,
}

impl Credentials {
    /// A missing API key is fatal; a missing admin password just leaves
    /// the admin gate shut for good.
    pub fn resolve() -> Result<Self, ChatError> {
        Self::resolve_with(resolve_secret)
    }

    fn resolve_with(lookup: impl Fn(&str) -> SecretLookup) -> Result<Self, ChatError> {
        let openai_api_key = lookup(OPENAI_API_KEY).into_option().ok_or_else(|| {
            ChatError::Configuration(format!(
                "{} is not set (environment or keyring service '{}')",
                OPENAI_API_KEY, KEYRING_SERVICE
            ))
        })?;
        let admin_password = lookup(ADMIN_PASSWORD).into_option();
        if admin_password.is_none() {
            info!("no admin password configured; admin reset is disabled");
        }
        Ok(Self {
            openai_api_key,
            admin_password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapStore(HashMap<&'static str, &'static str>);

    impl SecretStore for MapStore {
        fn get(&self, name: &str) -> Option<Zeroizing<String>> {
            self.0.get(name).map(|v| Zeroizing::new(v.to_string()))
        }
    }

    fn store(pairs: &[(&'static str, &'static str)]) -> MapStore {
        MapStore(pairs.iter().copied().collect())
    }

    fn found(lookup: SecretLookup) -> Option<String> {
        lookup.into_option().map(|v| v.to_string())
    }

    #[test]
    fn test_environment_wins_over_keyring() {
        let s = store(&[(OPENAI_API_KEY, "from-keyring")]);
        let got = resolve_secret_with(OPENAI_API_KEY, |_| Some("from-env".into()), &s);
        assert_eq!(found(got).as_deref(), Some("from-env"));
    }

    #[test]
    fn test_falls_back_to_keyring() {
        let s = store(&[(OPENAI_API_KEY, "from-keyring")]);
        let got = resolve_secret_with(OPENAI_API_KEY, |_| None, &s);
        assert_eq!(found(got).as_deref(), Some("from-keyring"));

        let got = resolve_secret_with(OPENAI_API_KEY, |_| Some("   ".into()), &s);
        assert_eq!(found(got).as_deref(), Some("from-keyring"));
    }

    #[test]
    fn test_missing_everywhere() {
        let got = resolve_secret_with(ADMIN_PASSWORD, |_| None, &store(&[(ADMIN_PASSWORD, "")]));
        assert!(matches!(got, SecretLookup::Missing));
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let err = Credentials::resolve_with(|_| SecretLookup::Missing)
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn test_admin_password_is_optional() {
        let creds = Credentials::resolve_with(|name| {
            if name == OPENAI_API_KEY {
                SecretLookup::Found(Zeroizing::new("sk-test".into()))
            } else {
                SecretLookup::Missing
            }
        })
        .unwrap();
        assert_eq!(creds.openai_api_key.as_str(), "sk-test");
        assert!(creds.admin_password.is_none());
    }
}
