//! Provider credential storage, masking, and persistence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Mask character used when rendering a stored secret. Its presence in a
/// saved value is the sentinel for "unchanged, do not resend".
pub const MASK_CHAR: char = '•';

/// Number of leading secret characters left visible in the masked form.
const VISIBLE_PREFIX: usize = 6;

/// Number of mask characters appended after the visible prefix. Fixed so
/// the rendered form leaks nothing about the secret's length.
const MASK_LEN: usize = 8;

/// Upstream providers that can hold a credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    DeepSeek,
    OpenAi,
    Gemini,
    Claude,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::DeepSeek,
        ProviderId::OpenAi,
        ProviderId::Gemini,
        ProviderId::Claude,
    ];

    /// Fixed key a user-supplied secret persists under.
    pub fn persisted_key(self) -> &'static str {
        match self {
            ProviderId::DeepSeek => "deepseek_api_key",
            ProviderId::OpenAi => "openai_api_key",
            ProviderId::Gemini => "gemini_api_key",
            ProviderId::Claude => "claude_api_key",
        }
    }

    /// Environment variable checked at process start.
    pub fn env_var(self) -> &'static str {
        match self {
            ProviderId::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderId::OpenAi => "OPENAI_API_KEY",
            ProviderId::Gemini => "GEMINI_API_KEY",
            ProviderId::Claude => "ANTHROPIC_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderId::DeepSeek => write!(f, "deepseek"),
            ProviderId::OpenAi => write!(f, "openai"),
            ProviderId::Gemini => write!(f, "gemini"),
            ProviderId::Claude => write!(f, "claude"),
        }
    }
}

/// Where a credential came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Environment,
    UserSupplied,
}

/// An active credential for one provider.
#[derive(Debug, Clone)]
pub struct Credential {
    pub provider: ProviderId,
    pub secret: String,
    pub source: CredentialSource,
}

/// Outcome of a credential save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The input was a masked rendering of the existing secret — nothing
    /// was changed or resent to persistence.
    Unchanged,
}

/// Persistence collaborator for user-supplied secrets. The store itself
/// performs no I/O; the host decides where secrets live.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory secret store, for tests and credential-less hosts.
#[derive(Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<String, String>>,
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().expect("secret store lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .expect("secret store lock")
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().expect("secret store lock").remove(key);
    }
}

/// File-backed secret store: a flat JSON map at a fixed path. Writes are
/// best-effort; a failed write logs and keeps the in-process value.
pub struct FileSecretStore {
    path: std::path::PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileSecretStore {
    pub fn open(path: std::path::PathBuf) -> Self {
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn flush(&self, values: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(values) {
            Ok(raw) => {
                if let Err(error) = std::fs::write(&self.path, raw) {
                    tracing::warn!(%error, path = %self.path.display(), "failed to persist secrets");
                }
            }
            Err(error) => tracing::warn!(%error, "failed to serialize secrets"),
        }
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().expect("secret store lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().expect("secret store lock");
        values.insert(key.to_string(), value.to_string());
        self.flush(&values);
    }

    fn remove(&self, key: &str) {
        let mut values = self.values.lock().expect("secret store lock");
        values.remove(key);
        self.flush(&values);
    }
}

/// Holds at most one active credential per provider.
///
/// Bootstrapped from environment variables, then from persisted
/// user-supplied values. Mutation only happens through this type's own
/// operations.
pub struct CredentialStore {
    credentials: RwLock<HashMap<ProviderId, Credential>>,
    persist: Arc<dyn SecretStore>,
}

impl CredentialStore {
    /// Create an empty store over the given persistence collaborator.
    pub fn new(persist: Arc<dyn SecretStore>) -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            persist,
        }
    }

    /// Create a store seeded from environment variables and persisted
    /// user-supplied values. Environment wins when both are present.
    pub fn from_env(persist: Arc<dyn SecretStore>) -> Self {
        let store = Self::new(persist);
        {
            let mut credentials = store.credentials.write().expect("credential lock");
            for provider in ProviderId::ALL {
                if let Ok(secret) = std::env::var(provider.env_var())
                    && !secret.is_empty()
                {
                    tracing::info!(provider = %provider, "credential loaded from environment");
                    credentials.insert(
                        provider,
                        Credential {
                            provider,
                            secret,
                            source: CredentialSource::Environment,
                        },
                    );
                    continue;
                }
                if let Some(secret) = store.persist.get(provider.persisted_key()) {
                    tracing::info!(provider = %provider, "credential loaded from persisted store");
                    credentials.insert(
                        provider,
                        Credential {
                            provider,
                            secret,
                            source: CredentialSource::UserSupplied,
                        },
                    );
                }
            }
        }
        store
    }

    pub fn has(&self, provider: ProviderId) -> bool {
        self.credentials
            .read()
            .expect("credential lock")
            .contains_key(&provider)
    }

    pub fn secret(&self, provider: ProviderId) -> Option<String> {
        self.credentials
            .read()
            .expect("credential lock")
            .get(&provider)
            .map(|c| c.secret.clone())
    }

    /// Save a user-supplied secret.
    ///
    /// A value containing [`MASK_CHAR`] is the masked rendering of the
    /// existing secret coming back from a form save — it is treated as
    /// "unchanged" and neither stored nor re-persisted. Empty input is
    /// also a no-op.
    pub fn save(&self, provider: ProviderId, input: &str) -> SaveOutcome {
        let input = input.trim();
        if input.is_empty() || input.contains(MASK_CHAR) {
            return SaveOutcome::Unchanged;
        }

        self.credentials.write().expect("credential lock").insert(
            provider,
            Credential {
                provider,
                secret: input.to_string(),
                source: CredentialSource::UserSupplied,
            },
        );
        self.persist.set(provider.persisted_key(), input);
        tracing::info!(provider = %provider, "credential saved");
        SaveOutcome::Saved
    }

    /// Remove a provider's credential and its persisted value.
    pub fn clear(&self, provider: ProviderId) {
        self.credentials
            .write()
            .expect("credential lock")
            .remove(&provider);
        self.persist.remove(provider.persisted_key());
        tracing::info!(provider = %provider, "credential cleared");
    }

    /// Masked rendering for redisplay: a fixed visible prefix followed by
    /// a fixed run of mask characters. The only form ever shown to a UI.
    pub fn masked(&self, provider: ProviderId) -> Option<String> {
        let credentials = self.credentials.read().expect("credential lock");
        let secret = &credentials.get(&provider)?.secret;
        let prefix: String = secret.chars().take(VISIBLE_PREFIX).collect();
        Some(format!(
            "{prefix}{}",
            MASK_CHAR.to_string().repeat(MASK_LEN)
        ))
    }

    pub fn source(&self, provider: ProviderId) -> Option<CredentialSource> {
        self.credentials
            .read()
            .expect("credential lock")
            .get(&provider)
            .map(|c| c.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> (CredentialStore, Arc<MemorySecretStore>) {
        let persist = Arc::new(MemorySecretStore::default());
        (CredentialStore::new(persist.clone()), persist)
    }

    #[test]
    fn test_save_and_lookup() {
        let (store, persist) = store();
        assert!(!store.has(ProviderId::DeepSeek));

        assert_eq!(
            store.save(ProviderId::DeepSeek, "sk-abc123def456"),
            SaveOutcome::Saved
        );
        assert!(store.has(ProviderId::DeepSeek));
        assert_eq!(
            store.secret(ProviderId::DeepSeek).as_deref(),
            Some("sk-abc123def456")
        );
        // Persisted under the fixed documented key.
        assert_eq!(
            persist.get("deepseek_api_key").as_deref(),
            Some("sk-abc123def456")
        );
    }

    #[test]
    fn test_masking_round_trip() {
        let (store, _) = store();
        store.save(ProviderId::DeepSeek, "sk-abc123def456");

        let masked = store.masked(ProviderId::DeepSeek).unwrap();
        assert!(masked.starts_with("sk-abc"));
        assert!(masked.contains(MASK_CHAR));
        assert!(!masked.contains("123def456"));

        // Saving the masked rendering back must not change the secret.
        assert_eq!(
            store.save(ProviderId::DeepSeek, &masked),
            SaveOutcome::Unchanged
        );
        assert_eq!(
            store.secret(ProviderId::DeepSeek).as_deref(),
            Some("sk-abc123def456")
        );

        // A genuinely new value replaces it exactly.
        assert_eq!(
            store.save(ProviderId::DeepSeek, "sk-new-key"),
            SaveOutcome::Saved
        );
        assert_eq!(store.secret(ProviderId::DeepSeek).as_deref(), Some("sk-new-key"));
    }

    #[test]
    fn test_mask_hides_length() {
        let (store, _) = store();
        store.save(ProviderId::OpenAi, "sk-short");
        let short = store.masked(ProviderId::OpenAi).unwrap();
        store.save(ProviderId::OpenAi, "sk-a-much-longer-credential-value");
        let long = store.masked(ProviderId::OpenAi).unwrap();
        assert_eq!(short.chars().count(), long.chars().count());
    }

    #[test]
    fn test_one_credential_per_provider() {
        let (store, _) = store();
        store.save(ProviderId::Gemini, "first");
        store.save(ProviderId::Gemini, "second");
        assert_eq!(store.secret(ProviderId::Gemini).as_deref(), Some("second"));
    }

    #[test]
    fn test_clear_removes_persisted_value() {
        let (store, persist) = store();
        store.save(ProviderId::Claude, "sk-claude");
        store.clear(ProviderId::Claude);
        assert!(!store.has(ProviderId::Claude));
        assert!(persist.get("claude_api_key").is_none());
        // Idempotent.
        store.clear(ProviderId::Claude);
    }

    #[test]
    fn test_empty_input_is_unchanged() {
        let (store, _) = store();
        assert_eq!(store.save(ProviderId::DeepSeek, "   "), SaveOutcome::Unchanged);
        assert!(!store.has(ProviderId::DeepSeek));
    }

    #[test]
    fn test_persisted_bootstrap() {
        let persist = Arc::new(MemorySecretStore::default());
        persist.set("deepseek_api_key", "sk-persisted");
        let store = CredentialStore::from_env(persist);
        // Env vars are absent in tests, so the persisted value wins.
        assert_eq!(
            store.secret(ProviderId::DeepSeek).as_deref(),
            Some("sk-persisted")
        );
        assert_eq!(
            store.source(ProviderId::DeepSeek),
            Some(CredentialSource::UserSupplied)
        );
    }
}
