//! Provider API keys and the active provider/model selection.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent::ProviderPreset;
use parking_lot::Mutex;
use proto::StorageError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::KeyValueStore;

/// Storage key holding the serialized [`CredentialBundle`].
pub const CREDENTIALS_KEY: &str = "nexus_credentials";

/// Credential store shared between the gate, the router and admin commands.
pub type SharedCredentials = Arc<Mutex<CredentialStore>>;

/// Persisted provider keys plus the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// provider id -> API key. Last write wins.
    #[serde(default)]
    pub keys_by_provider: BTreeMap<String, String>,
    /// Provider used for `/ai` queries.
    #[serde(default = "default_provider")]
    pub selected_provider: String,
    /// Model used for `/ai` queries.
    #[serde(default = "default_model")]
    pub selected_model: String,
}

impl Default for CredentialBundle {
    fn default() -> Self {
        Self {
            keys_by_provider: BTreeMap::new(),
            selected_provider: default_provider(),
            selected_model: default_model(),
        }
    }
}

fn default_provider() -> String {
    ProviderPreset::default().name().to_string()
}

fn default_model() -> String {
    ProviderPreset::default().default_model().to_string()
}

/// Write-through credential store.
///
/// Every mutation updates the in-memory bundle first and then rewrites the
/// whole bundle under [`CREDENTIALS_KEY`]. A failed write leaves the
/// in-memory state updated and is reported to the caller.
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    bundle: CredentialBundle,
}

impl CredentialStore {
    /// Loads the bundle from `store`, falling back to defaults when it is
    /// absent or corrupt.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        Self::load_with_defaults(store, CredentialBundle::default())
    }

    /// Like [`CredentialStore::load`], but uses `defaults` when nothing valid
    /// is persisted yet.
    pub fn load_with_defaults(store: Arc<dyn KeyValueStore>, defaults: CredentialBundle) -> Self {
        let bundle = match store.get(CREDENTIALS_KEY) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring corrupt credential bundle: {e}");
                defaults
            }),
            None => defaults,
        };
        debug!(
            providers = bundle.keys_by_provider.len(),
            selected = %bundle.selected_provider,
            "Loaded credentials"
        );
        Self { store, bundle }
    }

    /// Wraps the store for sharing across tasks.
    pub fn into_shared(self) -> SharedCredentials {
        Arc::new(Mutex::new(self))
    }

    /// Current bundle.
    pub fn bundle(&self) -> &CredentialBundle {
        &self.bundle
    }

    /// Stores `key` for `provider` and persists.
    pub fn set_key(&mut self, provider: &str, key: &str) -> Result<(), StorageError> {
        let provider = normalize_provider(provider);
        info!(%provider, "Storing provider key");
        self.bundle
            .keys_by_provider
            .insert(provider, key.trim().to_string());
        self.persist()
    }

    /// Removes the key for `provider`. Returns whether one was present.
    pub fn remove_key(&mut self, provider: &str) -> Result<bool, StorageError> {
        let provider = normalize_provider(provider);
        if self.bundle.keys_by_provider.remove(&provider).is_none() {
            return Ok(false);
        }
        info!(%provider, "Removed provider key");
        self.persist()?;
        Ok(true)
    }

    /// Selects the provider and model used for AI queries and persists.
    pub fn set_selection(&mut self, provider: &str, model: &str) -> Result<(), StorageError> {
        self.bundle.selected_provider = normalize_provider(provider);
        self.bundle.selected_model = model.trim().to_string();
        debug!(
            provider = %self.bundle.selected_provider,
            model = %self.bundle.selected_model,
            "Updated selection"
        );
        self.persist()
    }

    /// A provider is usable iff a non-empty key is stored for it.
    pub fn has_usable_key(&self, provider: &str) -> bool {
        self.usable_key(provider).is_some()
    }

    /// Returns the key for `provider` when it is usable.
    pub fn usable_key(&self, provider: &str) -> Option<&str> {
        self.bundle
            .keys_by_provider
            .get(&normalize_provider(provider))
            .map(String::as_str)
            .filter(|key| !key.is_empty())
    }

    /// `(provider, model)` currently selected.
    pub fn selection(&self) -> (&str, &str) {
        (
            self.bundle.selected_provider.as_str(),
            self.bundle.selected_model.as_str(),
        )
    }

    fn persist(&self) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&self.bundle)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.store.set(CREDENTIALS_KEY, &raw)
    }
}

fn normalize_provider(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}
