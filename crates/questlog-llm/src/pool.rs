//! Provider name → backend mapping consulted by the escalation plan.

use std::collections::HashMap;

use crate::backend::SharedBackend;

/// The backends available to this process, keyed by provider name.
///
/// Built once at startup; candidates whose provider is missing here (for
/// example because no API key was configured) are left out of every plan.
#[derive(Clone, Default)]
pub struct ProviderPool {
    backends: HashMap<String, SharedBackend>,
}

impl ProviderPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the backend serving a provider.
    pub fn with_backend(mut self, provider: impl Into<String>, backend: SharedBackend) -> Self {
        self.insert(provider, backend);
        self
    }

    /// Add or replace the backend serving a provider.
    pub fn insert(&mut self, provider: impl Into<String>, backend: SharedBackend) {
        self.backends.insert(provider.into(), backend);
    }

    /// Get the backend serving a provider.
    pub fn get(&self, provider: &str) -> Option<SharedBackend> {
        self.backends.get(provider).cloned()
    }

    /// Whether a provider has a backend.
    pub fn contains(&self, provider: &str) -> bool {
        self.backends.contains_key(provider)
    }

    /// Provider names, sorted.
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether no provider is available.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderPool")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::Arc;

    #[test]
    fn test_pool_lookup() {
        let pool = ProviderPool::new()
            .with_backend("openrouter", Arc::new(MockBackend::with_text("a")))
            .with_backend("openai", Arc::new(MockBackend::with_text("b")));

        assert!(pool.contains("openrouter"));
        assert!(!pool.contains("google"));
        assert!(pool.get("openai").is_some());
        assert_eq!(pool.providers(), vec!["openai", "openrouter"]);
        assert!(!pool.is_empty());
    }
}
