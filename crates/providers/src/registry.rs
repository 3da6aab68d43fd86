//! Provider registry.
//!
//! Holds all configured provider instances by ID. Mutation is confined
//! to registration time; once handed to the engine the registry is
//! shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::Provider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider instance under its own ID.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        tracing::info!(provider_id = %provider.id(), "registered provider");
        self.providers.insert(provider.id().to_owned(), provider);
    }

    /// Look up a provider by its ID.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(provider_id).cloned()
    }

    /// All registered provider IDs, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// IDs of providers whose capability group matches, sorted.
    pub fn ids_in_group(&self, group: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .providers
            .iter()
            .filter(|(_, p)| p.capabilities().group == group)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Provider>)> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Close every registered provider.
    pub async fn close_all(&self) {
        for (id, provider) in &self.providers {
            if let Err(e) = provider.close().await {
                tracing::warn!(provider_id = %id, error = %e, "provider close failed");
            }
        }
    }
}
