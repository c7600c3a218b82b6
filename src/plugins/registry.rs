use super::{GcsPlugin, ResourcePlugin, S3Plugin};
use crate::model::Provider;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resource plugins keyed by resource type name.
///
/// Iteration follows name order, which is the order stages run plugins in.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn ResourcePlugin>>,
}

impl PluginRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in plugins (S3 and GCS)
    pub fn with_defaults(http: reqwest::Client, aws_region: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(S3Plugin::new(http.clone(), aws_region)));
        registry.register(Arc::new(GcsPlugin::new(http)));
        registry
    }

    /// Register a plugin under its own name, replacing any previous one
    pub fn register(&mut self, plugin: Arc<dyn ResourcePlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ResourcePlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// List all registered plugin names
    pub fn names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResourcePlugin>> {
        self.plugins.values()
    }

    /// Plugins for one provider, in run order
    pub fn for_provider(&self, provider: Provider) -> Vec<Arc<dyn ResourcePlugin>> {
        self.iter()
            .filter(|plugin| plugin.provider() == provider)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
