//! Collection registry
//!
//! Maps a collection key to its ingestion settings. The registry is built
//! once at startup from configuration and is read-only afterwards.
//!
//! # Example
//!
//! ```
//! use stream_ingestr::config::CollectionConfig;
//! use stream_ingestr::registry::CollectionRegistry;
//!
//! let mut videos = CollectionConfig::new("videos");
//! videos.allowed_origins = vec!["https://Example.com/".into()];
//!
//! let registry = CollectionRegistry::from_collections(&[videos]);
//! let settings = registry.get("videos").unwrap();
//! assert_eq!(settings.allowed_origins, vec!["example.com"]);
//! assert!(registry.get("images").is_none());
//! ```

use crate::config::{AccessConfig, CollectionConfig, Config};
use crate::upload::origins::normalize_origins;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolved per-collection ingestion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSettings {
    pub key: String,
    pub max_duration_seconds: u32,
    /// Normalized origin allowlist
    pub allowed_origins: Vec<String>,
    pub require_signed_urls: bool,
    pub prepare_downloads: bool,
    pub access: AccessConfig,
}

impl From<&CollectionConfig> for CollectionSettings {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            key: config.key.clone(),
            max_duration_seconds: config.max_duration_seconds,
            allowed_origins: normalize_origins(&config.allowed_origins),
            require_signed_urls: config.require_signed_urls,
            prepare_downloads: config.prepare_downloads,
            access: config.access.clone(),
        }
    }
}

/// Collection registry
///
/// Settings are wrapped in `Arc` so callers can hold them across awaits.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: HashMap<String, Arc<CollectionSettings>>,
}

impl CollectionRegistry {
    /// Build the registry from application configuration
    pub fn new(config: &Config) -> Self {
        Self::from_collections(&config.collections)
    }

    /// Build the registry from a list of collection definitions
    pub fn from_collections(collections: &[CollectionConfig]) -> Self {
        let collections = collections
            .iter()
            .map(|c| (c.key.clone(), Arc::new(CollectionSettings::from(c))))
            .collect();
        Self { collections }
    }

    /// Look up the settings for a collection key
    pub fn get(&self, key: &str) -> Option<Arc<CollectionSettings>> {
        self.collections.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.collections.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Registered collection keys
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.collections.keys()
    }
}
