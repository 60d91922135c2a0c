//! Built-in consumers of the headless harness. Real subsystems (textures,
//! models, sounds, ...) register the same way; these two only keep enough
//! live state to make reload outcomes observable.

use crate::content::ContentSet;
use crate::reload::consumer::{PreparedData, ReloadableConsumer};
use itertools::Itertools;
use std::sync::Mutex;

pub struct LocaleData {
    pub locale: String,
    pub source_bundles: Vec<String>,
}

/// Derives the active locale catalog from the content set. Registered first:
/// text-dependent consumers rely on the language being ready.
pub struct LocaleCatalog {
    locale: String,
    live: Mutex<Option<LocaleData>>,
}

impl LocaleCatalog {
    pub fn new(locale: &str) -> Self {
        Self {
            locale: locale.to_string(),
            live: Mutex::new(None),
        }
    }

    pub fn active_bundles(&self) -> Vec<String> {
        self.live
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|data| data.source_bundles.clone())
            .unwrap_or_default()
    }

    pub fn active_locale(&self) -> Option<String> {
        self.live
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|data| data.locale.clone())
    }
}

impl ReloadableConsumer for LocaleCatalog {
    fn name(&self) -> &'static str {
        "language"
    }

    fn prepare(&self, content: &ContentSet) -> Result<PreparedData, anyhow::Error> {
        let source_bundles = content
            .bundles()
            .iter()
            .filter(|bundle| {
                bundle.id.as_str().starts_with("lang-") || bundle.id.as_str() == "base"
            })
            .map(|bundle| bundle.id.to_string())
            .collect_vec();
        Ok(Box::new(LocaleData {
            locale: self.locale.clone(),
            source_bundles,
        }))
    }

    fn apply(&self, data: PreparedData) -> Result<(), anyhow::Error> {
        let data = data
            .downcast::<LocaleData>()
            .map_err(|_| anyhow::anyhow!("unexpected prepared data for the locale catalog"))?;
        *self.live.lock().expect("lock poisoned") = Some(*data);
        Ok(())
    }
}

/// Indexes the bundles into a search path, rejecting incompatible packs.
/// Later bundles override earlier ones, so the order has to survive intact.
pub struct AssetCatalog {
    live: Mutex<Vec<String>>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn search_path(&self) -> Vec<String> {
        self.live.lock().expect("lock poisoned").clone()
    }
}

impl Default for AssetCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadableConsumer for AssetCatalog {
    fn name(&self) -> &'static str {
        "assets"
    }

    fn prepare(&self, content: &ContentSet) -> Result<PreparedData, anyhow::Error> {
        if let Some(bad) = content.bundles().iter().find(|bundle| !bundle.compatible) {
            anyhow::bail!("content bundle {} is not compatible with this client", bad.id);
        }
        Ok(Box::new(content.bundle_ids()))
    }

    fn apply(&self, data: PreparedData) -> Result<(), anyhow::Error> {
        let data = data
            .downcast::<Vec<String>>()
            .map_err(|_| anyhow::anyhow!("unexpected prepared data for the asset catalog"))?;
        *self.live.lock().expect("lock poisoned") = *data;
        Ok(())
    }
}
