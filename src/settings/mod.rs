use crate::content::{ContentBundle, ContentSet, ContentSource};
use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "Packforge")]
#[command(version)]
#[command(about = "Content reload, recovery and notification pipeline of an open source game client")]
pub struct CliArgs {
    #[arg(long, env = "PACKFORGE_DATA_DIR", default_value_t = default_data_dir())]
    pub data_dir: String,

    #[arg(long, default_value = "enUS", env = "PACKFORGE_LOCALE")]
    pub locale: String,

    /// Treat every optional pack as incompatible right away, exercising the
    /// strip-and-retry recovery path.
    #[arg(long, default_value_t = false)]
    pub distrust_optional_packs: bool,
}

pub fn default_data_dir() -> String {
    std::env::current_dir()
        .expect("Can't read current working directory!")
        .join("_data")
        .to_string_lossy()
        .to_string()
}

/// The saved content selection, as the launcher/options UI left it. Recovery
/// clears the optional entries out of this file when it aborts to the safe
/// state, so the next start comes up with the baseline selection.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PersistedSelection {
    pub bundles: Vec<ContentBundle>,
}

impl PersistedSelection {
    /// A missing file is a fresh install, not an error.
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read content selection from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Malformed content selection in {}", path.display()))
    }

    pub fn store(&self, path: &Path) -> Result<(), anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to persist content selection to {}", path.display()))
    }

    pub fn to_content_set(&self) -> ContentSet {
        ContentSet::new(self.bundles.clone())
    }

    /// Drops everything recovery is allowed to drop.
    pub fn clear_optional(&mut self) {
        self.bundles.retain(|bundle| bundle.required);
    }
}

impl ContentSource for PersistedSelection {
    fn current_set(&self) -> ContentSet {
        self.to_content_set()
    }
}
