use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Stable identity of a content bundle (pack). Bundles keep their id across
/// reloads, which is what lets recovery reason about "the same set, again".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleId(String);

impl BundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBundle {
    pub id: BundleId,
    /// Required bundles can never be removed by recovery.
    pub required: bool,
    pub compatible: bool,
}

impl ContentBundle {
    pub fn required(id: impl Into<String>) -> Self {
        Self {
            id: BundleId::new(id),
            required: true,
            compatible: true,
        }
    }

    pub fn optional(id: impl Into<String>) -> Self {
        Self {
            id: BundleId::new(id),
            required: false,
            compatible: true,
        }
    }

    pub fn incompatible(mut self) -> Self {
        self.compatible = false;
        self
    }
}

/// An ordered sequence of content bundles. The order is load-order and thus a
/// correctness concern: consumers see the bundles exactly in this order.
/// The set itself is immutable once handed to a reload operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentSet {
    bundles: Vec<ContentBundle>,
}

impl ContentSet {
    pub fn new(bundles: Vec<ContentBundle>) -> Self {
        Self { bundles }
    }

    pub fn bundles(&self) -> &[ContentBundle] {
        &self.bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Whether recovery could still remove anything from this set.
    pub fn has_optional(&self) -> bool {
        self.bundles.iter().any(|bundle| !bundle.required)
    }

    /// The all-required baseline: every non-required bundle removed, order of
    /// the remaining bundles preserved.
    pub fn strip_optional(&self) -> ContentSet {
        ContentSet {
            bundles: self
                .bundles
                .iter()
                .filter(|bundle| bundle.required)
                .cloned()
                .collect_vec(),
        }
    }

    pub fn bundle_ids(&self) -> Vec<String> {
        self.bundles
            .iter()
            .map(|bundle| bundle.id.to_string())
            .collect_vec()
    }

    /// Order-sensitive identity of this set, used by recovery to detect that
    /// it is looking at the same failing set twice.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for bundle in &self.bundles {
            bundle.id.hash(&mut hasher);
            bundle.required.hash(&mut hasher);
            bundle.compatible.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// External supplier of the active content set (the launcher UI, persisted
/// settings, a server-pushed selection, ...).
pub trait ContentSource {
    fn current_set(&self) -> ContentSet;
}
