use crate::content::ContentSet;
use std::any::Any;
use std::sync::Arc;

/// Whatever a consumer derived from the content set during the background
/// phase. Only the consumer itself knows the concrete type and downcasts it
/// back in `apply`.
pub type PreparedData = Box<dyn Any + Send>;

/// A subsystem participating in content reload (textures, models, fonts,
/// sounds, language, ...).
///
/// `prepare` runs on the background worker pool, potentially in parallel with
/// other consumers' prepares. It must be purely data-producing: no mutation
/// of shared state, everything it derives goes into the returned value.
///
/// `apply` runs exclusively on the owning thread, in registration order, and
/// only once every consumer's prepare and all earlier-registered applies
/// succeeded. It replaces the consumer's live state and must be fast, since
/// the owning thread is latency-sensitive.
pub trait ReloadableConsumer: Send + Sync {
    fn name(&self) -> &'static str;

    fn prepare(&self, content: &ContentSet) -> Result<PreparedData, anyhow::Error>;

    fn apply(&self, data: PreparedData) -> Result<(), anyhow::Error>;
}

/// The fixed consumer registration sequence. Built once at process start and
/// never reordered afterwards; later consumers may depend on earlier ones
/// (language has to be ready before text-dependent assets).
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: Vec<Arc<dyn ReloadableConsumer>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, consumer: Arc<dyn ReloadableConsumer>) {
        self.consumers.push(consumer);
    }

    pub fn consumers(&self) -> &[Arc<dyn ReloadableConsumer>] {
        &self.consumers
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}
