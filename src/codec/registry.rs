use log::{debug, info};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{CodecId, CodecProvider};
use crate::error::{PipelineError, Result};

type Initializer = Box<dyn Fn(&CodecRegistry) + Send + Sync>;

/// Codec lookup table.
///
/// Starts empty. The first lookup that misses runs the initializer, which
/// registers the built-in providers; it never runs a second time.
pub struct CodecRegistry {
    providers: RwLock<HashMap<CodecId, Arc<dyn CodecProvider>>>,
    initialized: OnceCell<()>,
    initializer: Initializer,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::with_initializer(register_builtin)
    }

    pub fn with_initializer(initializer: impl Fn(&CodecRegistry) + Send + Sync + 'static) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            initialized: OnceCell::new(),
            initializer: Box::new(initializer),
        }
    }

    pub fn register(&self, provider: Arc<dyn CodecProvider>) {
        debug!("registering codec {}", provider.id());
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.id(), provider);
    }

    /// Resolve a provider, initializing the registry on the first miss.
    pub fn find(&self, id: CodecId) -> Result<Arc<dyn CodecProvider>> {
        if let Some(provider) = self.lookup(id) {
            return Ok(provider);
        }

        self.initialized.get_or_init(|| {
            info!("codec {} not registered, initializing codec registry", id);
            (self.initializer)(self);
        });

        self.lookup(id).ok_or(PipelineError::CodecUnavailable(id))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get().is_some()
    }

    fn lookup(&self, id: CodecId) -> Option<Arc<dyn CodecProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register every codec compiled into this build.
pub fn register_builtin(registry: &CodecRegistry) {
    registry.register(Arc::new(super::raw::RawVideoProvider));

    #[cfg(feature = "ffmpeg")]
    {
        registry.register(Arc::new(super::ffmpeg::FfmpegProvider::new(CodecId::Mpeg2Video)));
        registry.register(Arc::new(super::ffmpeg::FfmpegProvider::new(CodecId::H264)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::raw::RawVideoProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_miss_initializes_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let registry = CodecRegistry::with_initializer(move |registry| {
            counter.fetch_add(1, Ordering::SeqCst);
            registry.register(Arc::new(RawVideoProvider));
        });

        assert!(!registry.is_initialized());
        assert!(registry.find(CodecId::RawVideo).is_ok());
        assert!(registry.is_initialized());
        assert!(registry.find(CodecId::RawVideo).is_ok());
        assert!(matches!(
            registry.find(CodecId::H264),
            Err(PipelineError::CodecUnavailable(CodecId::H264))
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registered_codec_skips_initialization() {
        let registry = CodecRegistry::with_initializer(|_| panic!("should not initialize"));
        registry.register(Arc::new(RawVideoProvider));
        assert!(registry.find(CodecId::RawVideo).is_ok());
        assert!(!registry.is_initialized());
    }

    #[test]
    fn test_builtin_registry_has_raw_video() {
        let registry = CodecRegistry::new();
        let provider = registry.find(CodecId::RawVideo).unwrap();
        assert_eq!(provider.id(), CodecId::RawVideo);
        assert!(provider.capabilities().truncated);
    }
}
