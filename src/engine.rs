use std::sync::Arc;

use crate::{Run, config::Config, context::Context};

/// Entry point of a run.
///
/// Holds the configuration shared by every [`Context`] it creates.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: Arc<Config>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh, empty collection context.
    pub fn context(&self) -> Context {
        Context::new(Arc::clone(&self.config))
    }

    /// Resolve and execute `context` on the current tokio runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, context: Context) -> Run {
        tracing::debug!(config = ?self.config, "starting run");
        context.start()
    }
}
