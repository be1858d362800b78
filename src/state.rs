//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::service::EquationService;
use crate::traits::{DocumentController, Renderer};

/// Shared state of the fetch endpoint
pub struct AppState<C: DocumentController> {
    inner: Arc<AppStateInner<C>>,
}

struct AppStateInner<C: DocumentController> {
    config: Config,
    service: Arc<EquationService<C>>,
}

impl<C: DocumentController> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: DocumentController> AppState<C> {
    /// Create state with a fresh service built from `config`
    pub fn new(config: Config, renderer: Arc<dyn Renderer>) -> Self {
        let service = Arc::new(EquationService::new(&config, renderer));
        Self::with_service(config, service)
    }

    /// Share a service the host already uses for its display path
    pub fn with_service(config: Config, service: Arc<EquationService<C>>) -> Self {
        tracing::info!(cache_dir = %config.cache.dir.display(), "MathML image cache configured");
        Self {
            inner: Arc::new(AppStateInner { config, service }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the equation service
    pub fn service(&self) -> &Arc<EquationService<C>> {
        &self.inner.service
    }
}
