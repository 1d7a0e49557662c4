use crate::error::StartupError;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

/// Owns the detector from the moment it is constructed. The phase only
/// becomes `Ready` after the model handle is stored.
pub struct ServiceLifecycle<M> {
    phase: RwLock<Phase>,
    model: OnceLock<Arc<M>>,
}

impl<M> Default for ServiceLifecycle<M> {
    fn default() -> Self {
        Self {
            phase: RwLock::new(Phase::Uninitialized),
            model: OnceLock::new(),
        }
    }
}

impl<M> ServiceLifecycle<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(model: M) -> Self {
        let lifecycle = Self::new();
        // A fresh lifecycle has no model yet, so this cannot fail.
        let _ = lifecycle.load_with(|| Ok(model));
        lifecycle
    }

    /// Runs `loader` once, moving through `Loading` to `Ready` or `Failed`.
    pub fn load_with<F>(&self, loader: F) -> Result<Arc<M>, StartupError>
    where
        F: FnOnce() -> Result<M, StartupError>,
    {
        {
            let mut phase = self.phase.write();
            if *phase != Phase::Uninitialized {
                return Err(StartupError::AlreadyLoaded);
            }
            *phase = Phase::Loading;
        }
        tracing::info!("Loading detection model");

        match loader() {
            Ok(model) => {
                let model = Arc::new(model);
                if self.model.set(model.clone()).is_err() {
                    return Err(StartupError::AlreadyLoaded);
                }
                *self.phase.write() = Phase::Ready;
                tracing::info!("Detection model ready");
                Ok(model)
            }
            Err(e) => {
                tracing::error!("Detection model failed to load: {}", e);
                *self.phase.write() = Phase::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.phase.read() == Phase::Ready
    }

    pub fn model(&self) -> Option<Arc<M>> {
        if self.is_ready() {
            self.model.get().cloned()
        } else {
            None
        }
    }
}
