//! Application context shared by the HTTP layer and the session task.

use std::path::PathBuf;
use std::sync::Arc;

use super::coordinator::{SessionDeps, SessionSettings};
use super::messenger::StateMessenger;
use super::metric::MetricFunction;
use super::registry::SessionRegistry;
use crate::acquisition::Holder;
use crate::sensors::SensorResolver;
use crate::storage::{SessionFiles, StorageFactory};
use crate::types::SystemState;

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<SessionRegistry>,
    pub messenger: Arc<StateMessenger>,
    pub resolver: Arc<SensorResolver>,
    pub holder: Arc<dyn Holder>,
    pub files: Arc<SessionFiles>,
}

impl AppContext {
    pub fn new(
        holder: Arc<dyn Holder>,
        resolver: Arc<SensorResolver>,
        storage: Arc<dyn StorageFactory>,
        metric: Arc<dyn MetricFunction>,
        settings: SessionSettings,
        data_dir: PathBuf,
    ) -> Self {
        let files = Arc::new(SessionFiles::new(data_dir.clone()));
        let messenger = Arc::new(StateMessenger::new(Arc::clone(&holder), data_dir));
        let deps = SessionDeps {
            holder: Arc::clone(&holder),
            resolver: Arc::clone(&resolver),
            storage,
            metric,
            settings,
        };
        let registry = Arc::new(SessionRegistry::new(deps, Arc::clone(&messenger)));
        Self {
            registry,
            messenger,
            resolver,
            holder,
            files,
        }
    }

    pub async fn system_state(&self) -> SystemState {
        self.messenger.snapshot(self.registry.status().await).await
    }

    /// Push the current state to state-channel subscribers.
    pub async fn push_state(&self) -> usize {
        self.messenger.push_update(self.registry.status().await).await
    }
}
