use std::{path::PathBuf, sync::Arc};

use services::services::{
    generation::GenerationPipeline,
    identity::{FileIdentityStore, Identity, IdentityStore, MemoryIdentityStore},
    maintenance::{AccessGate, MaintenanceConfig},
    studio_api::{StudioApiClient, StudioApiError},
};
use tracing::{info, warn};

use crate::config::ServerConfig;

/// Backend client plus the bouncer-wrapped pipeline built on it.
#[derive(Clone)]
pub struct StudioBackend {
    pub client: Arc<StudioApiClient>,
    pub pipeline: Arc<GenerationPipeline<Arc<StudioApiClient>>>,
}

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AccessGate>,
    pub soft_stems: Arc<Vec<String>>,
    pub studio: Option<StudioBackend>,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(maintenance: MaintenanceConfig, soft_stems: Vec<String>) -> Self {
        Self {
            gate: Arc::new(AccessGate::new(maintenance)),
            soft_stems: Arc::new(soft_stems),
            studio: None,
            static_dir: None,
        }
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    pub fn with_studio(mut self, client: StudioApiClient) -> Self {
        let client = Arc::new(client);
        let pipeline = GenerationPipeline::new(client.clone(), self.soft_stems.to_vec());
        self.studio = Some(StudioBackend {
            client,
            pipeline: Arc::new(pipeline),
        });
        self
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, StudioApiError> {
        let maintenance = MaintenanceConfig::from_env();
        info!(
            enabled = maintenance.enabled,
            bypass_configured = maintenance.bypass_token.is_some(),
            "Maintenance gate configured"
        );

        let state = Self::new(maintenance, config.soft_stems.clone())
            .with_static_dir(config.static_dir.clone());

        let Some(base) = config.studio_api_base.as_deref() else {
            info!("STUDIO_API_BASE not set, studio routes are disabled");
            return Ok(state);
        };

        let client = StudioApiClient::new(base, Identity::load(identity_store().as_ref()))?;
        info!(
            base,
            account_id = %client.identity().account_id,
            "Studio backend configured"
        );
        Ok(state.with_studio(client))
    }
}

fn identity_store() -> Box<dyn IdentityStore> {
    match FileIdentityStore::default_location() {
        Ok(store) => {
            info!(path = %store.path().display(), "Using file identity store");
            Box::new(store)
        }
        Err(e) => {
            warn!(error = %e, "Falling back to in-memory identity store");
            Box::new(MemoryIdentityStore::default())
        }
    }
}
