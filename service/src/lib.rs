use config::Config;
use events::EventPublisher;
use sse::Manager;
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub sse_manager: Arc<Manager>,
    pub config: Config,
}

impl AppState {
    /// Builds the shared application state: the engine manager is
    /// constructed from the configuration and the supplied event publisher.
    pub fn new(app_config: Config, publisher: EventPublisher) -> Self {
        let sse_manager = Arc::new(Manager::new(app_config.engine_settings(), publisher));
        Self {
            sse_manager,
            config: app_config,
        }
    }
}
