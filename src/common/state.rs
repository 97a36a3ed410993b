use std::sync::Arc;

use crate::config::Config;
use crate::facade::Facade;
use crate::telemetry::ThermoClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub facade: Arc<Facade<ThermoClient>>,
}

impl AppState {
    pub fn new(config: Config, facade: Facade<ThermoClient>) -> Self {
        Self {
            config: Arc::new(config),
            facade: Arc::new(facade),
        }
    }
}
