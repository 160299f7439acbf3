use std::sync::Arc;

use chat_core::push::PushGateway;
use chat_core::repo::Repository;

use crate::config::Config;
use crate::hub::Hub;
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;

/// Shared application state handed to every route and connection task.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub hub: Arc<Hub>,
    pub pipeline: Arc<Pipeline>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, push: Arc<dyn PushGateway>, config: Config) -> Self {
        let metrics = Arc::new(Metrics::default());
        let hub = Arc::new(Hub::new(repo.clone(), metrics.clone()));
        let pipeline = Arc::new(Pipeline::new(
            repo.clone(),
            hub.clone(),
            push,
            metrics.clone(),
        ));
        Self {
            repo,
            hub,
            pipeline,
            metrics,
            config: Arc::new(config),
        }
    }
}
