use std::sync::Arc;

pub mod bus;
pub mod config;
pub mod pipeline;
pub mod routes;
pub mod storage;

use config::AppConfig;
use pipeline::Pipeline;
use storage::{ObjectStore, StoragesStatus};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
    pub objects: Arc<dyn ObjectStore>,
    pub storages_status: StoragesStatus,
}
