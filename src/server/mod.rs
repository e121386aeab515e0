pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;

use crate::sandbox::PodVmService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PodVmService>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
