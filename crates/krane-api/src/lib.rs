//! krane-api — REST surface for Krane.
//!
//! Thin axum handlers over the store and the reconciler. Deployment
//! actions enqueue a job and answer with its ID; job records are the
//! read API for everything asynchronous.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Server status |
//! | GET | `/deployments` | List deployment configs |
//! | POST | `/deployments` | Save a deployment config |
//! | GET | `/deployments/{name}` | Get one config |
//! | DELETE | `/deployments/{name}` | Delete the deployment (async) |
//! | POST | `/deployments/{name}/run` | Deploy the stored config |
//! | POST | `/deployments/{name}/start` | Start existing containers |
//! | POST | `/deployments/{name}/stop` | Stop existing containers |
//! | POST | `/deployments/{name}/restart` | Replace the generation |
//! | GET | `/deployments/{name}/containers` | Current containers |
//! | GET | `/secrets/{name}` | List secret keys |
//! | POST | `/secrets/{name}` | Add a secret |
//! | GET | `/jobs?limit=N` | Recent jobs across deployments |
//! | GET | `/jobs/{name}` | Jobs for one deployment |
//! | GET | `/jobs/{name}/{id}` | One job record |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use krane_core::Reconciler;
use krane_store::Store;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub reconciler: Arc<Reconciler>,
}

/// Build the complete API router.
pub fn build_router(store: Arc<dyn Store>, reconciler: Arc<Reconciler>) -> Router {
    let state = ApiState { store, reconciler };

    Router::new()
        .route("/", get(handlers::server_status))
        .route(
            "/deployments",
            get(handlers::list_deployments).post(handlers::save_deployment),
        )
        .route(
            "/deployments/{name}",
            get(handlers::get_deployment).delete(handlers::delete_deployment),
        )
        .route("/deployments/{name}/run", post(handlers::run_deployment))
        .route("/deployments/{name}/start", post(handlers::start_deployment))
        .route("/deployments/{name}/stop", post(handlers::stop_deployment))
        .route(
            "/deployments/{name}/restart",
            post(handlers::restart_deployment),
        )
        .route(
            "/deployments/{name}/containers",
            get(handlers::list_containers),
        )
        .route(
            "/secrets/{name}",
            get(handlers::list_secrets).post(handlers::create_secret),
        )
        .route("/jobs", get(handlers::recent_jobs))
        .route("/jobs/{name}", get(handlers::jobs_by_deployment))
        .route("/jobs/{name}/{id}", get(handlers::job_by_id))
        .with_state(state)
}
