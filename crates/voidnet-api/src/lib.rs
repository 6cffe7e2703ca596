//! voidnet-api — Control API for the VoidNet overseer.
//!
//! Every route except `/` and `/health` requires the admin secret in the
//! `X-API-Key` header.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Service banner |
//! | GET | `/health` | Liveness plus registry counts |
//! | POST | `/satellite/register` | Register a satellite, returns its agent key |
//! | GET | `/satellites` | List satellites |
//! | GET | `/satellites/{id}` | Satellite detail |
//! | DELETE | `/satellites/{id}` | Delete a satellite and its capsules |
//! | POST | `/satellites/{id}/heartbeat` | Record a heartbeat |
//! | GET | `/satellites/{id}/containers` | Agent container listing |
//! | GET | `/satellites/{id}/agent` | Agent health |
//! | POST | `/capsules` | Create a capsule |
//! | GET | `/capsules` | List capsules |
//! | GET | `/capsules/{id}` | Capsule detail |
//! | DELETE | `/capsules/{id}` | Delete a capsule and its history |
//! | POST | `/capsules/{id}/deploy` | Deploy |
//! | POST | `/capsules/{id}/stop` | Stop |
//! | GET, POST | `/capsules/{id}/logs` | Agent logs (`?tail=N`) |
//! | GET | `/capsules/{id}/deployments` | Deployment history, newest first |

pub mod auth;
pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use voidnet_orchestrator::Orchestrator;
use voidnet_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub orchestrator: Orchestrator,
}

impl ApiState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            store: orchestrator.store().clone(),
            orchestrator,
        }
    }
}

/// Build the complete Control API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/satellite/register", post(handlers::register_satellite))
        .route("/satellites", get(handlers::list_satellites))
        .route(
            "/satellites/{id}",
            get(handlers::get_satellite).delete(handlers::delete_satellite),
        )
        .route("/satellites/{id}/heartbeat", post(handlers::satellite_heartbeat))
        .route("/satellites/{id}/containers", get(handlers::satellite_containers))
        .route("/satellites/{id}/agent", get(handlers::satellite_agent))
        .route(
            "/capsules",
            get(handlers::list_capsules).post(handlers::create_capsule),
        )
        .route(
            "/capsules/{id}",
            get(handlers::get_capsule).delete(handlers::delete_capsule),
        )
        .route("/capsules/{id}/deploy", post(handlers::deploy_capsule))
        .route("/capsules/{id}/stop", post(handlers::stop_capsule))
        .route(
            "/capsules/{id}/logs",
            get(handlers::capsule_logs).post(handlers::capsule_logs),
        )
        .route("/capsules/{id}/deployments", get(handlers::list_deployments))
        .route_layer(axum::middleware::from_fn_with_state(
            state.store.clone(),
            auth::require_admin_key,
        ))
        // Unauthenticated routes (added after the layer).
        .route("/", get(handlers::banner))
        .route("/health", get(handlers::health))
        .with_state(state)
}
