pub mod graphs;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /graphs/{name}      GET load, PUT save
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/graphs", graphs::router())
}
