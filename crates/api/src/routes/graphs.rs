use axum::routing::get;
use axum::Router;

use crate::handlers::graphs;
use crate::state::AppState;

/// Graph routes mounted at `/graphs`.
///
/// ```text
/// GET    /{name}  -> get_graph
/// PUT    /{name}  -> put_graph
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{name}", get(graphs::get_graph).put(graphs::put_graph))
}
