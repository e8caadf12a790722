use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::traits::EntityStore;

/// Routes from the synchronization protocol surface. Static segments win
/// over captures, so `/definitions`, `/namedQuery` and `/commit` are safe
/// beside the `/:entity_type` routes, as is `/all` beside the id list.
pub fn create_router<S: EntityStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Schema metadata
        .route("/definition/:entity_type", get(handlers::get_definition::<S>))
        .route("/definitions", get(handlers::get_definitions::<S>))
        // Read path
        .route("/:entity_type/all", get(handlers::get_all_entities::<S>))
        .route("/:entity_type/:ids", get(handlers::get_entities_by_ids::<S>))
        .route(
            "/namedQuery/:query_name",
            get(handlers::get_entities_by_named_query::<S>),
        )
        // Example query and single-entity create share the collection path
        .route(
            "/:entity_type",
            get(handlers::get_entities_by_example::<S>).put(handlers::create_entity::<S>),
        )
        // Mutation batch
        .route("/commit", post(handlers::commit::<S>))
}
