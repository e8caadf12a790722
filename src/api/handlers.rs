use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SyncError;
use crate::logic::commit::CommitCoordinator;
use crate::logic::notify::ListenerRegistry;
use crate::logic::parse::GraphParser;
use crate::logic::permission::{PermissionValidator, PolicyEvaluator};
use crate::logic::query::{NamedQueryRegistry, QueryResolver};
use crate::logic::refresh::EntitySerializer;
use crate::model::{
    split_fetch_directives, CommitResult, EntityDefinition, Id, NotificationBatch, RequestContext,
};
use crate::store::traits::EntityStore;

/// Explicitly wired collaborators shared by every request: the repository,
/// the policy evaluator, the listener registry and the named-query registry.
/// All of them are assembled once at startup and immutable afterwards.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub policy: Arc<dyn PolicyEvaluator>,
    pub listeners: Arc<ListenerRegistry>,
    pub named_queries: Arc<NamedQueryRegistry>,
}

impl<S> AppState<S> {
    pub fn new(
        store: Arc<S>,
        policy: Arc<dyn PolicyEvaluator>,
        listeners: Arc<ListenerRegistry>,
        named_queries: Arc<NamedQueryRegistry>,
    ) -> Self {
        Self {
            store,
            policy,
            listeners,
            named_queries,
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            listeners: Arc::clone(&self.listeners),
            named_queries: Arc::clone(&self.named_queries),
        }
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    pub fetch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExampleQuery {
    pub example: Option<String>,
    pub fetch: Option<String>,
}

pub async fn get_definition<S: EntityStore>(
    State(state): State<AppState<S>>,
    Path(entity_type): Path<String>,
) -> Result<Json<EntityDefinition>, SyncError> {
    let definition = state
        .store
        .get_definition(&entity_type)
        .await
        .map_err(SyncError::from)?
        .ok_or_else(|| SyncError::malformed(format!("unknown entity type {entity_type}")))?;
    Ok(Json(definition))
}

pub async fn get_definitions<S: EntityStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<EntityDefinition>>, SyncError> {
    let definitions = state
        .store
        .list_definitions()
        .await
        .map_err(SyncError::from)?;
    Ok(Json(definitions))
}

/// One or more entities by id. A single id yields one object, a comma list
/// yields an array.
pub async fn get_entities_by_ids<S: EntityStore>(
    State(state): State<AppState<S>>,
    Path((entity_type, raw_ids)): Path<(String, String)>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<Value>, SyncError> {
    let fetch = split_fetch_directives(query.fetch.as_deref());
    let ids: Vec<Id> = raw_ids
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if ids.is_empty() {
        return Err(SyncError::malformed("no entity ids given"));
    }
    if ids.len() == 1 {
        let value =
            QueryResolver::by_id(&*state.store, &*state.policy, &entity_type, &ids[0], &fetch)
                .await?;
        Ok(Json(value))
    } else {
        let values =
            QueryResolver::by_ids(&*state.store, &*state.policy, &entity_type, &ids, &fetch)
                .await?;
        Ok(Json(Value::Array(values)))
    }
}

pub async fn get_entities_by_example<S: EntityStore>(
    State(state): State<AppState<S>>,
    Path(entity_type): Path<String>,
    Query(query): Query<ExampleQuery>,
) -> Result<Json<Vec<Value>>, SyncError> {
    let fetch = split_fetch_directives(query.fetch.as_deref());
    let example = query
        .example
        .ok_or_else(|| SyncError::malformed("missing example query parameter"))?;
    let values =
        QueryResolver::by_example(&*state.store, &*state.policy, &entity_type, &example, &fetch)
            .await?;
    Ok(Json(values))
}

pub async fn get_all_entities<S: EntityStore>(
    State(state): State<AppState<S>>,
    Path(entity_type): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<Vec<Value>>, SyncError> {
    let fetch = split_fetch_directives(query.fetch.as_deref());
    let values = QueryResolver::all(&*state.store, &*state.policy, &entity_type, &fetch).await?;
    Ok(Json(values))
}

pub async fn get_entities_by_named_query<S: EntityStore>(
    State(state): State<AppState<S>>,
    Path(query_name): Path<String>,
    Query(raw_parameters): Query<BTreeMap<String, String>>,
) -> Result<Json<Vec<Value>>, SyncError> {
    let mut parameters = raw_parameters;
    // `fetch` is reserved on named-query paths and never binds to the query.
    let fetch = split_fetch_directives(parameters.remove("fetch").as_deref());
    let values = QueryResolver::named(
        &*state.store,
        &*state.policy,
        &state.named_queries,
        &query_name,
        &parameters,
        &fetch,
    )
    .await?;
    Ok(Json(values))
}

/// Single-entity create. Runs the same pipeline as a one-op commit batch and
/// answers with the canonical augmented entity.
pub async fn create_entity<S: EntityStore>(
    State(state): State<AppState<S>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path(entity_type): Path<String>,
    Query(query): Query<FetchQuery>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, SyncError> {
    let Value::Object(mut node) = body else {
        return Err(SyncError::malformed("entity body must be a JSON object"));
    };
    if node.contains_key("id") {
        return Err(SyncError::malformed("create body must not carry an id"));
    }
    node.insert("entityType".to_string(), Value::String(entity_type));
    node.entry("tempId".to_string())
        .or_insert_with(|| Value::String("pending".to_string()));

    let context = request_context(&uri, &headers);
    let result = run_commit_pipeline(
        &state,
        &Value::Object(node),
        query.fetch.as_deref(),
        context,
    )
    .await?;
    let entity = result
        .entities
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::Unclassified(anyhow::anyhow!("create produced no entity")))?;
    Ok(Json(entity))
}

/// Full mutation batch: parse, permission check, transactional apply,
/// canonical refresh, then listener fan-out before the response goes out.
pub async fn commit<S: EntityStore>(
    State(state): State<AppState<S>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<FetchQuery>,
    Json(tree): Json<Value>,
) -> Result<Json<CommitResult>, SyncError> {
    let context = request_context(&uri, &headers);
    let result = run_commit_pipeline(&state, &tree, query.fetch.as_deref(), context).await?;
    Ok(Json(result))
}

async fn run_commit_pipeline<S: EntityStore>(
    state: &AppState<S>,
    tree: &Value,
    raw_fetch: Option<&str>,
    context: RequestContext,
) -> Result<CommitResult, SyncError> {
    let fetch = split_fetch_directives(raw_fetch);
    let batch = GraphParser::parse_batch(&*state.store, tree, fetch).await?;
    PermissionValidator::validate(&*state.store, &*state.policy, &batch).await?;
    let outcome = CommitCoordinator::apply(&*state.store, &batch).await?;
    let result =
        EntitySerializer::refresh(&*state.store, &*state.policy, &outcome, &batch.fetch).await?;

    // The transaction is durable at this point; listener outcomes cannot
    // affect it or the response, but delivery happens before we answer.
    let notification = NotificationBatch::new(
        outcome.created.clone(),
        outcome.updated.clone(),
        outcome.deleted.clone(),
        context,
    );
    state.listeners.notify_commit(&notification);

    Ok(result)
}

fn request_context(uri: &Uri, headers: &HeaderMap) -> RequestContext {
    RequestContext {
        uri: uri.to_string(),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
    }
}
