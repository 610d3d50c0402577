//! HTTP routes.
//!
//! All sync routes live under `/project/:user_id/:project_name`. Handlers
//! parse and authenticate the request, then run the repository call on the
//! blocking thread pool.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::repository::{DownloadOutcome, ProjectRepository, SaveOutcome};
use axum::body::Bytes;
use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use storysync_protocol::{
    BeginSyncResponse, DeleteEntityResponse, EndSyncResponse, EntityHash, EntityType,
    ErrorResponse, ProjectDefinition, ProjectEntity, SaveEntityResponse, UserId,
    HEADER_ENTITY_HASH, HEADER_ENTITY_TYPE, HEADER_ORIGINAL_HASH, HEADER_SYNC_ID,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    repository: Arc<ProjectRepository>,
    validator: Option<Arc<TokenValidator>>,
}

/// The user and project a request is scoped to.
struct Scope {
    user_id: UserId,
    project: ProjectDefinition,
}

impl AppState {
    fn scope(&self, headers: &HeaderMap, user: &str, project: &str) -> ServerResult<Scope> {
        let path_user: UserId = user
            .parse()
            .map_err(|_| ServerError::InvalidRequest(format!("invalid user id {user:?}")))?;
        let user_id = self.authenticate(headers, path_user)?;
        let project = ProjectDefinition::new(project)?;
        Ok(Scope { user_id, project })
    }

    /// Resolves the principal. Without a validator the path user is trusted.
    fn authenticate(&self, headers: &HeaderMap, path_user: UserId) -> ServerResult<UserId> {
        let Some(validator) = &self.validator else {
            return Ok(path_user);
        };

        let token = header_str(headers, header::AUTHORIZATION.as_str())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ServerError::NotAuthorized("missing bearer token".into()))?;

        let user_id = validator.validate_token(token).inspect_err(|e| {
            tracing::warn!(path_user, error = %e, "rejected token");
        })?;
        if user_id != path_user {
            tracing::warn!(path_user, token_user = user_id, "token issued to another user");
            return Err(ServerError::NotAuthorized(
                "token does not grant access to this user".into(),
            ));
        }
        Ok(user_id)
    }
}

/// Builds the router for a repository.
///
/// With `validator` set, every project route requires a bearer token issued
/// to the user named in the path. `/health` is always open.
pub fn router(
    repository: Arc<ProjectRepository>,
    validator: Option<TokenValidator>,
    config: &ServerConfig,
) -> Router {
    let state = AppState {
        repository,
        validator: validator.map(Arc::new),
    };

    Router::new()
        .route("/health", get(health))
        .route("/project/:user_id/:project_name/begin_sync", get(begin_sync))
        .route(
            "/project/:user_id/:project_name/end_sync",
            get(end_sync).post(end_sync),
        )
        .route(
            "/project/:user_id/:project_name/upload_entity/:entity_id",
            post(upload_entity),
        )
        .route(
            "/project/:user_id/:project_name/download_entity/:entity_id",
            get(download_entity),
        )
        .route(
            "/project/:user_id/:project_name/delete_entity/:entity_id",
            get(delete_entity),
        )
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
struct BeginSyncQuery {
    since: Option<String>,
}

async fn begin_sync(
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
    query: Option<Query<BeginSyncQuery>>,
    headers: HeaderMap,
) -> ServerResult<Json<BeginSyncResponse>> {
    let scope = state.scope(&headers, &user, &project)?;
    let since = query.and_then(|Query(q)| parse_time(q.since.as_deref()));

    let repository = Arc::clone(&state.repository);
    let response = run_blocking(move || {
        repository.begin_sync_since(scope.user_id, &scope.project, since)
    })
    .await?;
    Ok(Json(response))
}

/// End-of-sync claims. Values that do not parse are treated as absent.
#[derive(Debug, Default, Deserialize)]
struct EndSyncForm {
    since: Option<String>,
    #[serde(rename = "lastSync")]
    last_sync: Option<String>,
    #[serde(rename = "lastId")]
    last_id: Option<String>,
}

impl EndSyncForm {
    fn or(self, other: EndSyncForm) -> EndSyncForm {
        EndSyncForm {
            since: self.since.or(other.since),
            last_sync: self.last_sync.or(other.last_sync),
            last_id: self.last_id.or(other.last_id),
        }
    }

    fn since(&self) -> Option<DateTime<Utc>> {
        parse_time(self.since.as_deref())
    }

    fn last_sync(&self) -> Option<DateTime<Utc>> {
        parse_time(self.last_sync.as_deref())
    }

    fn last_id(&self) -> Option<i32> {
        self.last_id.as_deref().and_then(|v| v.trim().parse().ok())
    }
}

async fn end_sync(
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
    query: Option<Query<EndSyncForm>>,
    headers: HeaderMap,
    form: Option<Form<EndSyncForm>>,
) -> ServerResult<Json<EndSyncResponse>> {
    let scope = state.scope(&headers, &user, &project)?;
    let sync_id = required_header(&headers, HEADER_SYNC_ID)?.to_owned();

    let form = form
        .map(|Form(f)| f)
        .unwrap_or_default()
        .or(query.map(|Query(q)| q).unwrap_or_default());
    let since = form.since();
    let last_sync = form.last_sync();
    let last_id = form.last_id();

    let repository = Arc::clone(&state.repository);
    let response = run_blocking(move || {
        repository.end_sync_since(
            scope.user_id,
            &scope.project,
            &sync_id,
            since,
            last_sync,
            last_id,
        )
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
struct UploadQuery {
    force: Option<String>,
}

async fn upload_entity(
    State(state): State<AppState>,
    Path((user, project, entity_id)): Path<(String, String, String)>,
    query: Option<Query<UploadQuery>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let force = query
        .and_then(|Query(q)| q.force)
        .is_some_and(|v| v.trim() == "true");

    match upload(&state, &headers, &user, &project, &entity_id, force, body).await {
        Ok(response) => response,
        // Anything but a malformed or unauthorized request is a failed save
        Err(err) => {
            let status = match &err {
                ServerError::InvalidRequest(_) | ServerError::NotAuthorized(_) => {
                    err.status_code()
                }
                _ => StatusCode::EXPECTATION_FAILED,
            };
            error_response(status, &err)
        }
    }
}

async fn upload(
    state: &AppState,
    headers: &HeaderMap,
    user: &str,
    project: &str,
    entity_id: &str,
    force: bool,
    body: Bytes,
) -> ServerResult<Response> {
    let scope = state.scope(headers, user, project)?;
    let id = parse_entity_id(entity_id)?;
    let entity_type: EntityType = required_header(headers, HEADER_ENTITY_TYPE)?.parse()?;
    let sync_id = required_header(headers, HEADER_SYNC_ID)?.to_owned();
    let original_hash = optional_hash(headers, HEADER_ORIGINAL_HASH)?;

    let entity = entity_type.decode_body(&body)?;
    if entity.id() != id {
        return Err(ServerError::InvalidRequest(format!(
            "body id {} does not match path id {id}",
            entity.id()
        )));
    }

    let repository = Arc::clone(&state.repository);
    let outcome = run_blocking(move || {
        repository.save_entity(
            scope.user_id,
            &scope.project,
            entity,
            original_hash,
            &sync_id,
            force,
        )
    })
    .await?;

    match outcome {
        SaveOutcome::Accepted(hash) => Ok(Json(SaveEntityResponse { hash }).into_response()),
        SaveOutcome::Conflict(server_entity) => {
            let hash = EntityHash::of(&server_entity)?;
            entity_response(StatusCode::CONFLICT, &server_entity, hash)
        }
    }
}

async fn download_entity(
    State(state): State<AppState>,
    Path((user, project, entity_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let scope = state.scope(&headers, &user, &project)?;
    let id = parse_entity_id(&entity_id)?;
    let sync_id = required_header(&headers, HEADER_SYNC_ID)?.to_owned();
    let client_hash = optional_hash(&headers, HEADER_ENTITY_HASH)?;

    let repository = Arc::clone(&state.repository);
    let outcome = run_blocking(move || {
        repository.download_entity(scope.user_id, &scope.project, id, &sync_id, client_hash)
    })
    .await?;

    match outcome {
        DownloadOutcome::NotModified => Ok(StatusCode::NOT_MODIFIED.into_response()),
        DownloadOutcome::Entity { entity, hash } => {
            entity_response(StatusCode::OK, &entity, hash)
        }
    }
}

async fn delete_entity(
    State(state): State<AppState>,
    Path((user, project, entity_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ServerResult<Json<DeleteEntityResponse>> {
    let scope = state.scope(&headers, &user, &project)?;
    let id = parse_entity_id(&entity_id)?;
    let sync_id = required_header(&headers, HEADER_SYNC_ID)?.to_owned();

    let repository = Arc::clone(&state.repository);
    let deleted = run_blocking(move || {
        repository.delete_entity(scope.user_id, &scope.project, id, &sync_id)
    })
    .await?;
    Ok(Json(DeleteEntityResponse { deleted }))
}

/// Entity body with its type and hash headers.
fn entity_response(
    status: StatusCode,
    entity: &ProjectEntity,
    hash: EntityHash,
) -> ServerResult<Response> {
    let mut response = (status, entity.encode_body()?).into_response();
    let hash = HeaderValue::from_str(&hash.to_hex())
        .map_err(|e| ServerError::Internal(format!("hash header: {e}")))?;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        HEADER_ENTITY_TYPE,
        HeaderValue::from_static(entity.entity_type().as_str()),
    );
    headers.insert(HEADER_ENTITY_HASH, hash);
    Ok(response)
}

async fn run_blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("worker task failed: {e}")))?
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> ServerResult<&'a str> {
    header_str(headers, name)
        .ok_or_else(|| ServerError::InvalidRequest(format!("missing {name} header")))
}

fn optional_hash(headers: &HeaderMap, name: &str) -> ServerResult<Option<EntityHash>> {
    Ok(header_str(headers, name)
        .map(|v| v.parse::<EntityHash>())
        .transpose()?)
}

/// Parses an RFC 3339 time, treating anything unparsable as absent.
fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_entity_id(raw: &str) -> ServerResult<i32> {
    raw.parse()
        .map_err(|_| ServerError::InvalidRequest(format!("invalid entity id {raw:?}")))
}

fn error_response(status: StatusCode, err: &ServerError) -> Response {
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, kind = err.kind(), %status, "request rejected");
    }
    (status, Json(ErrorResponse::new(err.kind(), err.to_string()))).into_response()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), &self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_form_parsing_is_lenient() {
        let form = EndSyncForm {
            since: Some("2023-03-14T09:00:00+01:00".into()),
            last_sync: Some("2023-03-14T09:26:53Z".into()),
            last_id: Some(" 12 ".into()),
        };
        assert_eq!(form.since().unwrap().timestamp(), 1_678_780_800);
        assert_eq!(form.last_sync().unwrap().timestamp(), 1_678_786_013);
        assert_eq!(form.last_id(), Some(12));

        let garbage = EndSyncForm {
            since: Some("last week".into()),
            last_sync: Some("yesterday".into()),
            last_id: Some("twelve".into()),
        };
        assert_eq!(garbage.since(), None);
        assert_eq!(garbage.last_sync(), None);
        assert_eq!(garbage.last_id(), None);
    }

    #[test]
    fn body_values_win_over_query() {
        let body = EndSyncForm {
            since: None,
            last_sync: None,
            last_id: Some("3".into()),
        };
        let query = EndSyncForm {
            since: None,
            last_sync: Some("2023-03-14T09:26:53Z".into()),
            last_id: Some("9".into()),
        };
        let merged = body.or(query);
        assert_eq!(merged.last_id(), Some(3));
        assert!(merged.last_sync().is_some());
    }

    #[test]
    fn header_helpers() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_SYNC_ID, HeaderValue::from_static("  abc "));
        headers.insert(HEADER_ENTITY_HASH, HeaderValue::from_static("not-hex"));
        headers.insert(HEADER_ORIGINAL_HASH, HeaderValue::from_static(""));

        assert_eq!(required_header(&headers, HEADER_SYNC_ID).unwrap(), "abc");
        assert!(required_header(&headers, HEADER_ENTITY_TYPE).is_err());
        assert!(optional_hash(&headers, HEADER_ENTITY_HASH).is_err());
        assert_eq!(optional_hash(&headers, HEADER_ORIGINAL_HASH).unwrap(), None);
    }
}
