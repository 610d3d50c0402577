//! HTTP transport implementation.
//!
//! [`HttpTransport`] speaks the server's route protocol over any
//! [`HttpClient`]. [`ReqwestClient`] is the blocking `reqwest` implementation
//! used in production; tests plug in scripted clients.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{DownloadResult, SyncTransport, UploadResult};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use storysync_protocol::{
    BeginSyncResponse, DeleteEntityResponse, EndSyncResponse, EntityHash, EntityType,
    ErrorResponse, ProjectEntity, ProjectKey, SaveEntityResponse, FORM_LAST_ID, FORM_LAST_SYNC,
    FORM_SINCE, HEADER_ENTITY_HASH, HEADER_ENTITY_TYPE, HEADER_ORIGINAL_HASH, HEADER_SYNC_ID,
    QUERY_FORCE,
};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
}

/// An HTTP request as handed to an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body; empty for none.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Returns the first value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response as returned by an [`HttpClient`].
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with a status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    /// Returns the first value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// HTTP client abstraction.
///
/// Implementations only move bytes; status codes are interpreted by
/// [`HttpTransport`]. Connection failures are reported as
/// [`SyncError::Transport`] or [`SyncError::Timeout`].
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response, whatever its status.
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse>;

    /// Checks if the client is usable.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Blocking `reqwest` client.
///
/// Must not be used from inside an async runtime.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with a request timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let body = response.bytes().map_err(transport_error)?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        SyncError::transport_retryable(err.to_string())
    } else {
        SyncError::transport_fatal(err.to_string())
    }
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: Url,
    client: C,
    auth_token: Option<String>,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl HttpTransport<ReqwestClient> {
    /// Creates a `reqwest` transport from a sync configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let client = ReqwestClient::new(config.timeout)?;
        let transport = Self::new(&config.server_url, client)?;
        Ok(match &config.auth_token {
            Some(token) => transport.with_auth_token(token.clone()),
            None => transport,
        })
    }
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for a server base URL.
    pub fn new(base_url: &str, client: C) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::transport_fatal(format!("invalid server URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::transport_fatal(format!(
                "server URL {base_url} cannot have paths"
            )));
        }

        Ok(Self {
            base_url,
            client,
            auth_token: None,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Builds `<base>/project/<user>/<project>/<segments...>`.
    fn url(&self, project: &ProjectKey, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SyncError::transport_fatal("server URL cannot have paths"))?
            .pop_if_empty()
            .push("project")
            .push(&project.user_id.to_string())
            .push(project.project.name())
            .extend(segments);
        Ok(url)
    }

    fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let request = match &self.auth_token {
            Some(token) => request.with_header("authorization", format!("Bearer {token}")),
            None => request,
        };

        tracing::trace!(method = ?request.method, url = %request.url, "sending request");
        match self.client.send(request) {
            Ok(response) => {
                *self.last_error.write() = None;
                Ok(response)
            }
            Err(e) => {
                *self.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Maps an unexpected status to an error.
fn status_error(response: &HttpResponse) -> SyncError {
    let (kind, message) = match serde_json::from_slice::<ErrorResponse>(&response.body) {
        Ok(body) => (body.error, body.message),
        Err(_) => (
            "unknown".to_owned(),
            String::from_utf8_lossy(&response.body).into_owned(),
        ),
    };

    match (response.status, kind.as_str()) {
        (401, _) => SyncError::AuthenticationFailed(message),
        (_, "already_syncing" | "unknown_session" | "session_mismatch") => {
            SyncError::Session(message)
        }
        (status, _) => SyncError::Server {
            status,
            kind,
            message,
        },
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> SyncResult<T> {
    serde_json::from_slice(&response.body)
        .map_err(|e| SyncError::Protocol(format!("invalid response body: {e}")))
}

/// Reads an entity body and its type and hash headers.
fn decode_entity(response: &HttpResponse) -> SyncResult<(ProjectEntity, EntityHash)> {
    let entity_type: EntityType = response
        .header(HEADER_ENTITY_TYPE)
        .ok_or_else(|| SyncError::Protocol("response without entity type".into()))?
        .parse()?;
    let entity = entity_type.decode_body(&response.body)?;
    let hash = match response.header(HEADER_ENTITY_HASH) {
        Some(hash) => hash.parse()?,
        None => EntityHash::of(&entity)?,
    };
    Ok((entity, hash))
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn begin_sync(
        &self,
        project: &ProjectKey,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<BeginSyncResponse> {
        let mut url = self.url(project, &["begin_sync"])?;
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair(FORM_SINCE, &format_time(since));
        }
        let response = self.execute(HttpRequest::new(HttpMethod::Get, url))?;
        match response.status {
            200 => decode_json(&response),
            _ => Err(status_error(&response)),
        }
    }

    fn end_sync(
        &self,
        project: &ProjectKey,
        sync_id: &str,
        since: Option<DateTime<Utc>>,
        last_sync: Option<DateTime<Utc>>,
        last_id: Option<i32>,
    ) -> SyncResult<EndSyncResponse> {
        let mut url = self.url(project, &["end_sync"])?;
        if since.is_some() || last_sync.is_some() || last_id.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(since) = since {
                query.append_pair(FORM_SINCE, &format_time(since));
            }
            if let Some(last_sync) = last_sync {
                query.append_pair(FORM_LAST_SYNC, &format_time(last_sync));
            }
            if let Some(last_id) = last_id {
                query.append_pair(FORM_LAST_ID, &last_id.to_string());
            }
        }

        let request = HttpRequest::new(HttpMethod::Get, url).with_header(HEADER_SYNC_ID, sync_id);
        let response = self.execute(request)?;
        match response.status {
            200 => decode_json(&response),
            _ => Err(status_error(&response)),
        }
    }

    fn upload(
        &self,
        project: &ProjectKey,
        sync_id: &str,
        entity: &ProjectEntity,
        original_hash: Option<EntityHash>,
        force: bool,
    ) -> SyncResult<UploadResult> {
        let id = entity.id().to_string();
        let mut url = self.url(project, &["upload_entity", id.as_str()])?;
        if force {
            url.query_pairs_mut().append_pair(QUERY_FORCE, "true");
        }

        let mut request = HttpRequest::new(HttpMethod::Post, url)
            .with_header(HEADER_SYNC_ID, sync_id)
            .with_header(HEADER_ENTITY_TYPE, entity.entity_type().as_str())
            .with_header("content-type", "application/json")
            .with_body(entity.encode_body()?);
        if let Some(hash) = original_hash {
            request = request.with_header(HEADER_ORIGINAL_HASH, hash.to_hex());
        }

        let response = self.execute(request)?;
        match response.status {
            200 => {
                let saved: SaveEntityResponse = decode_json(&response)?;
                Ok(UploadResult::Accepted(saved.hash))
            }
            409 => {
                let (entity, hash) = decode_entity(&response)?;
                Ok(UploadResult::Conflict { entity, hash })
            }
            _ => Err(status_error(&response)),
        }
    }

    fn download(
        &self,
        project: &ProjectKey,
        sync_id: &str,
        id: i32,
        known_hash: Option<EntityHash>,
    ) -> SyncResult<DownloadResult> {
        let url = self.url(project, &["download_entity", id.to_string().as_str()])?;
        let mut request = HttpRequest::new(HttpMethod::Get, url).with_header(HEADER_SYNC_ID, sync_id);
        if let Some(hash) = known_hash {
            request = request.with_header(HEADER_ENTITY_HASH, hash.to_hex());
        }

        let response = self.execute(request)?;
        match response.status {
            200 => {
                let (entity, hash) = decode_entity(&response)?;
                Ok(DownloadResult::Entity { entity, hash })
            }
            304 => Ok(DownloadResult::NotModified),
            404 => Ok(DownloadResult::NotFound),
            _ => Err(status_error(&response)),
        }
    }

    fn delete(&self, project: &ProjectKey, sync_id: &str, id: i32) -> SyncResult<bool> {
        let url = self.url(project, &["delete_entity", id.to_string().as_str()])?;
        let request = HttpRequest::new(HttpMethod::Get, url).with_header(HEADER_SYNC_ID, sync_id);
        let response = self.execute(request)?;
        match response.status {
            200 => Ok(decode_json::<DeleteEntityResponse>(&response)?.deleted),
            _ => Err(status_error(&response)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
