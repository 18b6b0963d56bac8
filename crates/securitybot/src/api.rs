//! HTTP reporting and ingestion API
//!
//! Served next to the scheduler by `securitybot run`, over the same stores:
//!
//! - `GET /healthcheck` - liveness
//! - `GET /api/query` - filtered tasks, newest event first
//! - `POST /api/create` - form-encoded alert ingestion
//! - `GET|POST /api/ignored` - list or add ignore rules
//! - `GET|POST /api/blacklist` - list or add blacklisted subjects
//!
//! List parameters (`titles`, `ldap`) are comma separated. Times are Unix
//! seconds. Failures answer with `{"error": "..."}`.

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tasker::query::DEFAULT_LIMIT;
use tasker::{
    create_task, parse_escalation_list, Clock, CreateError, IgnoreRule, NewAlert, RuleQuery,
    RuleStore, SharedClock, SharedRuleStore, SharedTaskStore, StoreError, TaskQuery, TaskStatus,
    TaskStore,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Stores and clock behind the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub tasks: SharedTaskStore,
    pub rules: SharedRuleStore,
    pub clock: SharedClock,
}

/// Request failures, mapped onto status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid {name}: {value}")]
    BadParam { name: &'static str, value: String },

    #[error(transparent)]
    Create(#[from] CreateError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadParam { .. } => StatusCode::BAD_REQUEST,
            Self::Create(CreateError::Store(StoreError::Duplicate(_))) => StatusCode::CONFLICT,
            Self::Create(CreateError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Create(_) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "API request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/api/query", get(query))
        .route("/api/create", post(create))
        .route("/api/ignored", get(ignored).post(add_ignore))
        .route("/api/blacklist", get(blacklist).post(add_blacklist))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("API shutting down");
        })
        .await
}

async fn healthcheck() -> impl IntoResponse {
    (StatusCode::OK, "200 OK")
}

// =============================================================================
// Parameter parsing
// =============================================================================

fn csv(raw: Option<String>) -> Option<Vec<String>> {
    let items: Vec<String> = raw?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn flag(name: &'static str, raw: Option<String>) -> ApiResult<Option<bool>> {
    let Some(raw) = raw else { return Ok(None) };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(Some(true)),
        "0" | "false" => Ok(Some(false)),
        _ => Err(ApiError::BadParam { name, value: raw }),
    }
}

fn epoch(name: &'static str, raw: Option<String>) -> ApiResult<Option<DateTime<Utc>>> {
    let Some(raw) = raw else { return Ok(None) };
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(Some)
        .ok_or(ApiError::BadParam { name, value: raw })
}

fn limit(raw: Option<String>) -> ApiResult<usize> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_LIMIT);
    };
    raw.trim().parse().map_err(|_| ApiError::BadParam {
        name: "limit",
        value: raw,
    })
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    limit: Option<String>,
    titles: Option<String>,
    ldap: Option<String>,
    status: Option<String>,
    performed: Option<String>,
    authenticated: Option<String>,
    after: Option<String>,
    before: Option<String>,
}

impl QueryParams {
    fn into_query(self) -> ApiResult<TaskQuery> {
        let status = match self.status {
            Some(raw) => Some(raw.parse::<TaskStatus>().map_err(|_| ApiError::BadParam {
                name: "status",
                value: raw,
            })?),
            None => None,
        };
        Ok(TaskQuery {
            limit: limit(self.limit)?,
            titles: csv(self.titles),
            ldap: csv(self.ldap),
            status,
            performed: flag("performed", self.performed)?,
            authenticated: flag("authenticated", self.authenticated)?,
            after: epoch("after", self.after)?,
            before: epoch("before", self.before)?,
        })
    }
}

async fn query(
    State(state): State<ApiState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.into_query()?;
    let tasks = state.tasks.query(&query).await?;
    Ok(Json(tasks))
}

/// Form body of `POST /api/create`. `escalation` is a JSON list string.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateForm {
    title: String,
    ldap: String,
    description: String,
    reason: String,
    url: Option<String>,
    event_time: Option<String>,
    escalation: String,
}

async fn create(
    State(state): State<ApiState>,
    Form(form): Form<CreateForm>,
) -> ApiResult<impl IntoResponse> {
    let alert = NewAlert {
        event_time: epoch("event_time", form.event_time)?,
        escalation: parse_escalation_list(&form.escalation),
        title: form.title,
        ldap: form.ldap,
        description: form.description,
        reason: form.reason,
        url: form.url,
    };
    let record = create_task(state.tasks.as_ref(), alert, state.clock.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// =============================================================================
// Rules
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct IgnoredParams {
    limit: Option<String>,
    ldap: Option<String>,
}

async fn ignored(
    State(state): State<ApiState>,
    Query(params): Query<IgnoredParams>,
) -> ApiResult<impl IntoResponse> {
    let query = RuleQuery {
        limit: limit(params.limit)?,
        ldap: csv(params.ldap),
    };
    let rules = state.rules.ignored(&query, state.clock.now()).await?;
    Ok(Json(rules))
}

/// Form body of `POST /api/ignored`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IgnoreForm {
    ldap: String,
    title: String,
    reason: String,
    duration_secs: Option<String>,
}

async fn add_ignore(
    State(state): State<ApiState>,
    Form(form): Form<IgnoreForm>,
) -> ApiResult<impl IntoResponse> {
    for (name, value) in [("ldap", &form.ldap), ("title", &form.title)] {
        if value.trim().is_empty() {
            return Err(ApiError::BadParam {
                name,
                value: value.clone(),
            });
        }
    }
    let raw = form.duration_secs.unwrap_or_default();
    let secs = match raw.trim().parse::<i64>() {
        Ok(secs) if secs > 0 => secs,
        _ => {
            return Err(ApiError::BadParam {
                name: "duration_secs",
                value: raw,
            })
        }
    };

    let rule = IgnoreRule {
        ldap: form.ldap,
        title: form.title,
        reason: form.reason,
        until: state.clock.now() + Duration::seconds(secs),
    };
    state.rules.put_ignore(&rule).await?;
    info!(subject = %rule.ldap, title = %rule.title, until = %rule.until, "Ignore rule added");
    Ok((StatusCode::CREATED, Json(rule)))
}

#[derive(Debug, Default, Deserialize)]
pub struct BlacklistParams {
    limit: Option<String>,
}

async fn blacklist(
    State(state): State<ApiState>,
    Query(params): Query<BlacklistParams>,
) -> ApiResult<impl IntoResponse> {
    let subjects = state.rules.blacklist(limit(params.limit)?).await?;
    Ok(Json(subjects))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BlacklistForm {
    ldap: String,
}

async fn add_blacklist(
    State(state): State<ApiState>,
    Form(form): Form<BlacklistForm>,
) -> ApiResult<impl IntoResponse> {
    let ldap = form.ldap.trim().to_string();
    if ldap.is_empty() {
        return Err(ApiError::BadParam {
            name: "ldap",
            value: form.ldap,
        });
    }
    let added = state.rules.add_blacklist(&ldap).await?;
    if added {
        info!(subject = %ldap, "Subject blacklisted");
    }
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(json!({ "ldap": ldap, "added": added }))))
}
