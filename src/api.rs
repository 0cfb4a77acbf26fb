//! # API Server Module
//!
//! ## Purpose
//! REST API server exposing search, suggestions, category listings, status
//! transitions and the audit trail.
//!
//! ## Input/Output Specification
//! - **Input**: HTTP requests with query parameters and JSON bodies
//! - **Output**: JSON responses with record lists, counts and flags
//! - **Endpoints**: Search, suggestions, categories, voters, status, audit
//!
//! ## Key Features
//! - Rate limiting on every API operation, quotas by caller trust level
//! - Most-specific-wins scope parameter precedence
//! - Lenient scope handling: unknown identifiers drop the filter
//! - Structured error responses

use crate::audit::AuditFilter;
use crate::errors::{RegistryError, Result};
use crate::rate_limit::client_identity;
use crate::search::{SearchMode, SearchRequest, VoterFilter};
use crate::suggest::{SuggestScope, SuggestionRequest};
use crate::{CallerTrust, CategoryId, Gender, VoterId, VoterStatus};
use actix_cors::Cors;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Result as ActixResult};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

/// API server wrapping the shared application state
pub struct ApiServer {
    app_state: crate::AppState,
}

impl ApiServer {
    pub fn new(app_state: crate::AppState) -> Self {
        Self { app_state }
    }

    /// Run the API server until the actix system shuts down
    pub async fn run(self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.app_state.config.server.host, self.app_state.config.server.port
        );
        let enable_cors = self.app_state.config.server.enable_cors;
        let app_state = self.app_state;

        tracing::info!("Starting API server on {}", bind_addr);

        let server = HttpServer::new(move || {
            let cors = if enable_cors {
                Cors::permissive()
            } else {
                Cors::default()
            };
            App::new()
                .wrap(cors)
                .app_data(web::Data::new(app_state.clone()))
                .route("/", web::get().to(index_handler))
                .route("/health", web::get().to(health_handler))
                .route("/stats", web::get().to(stats_handler))
                .route("/api/categories", web::get().to(categories_handler))
                .route("/api/search", web::get().to(search_handler))
                .route("/api/suggestions", web::get().to(suggestions_handler))
                .route("/api/voters", web::get().to(voter_list_handler))
                .route("/api/voters/{id}", web::get().to(voter_detail_handler))
                .route(
                    "/api/voters/{id}/status",
                    web::post().to(status_update_handler),
                )
                .route("/api/audit", web::get().to(audit_handler))
        })
        .workers(num_cpus::get())
        .bind(&bind_addr)
        .map_err(|e| RegistryError::Internal {
            message: format!("Failed to bind server to {}: {}", bind_addr, e),
        })?
        .run();

        server.await.map_err(|e| RegistryError::Internal {
            message: format!("Server error: {}", e),
        })?;

        Ok(())
    }
}

// ---- request shapes ----

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    pub parent_id: Option<String>,
    pub level: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQueryParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
    pub mode: Option<String>,
    pub gender: Option<String>,
    pub status: Option<String>,
    pub voter_area: Option<String>,
    pub union: Option<String>,
    pub upazila: Option<String>,
    pub district: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionQueryParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub field: String,
    pub limit: Option<usize>,
    pub voter_area: Option<String>,
    pub union: Option<String>,
    pub upazila: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoterListParams {
    pub search: Option<String>,
    pub name: Option<String>,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub voter_no: Option<String>,
    pub serial: Option<String>,
    pub address: Option<String>,
    pub profession: Option<String>,
    pub gender: Option<String>,
    pub status: Option<String>,
    pub voter_area: Option<String>,
    pub union: Option<String>,
    pub upazila: Option<String>,
    pub district: Option<String>,
    pub category: Option<String>,
    pub json_field: Option<String>,
    pub json_value: Option<String>,
    pub page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateBody {
    #[serde(default)]
    pub status: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub actor: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<usize>,
}

// ---- shared helpers ----

/// Classify the caller: presenting the configured API key makes it trusted
fn caller_trust(req: &HttpRequest, state: &crate::AppState) -> CallerTrust {
    let configured = match &state.config.server.api_key {
        Some(key) if !key.is_empty() => key,
        _ => return CallerTrust::Public,
    };
    let presented = req
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok());
    if presented == Some(configured.as_str()) {
        CallerTrust::Trusted
    } else {
        CallerTrust::Public
    }
}

fn request_client(req: &HttpRequest) -> String {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok());
    let peer = req.peer_addr().map(|addr| addr.ip().to_string());
    client_identity(forwarded, peer.as_deref())
}

/// Gate a handler on its rate limit; returns the 429 response when exceeded
fn enforce_rate_limit(
    state: &crate::AppState,
    req: &HttpRequest,
    endpoint: &'static str,
    public_limit: u32,
    trusted_limit: u32,
    trust: CallerTrust,
) -> std::result::Result<(), HttpResponse> {
    let limit = match trust {
        CallerTrust::Public => public_limit,
        CallerTrust::Trusted => trusted_limit,
    };
    let client = request_client(req);
    match state.rate_limiter.check(endpoint, &client, limit) {
        Ok(()) => Ok(()),
        Err(err) => Err(error_response(&err)),
    }
}

fn error_response(err: &RegistryError) -> HttpResponse {
    match err {
        RegistryError::RateLimited {
            retry_after_seconds,
        } => HttpResponse::TooManyRequests().json(json!({
            "error": "Rate limit exceeded. Please wait before making more requests.",
            "retry_after": retry_after_seconds,
        })),
        RegistryError::NotFound { resource, id } => HttpResponse::NotFound().json(json!({
            "error": format!("{} not found", resource),
            "id": id,
        })),
        RegistryError::Validation { field, reason } => HttpResponse::BadRequest().json(json!({
            "error": "Validation failed",
            "field": field,
            "reason": reason,
        })),
        other => {
            tracing::error!("Request failed ({}): {}", other.category(), other);
            HttpResponse::InternalServerError().json(json!({
                "error": "Internal server error",
            }))
        }
    }
}

fn unauthorized_response() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({
        "error": "This endpoint requires a valid API key",
    }))
}

/// Parse a scope identifier parameter; anything unparseable is treated as
/// an unknown scope and dropped, never a hard failure
fn parse_id_param(raw: &Option<String>) -> Option<CategoryId> {
    raw.as_deref()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| s.trim().parse().ok())
}

/// Most specific scope identifier wins when several are supplied
fn select_scope_param(
    voter_area: &Option<String>,
    union: &Option<String>,
    upazila: &Option<String>,
    district: &Option<String>,
    category: &Option<String>,
) -> Option<CategoryId> {
    parse_id_param(voter_area)
        .or_else(|| parse_id_param(union))
        .or_else(|| parse_id_param(upazila))
        .or_else(|| parse_id_param(district))
        .or_else(|| parse_id_param(category))
}

/// Resolve a selected scope to its descendant set; unknown ids drop the
/// filter (scope miss leniency)
fn resolve_scope_filter(
    state: &crate::AppState,
    selected: Option<CategoryId>,
) -> Result<Option<HashSet<CategoryId>>> {
    match selected {
        Some(id) => state.category_tree.resolve_scope(id),
        None => Ok(None),
    }
}

/// Filter values of `all` or empty mean "no filter"; unparseable values are
/// dropped rather than rejected
fn parse_gender_filter(raw: &Option<String>) -> Option<Gender> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "all")
        .and_then(|s| s.parse().ok())
}

fn parse_status_filter(raw: &Option<String>) -> Option<VoterStatus> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "all")
        .and_then(|s| s.parse().ok())
}

fn non_empty(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---- handlers ----

async fn index_handler() -> ActixResult<HttpResponse> {
    let html = r#"
    <!DOCTYPE html>
    <html>
    <head>
        <title>Voter Registry Search</title>
        <style>
            body { font-family: Arial, sans-serif; margin: 40px; }
            .header { color: #2c3e50; }
            .endpoint { margin: 20px 0; padding: 15px; background: #f8f9fa; border-radius: 5px; }
            .method { font-weight: bold; color: #27ae60; }
        </style>
    </head>
    <body>
        <h1 class="header">Voter Registry Search API</h1>
        <p>Ranked search over a hierarchically organized voter registry.</p>

        <h2>Available Endpoints</h2>

        <div class="endpoint">
            <span class="method">GET</span> /api/search?q=...
            <p>Ranked multi-field voter search with optional category scope.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /api/suggestions?q=...&amp;field=name
            <p>Field-specific autocomplete suggestions.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /api/categories?parent_id=...
            <p>Category tree listings for dependent dropdowns.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /api/voters?name=...
            <p>Filtered, paginated voter listing.</p>
        </div>

        <div class="endpoint">
            <span class="method">POST</span> /api/voters/{id}/status
            <p>Status transition with audit trail (API key required).</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /api/audit
            <p>Status change audit log, newest first (API key required).</p>
        </div>
    </body>
    </html>
    "#;

    Ok(HttpResponse::Ok().content_type("text/html").body(html))
}

async fn health_handler(state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    let storage_status = match state.store.health_check() {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::error!("Storage health check failed: {}", e);
            "unhealthy"
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "status": storage_status,
        "version": env!("CARGO_PKG_VERSION"),
        "components": {
            "storage": storage_status,
        }
    })))
}

async fn stats_handler(state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    match state.store.stats() {
        Ok(stats) => Ok(HttpResponse::Ok().json(stats)),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn categories_handler(
    state: web::Data<crate::AppState>,
    req: HttpRequest,
    query: web::Query<CategoryQuery>,
) -> ActixResult<HttpResponse> {
    let trust = caller_trust(&req, &state);
    if let Err(resp) = enforce_rate_limit(
        &state,
        &req,
        "categories",
        state.rate_limiter.public_api_limit(),
        state.rate_limiter.trusted_api_limit(),
        trust,
    ) {
        return Ok(resp);
    }

    let nodes = if let Some(parent_id) = parse_id_param(&query.parent_id) {
        state.category_tree.children_of(parent_id)
    } else if let Some(level) = query.level {
        state.category_tree.at_level(level)
    } else {
        state.category_tree.roots()
    };

    let nodes = match nodes {
        Ok(nodes) => nodes,
        Err(e) => return Ok(error_response(&e)),
    };

    let mut data = Vec::with_capacity(nodes.len());
    for node in nodes {
        let has_children = match state.category_tree.has_children(node.id) {
            Ok(v) => v,
            Err(e) => return Ok(error_response(&e)),
        };

        let mut item = json!({
            "id": node.id,
            "name": node.name,
            "code": node.code.clone().unwrap_or_default(),
            "level": node.level,
            "has_children": has_children,
        });

        // Descendant voter counts are only exposed to trusted callers
        if trust == CallerTrust::Trusted {
            let voter_count = if node.has_source_data {
                match state
                    .category_tree
                    .resolve_scope(node.id)
                    .and_then(|scope| match scope {
                        Some(scope) => state.store.voter_count_in_scope(&scope),
                        None => Ok(0),
                    }) {
                    Ok(count) => count,
                    Err(e) => return Ok(error_response(&e)),
                }
            } else {
                0
            };
            item["has_source_data"] = json!(node.has_source_data);
            item["voter_count"] = json!(voter_count);
        }

        data.push(item);
    }

    let count = data.len();
    Ok(HttpResponse::Ok().json(json!({
        "categories": data,
        "count": count,
    })))
}

async fn search_handler(
    state: web::Data<crate::AppState>,
    req: HttpRequest,
    query: web::Query<SearchQueryParams>,
) -> ActixResult<HttpResponse> {
    let trust = caller_trust(&req, &state);
    if let Err(resp) = enforce_rate_limit(
        &state,
        &req,
        "search",
        state.rate_limiter.public_api_limit(),
        state.rate_limiter.trusted_api_limit(),
        trust,
    ) {
        return Ok(resp);
    }

    let selected = select_scope_param(
        &query.voter_area,
        &query.union,
        &query.upazila,
        &query.district,
        &query.category,
    );
    let scope = match resolve_scope_filter(&state, selected) {
        Ok(scope) => scope,
        Err(e) => return Ok(error_response(&e)),
    };

    let mode = match query.mode.as_deref() {
        Some("full") => SearchMode::Full,
        _ => SearchMode::Autocomplete,
    };

    let request = SearchRequest {
        query: query.q.clone(),
        scope,
        gender: parse_gender_filter(&query.gender),
        status: parse_status_filter(&query.status),
        limit: query.limit,
        mode,
        trust,
    };

    match state.search_engine.search(&request) {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn suggestions_handler(
    state: web::Data<crate::AppState>,
    req: HttpRequest,
    query: web::Query<SuggestionQueryParams>,
) -> ActixResult<HttpResponse> {
    let trust = caller_trust(&req, &state);
    if let Err(resp) = enforce_rate_limit(
        &state,
        &req,
        "suggestions",
        state.rate_limiter.public_api_limit(),
        state.rate_limiter.trusted_api_limit(),
        trust,
    ) {
        return Ok(resp);
    }

    // Most specific scope parameter wins; suggestion scope is resolved
    // inline by the engine
    let scope = if let Some(id) = parse_id_param(&query.voter_area) {
        Some(SuggestScope::LocalArea(id))
    } else if let Some(id) = parse_id_param(&query.union) {
        Some(SuggestScope::SubRegion(id))
    } else if let Some(id) = parse_id_param(&query.upazila) {
        Some(SuggestScope::Region(id))
    } else {
        None
    };

    let request = SuggestionRequest {
        query: query.q.clone(),
        field: query.field.clone(),
        scope,
        limit: query.limit,
        trust,
    };

    match state.suggestion_engine.suggest(&request) {
        Ok(suggestions) => {
            let field = crate::suggest::SuggestField::from_raw(&query.field);
            let count = suggestions.len();
            Ok(HttpResponse::Ok().json(json!({
                "suggestions": suggestions,
                "field": field.as_str(),
                "query": query.q.trim(),
                "count": count,
            })))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

async fn voter_list_handler(
    state: web::Data<crate::AppState>,
    req: HttpRequest,
    query: web::Query<VoterListParams>,
) -> ActixResult<HttpResponse> {
    let trust = caller_trust(&req, &state);
    if let Err(resp) = enforce_rate_limit(
        &state,
        &req,
        "voter_list",
        state.rate_limiter.public_page_limit(),
        state.rate_limiter.trusted_api_limit(),
        trust,
    ) {
        return Ok(resp);
    }

    let selected = select_scope_param(
        &query.voter_area,
        &query.union,
        &query.upazila,
        &query.district,
        &query.category,
    );
    let scope = match resolve_scope_filter(&state, selected) {
        Ok(scope) => scope,
        Err(e) => return Ok(error_response(&e)),
    };

    // The extra-data filter exposes raw source columns, trusted callers only
    let extra = if trust == CallerTrust::Trusted {
        match (non_empty(&query.json_field), non_empty(&query.json_value)) {
            (Some(field), Some(value)) => Some((field, value)),
            _ => None,
        }
    } else {
        None
    };

    let filter = VoterFilter {
        search: non_empty(&query.search),
        name: non_empty(&query.name),
        father: non_empty(&query.father),
        mother: non_empty(&query.mother),
        voter_no: non_empty(&query.voter_no),
        serial: non_empty(&query.serial),
        address: non_empty(&query.address),
        profession: non_empty(&query.profession),
        scope,
        gender: parse_gender_filter(&query.gender),
        status: parse_status_filter(&query.status),
        extra,
    };

    match state
        .search_engine
        .filter_voters(&filter, query.page.unwrap_or(1))
    {
        Ok(page) => Ok(HttpResponse::Ok().json(page)),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn voter_detail_handler(
    state: web::Data<crate::AppState>,
    req: HttpRequest,
    path: web::Path<VoterId>,
) -> ActixResult<HttpResponse> {
    let trust = caller_trust(&req, &state);
    if let Err(resp) = enforce_rate_limit(
        &state,
        &req,
        "voter_detail",
        state.rate_limiter.public_api_limit(),
        state.rate_limiter.trusted_api_limit(),
        trust,
    ) {
        return Ok(resp);
    }

    let voter_id = path.into_inner();
    let voter = match state.store.get_voter(&voter_id) {
        Ok(Some(voter)) => voter,
        Ok(None) => return Ok(error_response(&RegistryError::not_found("voter", voter_id))),
        Err(e) => return Ok(error_response(&e)),
    };

    let category_path = match state.store.get_category(&voter.category_id) {
        Ok(Some(node)) => node.full_path,
        Ok(None) => String::new(),
        Err(e) => return Ok(error_response(&e)),
    };

    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    Ok(HttpResponse::Ok().json(json!({
        "id": voter.id,
        "serial": field(&voter.serial),
        "name": field(&voter.name),
        "voter_no": field(&voter.voter_no),
        "father": field(&voter.father),
        "mother": field(&voter.mother),
        "gender": voter.gender.as_str(),
        "status": voter.status.as_str(),
        "dob": field(&voter.dob),
        "address": field(&voter.address),
        "category": if category_path.is_empty() { "-".to_string() } else { category_path },
    })))
}

async fn status_update_handler(
    state: web::Data<crate::AppState>,
    req: HttpRequest,
    path: web::Path<VoterId>,
    body: web::Json<StatusUpdateBody>,
) -> ActixResult<HttpResponse> {
    let trust = caller_trust(&req, &state);
    if trust != CallerTrust::Trusted {
        return Ok(unauthorized_response());
    }
    if let Err(resp) = enforce_rate_limit(
        &state,
        &req,
        "status_update",
        state.rate_limiter.trusted_api_limit(),
        state.rate_limiter.trusted_api_limit(),
        trust,
    ) {
        return Ok(resp);
    }

    let new_status: VoterStatus = match body.status.trim().parse() {
        Ok(status) => status,
        Err(e) => return Ok(error_response(&e)),
    };

    let actor = req
        .headers()
        .get("X-Actor")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let client_ip = Some(request_client(&req)).filter(|c| c != crate::rate_limit::UNKNOWN_CLIENT);

    match state.audit_trail.record_transition(
        path.into_inner(),
        actor,
        new_status,
        body.remarks.clone(),
        client_ip,
    ) {
        Ok(crate::audit::TransitionOutcome::Changed(entry)) => {
            Ok(HttpResponse::Ok().json(json!({
                "outcome": "changed",
                "old_status": entry.old_status.as_str(),
                "new_status": entry.new_status.as_str(),
            })))
        }
        Ok(crate::audit::TransitionOutcome::Unchanged) => Ok(HttpResponse::Ok().json(json!({
            "outcome": "unchanged",
            "status": new_status.as_str(),
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn audit_handler(
    state: web::Data<crate::AppState>,
    req: HttpRequest,
    query: web::Query<AuditQueryParams>,
) -> ActixResult<HttpResponse> {
    let trust = caller_trust(&req, &state);
    if trust != CallerTrust::Trusted {
        return Ok(unauthorized_response());
    }
    if let Err(resp) = enforce_rate_limit(
        &state,
        &req,
        "audit",
        state.rate_limiter.trusted_api_limit(),
        state.rate_limiter.trusted_api_limit(),
        trust,
    ) {
        return Ok(resp);
    }

    let parse_date = |raw: &Option<String>| -> Option<NaiveDate> {
        non_empty(raw).and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
    };

    let filter = AuditFilter {
        actor: non_empty(&query.actor),
        status: parse_status_filter(&query.status),
        search: non_empty(&query.search),
        date_from: parse_date(&query.date_from),
        date_to: parse_date(&query.date_to),
    };

    match state.audit_trail.entries(&filter, query.page.unwrap_or(1)) {
        Ok(page) => Ok(HttpResponse::Ok().json(page)),
        Err(e) => Ok(error_response(&e)),
    }
}
