//! HTTP surface: `/app-store-server/v1` and `/app-store-server/v2` over a [`CatalogApi`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use appshelf_api::{split_list, top_size, CatalogApi, Chart, ChartQuery, ListQuery, Paging, ShelfError, TopQuery};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const V1_ROOT: &str = "/app-store-server/v1";
pub const V2_ROOT: &str = "/app-store-server/v2";

#[derive(Clone)]
pub struct HttpState {
    pub api: Arc<dyn CatalogApi>,
}

/// Successful response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: &'static str,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> { Json(Envelope { code: 0, message: "success", data }) }

#[derive(Debug)]
pub struct ApiError(ShelfError);

impl From<ShelfError> for ApiError {
    fn from(e: ShelfError) -> Self { ApiError(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            ShelfError::Validation(m) => (StatusCode::BAD_REQUEST, m),
            ShelfError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ShelfError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ShelfError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        if status.is_server_error() { warn!(status = status.as_u16(), error = %message, "http: request failed"); }
        (status, Json(json!({ "code": status.as_u16(), "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn hit(route: &'static str) { counter!("http_requests_total", 1u64, "route" => route); }

pub fn v1_router() -> Router<HttpState> {
    Router::new()
        .route("/applications", get(list))
        .route("/applications/types", get(types))
        .route("/applications/categories", get(categories))
        .route("/applications/top", get(top))
        .route("/applications/update", post(update))
        .route("/applications/infos", post(infos))
        .route("/applications/info/{name}", get(info))
        .route("/applications/exist/{name}", get(exist))
        .route("/applications/search/{name}", get(search))
        .route("/applications/{name}/README.md", get(readme))
        .route("/applications/{name}", get(chart))
        .route("/application/{name}", get(chart))
        .route("/counter/{name}", post(count))
}

pub fn v2_router() -> Router<HttpState> {
    Router::new()
        .route("/appstore/info", get(appstore_info))
        .route("/appstore/hash", get(appstore_hash))
        .route("/applications/{name}/chart", get(chart_v2))
}

pub fn router(api: Arc<dyn CatalogApi>) -> Router {
    Router::new().nest(V1_ROOT, v1_router()).nest(V2_ROOT, v2_router()).with_state(HttpState { api })
}

/// Serve until `cancel` fires; in-flight requests are allowed to finish.
pub async fn serve(addr: SocketAddr, app: Router, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await.with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "http: listening");
    axum::serve(listener, app).with_graceful_shutdown(async move { cancel.cancelled().await }).await.with_context(|| format!("serve {addr}"))
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    page: Option<String>,
    size: Option<String>,
    category: Option<String>,
    #[serde(rename = "type")]
    types: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TopParams {
    category: Option<String>,
    #[serde(rename = "type")]
    types: Option<String>,
    #[serde(rename = "excludedLabels")]
    excluded_labels: Option<String>,
    size: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionParams {
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    page: Option<String>,
    size: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartParams {
    version: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

async fn list(State(s): State<HttpState>, Query(p): Query<ListParams>) -> ApiResult<impl IntoResponse> {
    hit("list");
    let q = ListQuery {
        paging: Paging::parse(p.page.as_deref(), p.size.as_deref()),
        category: p.category,
        types: split_list(p.types.as_deref()),
        version: s.api.versions().normalize(p.version.as_deref()),
    };
    Ok(ok(s.api.list(q).await?))
}

async fn types(State(s): State<HttpState>) -> ApiResult<impl IntoResponse> {
    hit("types");
    Ok(ok(s.api.types().await?))
}

async fn categories(State(s): State<HttpState>) -> ApiResult<impl IntoResponse> {
    hit("categories");
    Ok(ok(s.api.categories().await?))
}

async fn top(State(s): State<HttpState>, Query(p): Query<TopParams>) -> ApiResult<impl IntoResponse> {
    hit("top");
    let q = TopQuery {
        category: p.category,
        types: split_list(p.types.as_deref()),
        excluded_labels: split_list(p.excluded_labels.as_deref()),
        size: top_size(p.size.as_deref()),
        version: s.api.versions().normalize(p.version.as_deref()),
    };
    Ok(ok(s.api.top(q).await?))
}

async fn update(State(s): State<HttpState>) -> ApiResult<impl IntoResponse> {
    hit("update");
    Ok(ok(s.api.update().await?))
}

async fn infos(State(s): State<HttpState>, Query(p): Query<VersionParams>, Json(names): Json<Vec<String>>) -> ApiResult<impl IntoResponse> {
    hit("infos");
    let version = s.api.versions().normalize(p.version.as_deref());
    Ok(ok(s.api.infos(names, &version).await?))
}

async fn info(State(s): State<HttpState>, Path(name): Path<String>, Query(p): Query<VersionParams>) -> ApiResult<impl IntoResponse> {
    hit("info");
    let version = s.api.versions().normalize(p.version.as_deref());
    Ok(ok(s.api.info(&name, &version).await?))
}

async fn exist(State(s): State<HttpState>, Path(name): Path<String>) -> ApiResult<impl IntoResponse> {
    hit("exist");
    let exist = s.api.exist(&name).await?;
    Ok(ok(json!({ "exist": exist })))
}

async fn search(State(s): State<HttpState>, Path(name): Path<String>, Query(p): Query<PageParams>) -> ApiResult<impl IntoResponse> {
    hit("search");
    Ok(ok(s.api.search(&name, Paging::parse(p.page.as_deref(), p.size.as_deref())).await?))
}

async fn readme(State(s): State<HttpState>, Path(name): Path<String>) -> ApiResult<Response> {
    hit("readme");
    let bytes = s.api.readme(&name).await?;
    Ok(([(header::CONTENT_TYPE, "text/markdown; charset=utf-8")], bytes).into_response())
}

async fn count(State(s): State<HttpState>, Path(name): Path<String>) -> ApiResult<impl IntoResponse> {
    hit("counter");
    let count = s.api.count(&name).await?;
    Ok(ok(json!({ "name": name, "count": count })))
}

fn chart_response(chart: Chart) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", chart.file_name);
    ([(header::CONTENT_TYPE, "application/octet-stream".to_string()), (header::CONTENT_DISPOSITION, disposition)], chart.bytes).into_response()
}

async fn chart(State(s): State<HttpState>, Path(name): Path<String>, Query(p): Query<ChartParams>) -> ApiResult<Response> {
    hit("chart");
    let version = s.api.versions().normalize(p.version.as_deref());
    Ok(chart_response(s.api.chart(ChartQuery { name, version, file_name: p.file_name }).await?))
}

async fn chart_v2(State(s): State<HttpState>, Path(name): Path<String>, Query(p): Query<ChartParams>) -> ApiResult<Response> {
    hit("chart_v2");
    let file_name = p.file_name.filter(|f| !f.trim().is_empty()).ok_or_else(|| ShelfError::Validation("fileName is required".into()))?;
    let version = s.api.versions().normalize(p.version.as_deref());
    Ok(chart_response(s.api.chart(ChartQuery { name, version, file_name: Some(file_name) }).await?))
}

async fn appstore_info(State(s): State<HttpState>, Query(p): Query<PageParams>) -> ApiResult<impl IntoResponse> {
    hit("appstore_info");
    let version = s.api.versions().normalize(p.version.as_deref());
    let info = s.api.appstore_info(Paging::parse(p.page.as_deref(), p.size.as_deref()), &version).await?;
    Ok(ok(json!({ "appstore": info })))
}

async fn appstore_hash(State(s): State<HttpState>, Query(p): Query<PageParams>) -> ApiResult<impl IntoResponse> {
    hit("appstore_hash");
    let version = s.api.versions().normalize(p.version.as_deref());
    Ok(ok(s.api.appstore_hash(Paging::parse(p.page.as_deref(), p.size.as_deref()), &version).await?))
}
