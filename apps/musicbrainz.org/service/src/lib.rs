use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::{Form, Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub mod catalyst;
pub mod config;
pub mod cookies;
pub mod post_parameters;
pub mod web_maud;

use crate::catalyst::{CoreEntityType, SanitizedCatalystContext, SanitizedStash, SourceEntity};
use crate::config::Config;
use crate::cookies::{CookieSetter, CookieStrategy, DocumentCookies, FallbackCookies};
use crate::post_parameters::{PostParameters, PostParametersInspector};
use crate::web_maud::{RenderError, WebBody, WebPage, render_notice_fragment, render_page};

const SERVICE_NAME: &str = "musicbrainz-web-service";
const LANGUAGE_COOKIE_NAME: &str = "lang";
const RETURN_TO_PARAM: &str = "return_to";
const CACHE_NO_STORE: &str = "no-store";
const MAX_LANGUAGE_TAG_LEN: usize = 16;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    cookie_strategy: CookieStrategy,
    fallback_cookies: FallbackCookies,
    started_at: SystemTime,
}

#[derive(Debug, Error)]
enum WebError {
    #[error("'{0}' is not a valid MusicBrainz identifier.")]
    InvalidMbid(String),
    #[error("'{0}' is not a supported language.")]
    InvalidLanguage(String),
    #[error("The page could not be rendered.")]
    Render(#[from] RenderError),
    #[error("Failed to build response headers.")]
    Header,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidMbid(_) | Self::InvalidLanguage(_) => StatusCode::BAD_REQUEST,
            Self::Render(error) => {
                tracing::error!(error = %error, "page render failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Header => StatusCode::INTERNAL_SERVER_ERROR,
        };
        html_response(render_notice_fragment(&self.to_string()), status)
    }
}

#[derive(Debug, Deserialize)]
struct ReturnToQuery {
    return_to: Option<String>,
}

pub fn build_router(config: Config) -> Router {
    build_router_with_fallback_cookies(config, FallbackCookies::default())
}

/// Builds the router around an existing fallback cookie store, so values kept
/// in-process survive router rebuilds and can be inspected by the caller.
pub fn build_router_with_fallback_cookies(
    config: Config,
    fallback_cookies: FallbackCookies,
) -> Router {
    let cookie_strategy = CookieStrategy::select(&config.cookie_environment());
    tracing::info!(
        strategy = cookie_strategy.as_str(),
        public_origin = %config.public_origin,
        "cookie strategy selected"
    );
    let state = AppState {
        config: Arc::new(config),
        cookie_strategy,
        fallback_cookies,
        started_at: SystemTime::now(),
    };

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/url/:gid", get(url_not_found))
        .route("/resubmit", post(resubmit))
        .route("/set-language/:lang", post(set_language))
        .fallback(page_not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_seconds = state
        .started_at
        .elapsed()
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "cookie_strategy": state.cookie_strategy.as_str(),
        "uptime_seconds": uptime_seconds,
    }))
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, WebError> {
    let page = WebPage {
        title: "Welcome".to_string(),
        context: page_context(&state, &headers, "/", None),
        body: WebBody::Index,
    };
    Ok(html_response(render_page(&page)?, StatusCode::OK))
}

async fn url_not_found(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(gid): Path<String>,
) -> Result<Response, WebError> {
    if Uuid::parse_str(&gid).is_err() {
        return Err(WebError::InvalidMbid(gid));
    }

    let page = WebPage {
        title: "URL Not Found".to_string(),
        context: page_context(
            &state,
            &headers,
            &format!("/url/{gid}"),
            Some(SourceEntity::type_only(CoreEntityType::Url)),
        ),
        body: WebBody::NotFound {
            heading: "URL Not Found".to_string(),
            message: "Sorry, we could not find a URL with that MusicBrainz ID.".to_string(),
        },
    };
    Ok(html_response(render_page(&page)?, StatusCode::NOT_FOUND))
}

async fn page_not_found(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: axum::http::Uri,
) -> Result<Response, WebError> {
    let page = WebPage {
        title: "Page Not Found".to_string(),
        context: page_context(&state, &headers, uri.path(), None),
        body: WebBody::NotFound {
            heading: "Page Not Found".to_string(),
            message: "Sorry, the page you're looking for does not exist.".to_string(),
        },
    };
    Ok(html_response(render_page(&page)?, StatusCode::NOT_FOUND))
}

async fn resubmit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, WebError> {
    let params = PostParameters::new(params);
    let action = params
        .get(RETURN_TO_PARAM)
        .and_then(safe_return_path)
        .unwrap_or("/")
        .to_string();
    tracing::info!(
        parameter_count = params.len(),
        action = %action,
        "rendering form resubmission"
    );

    let page = WebPage {
        title: "Resubmit form".to_string(),
        context: page_context(&state, &headers, "/resubmit", None),
        body: WebBody::Resubmit {
            action,
            inspector: PostParametersInspector::new(params),
        },
    };
    Ok(html_response(render_page(&page)?, StatusCode::OK))
}

async fn set_language(
    State(state): State<AppState>,
    Path(lang): Path<String>,
    Query(query): Query<ReturnToQuery>,
) -> Result<Response, WebError> {
    if !is_language_tag(&lang) {
        return Err(WebError::InvalidLanguage(lang));
    }

    let mut cookies = CookieSetter::new(state.cookie_strategy, state.fallback_cookies.clone());
    cookies.set_cookie(LANGUAGE_COOKIE_NAME, &lang);
    tracing::info!(
        language = %lang,
        strategy = cookies.strategy().as_str(),
        "language preference stored"
    );

    let location = query
        .return_to
        .as_deref()
        .and_then(safe_return_path)
        .unwrap_or("/");
    let mut response = Redirect::to(location).into_response();
    append_document_cookies(&mut response, &cookies.into_document())?;
    Ok(response)
}

fn page_context(
    state: &AppState,
    headers: &HeaderMap,
    relative_uri: &str,
    source_entity: Option<SourceEntity>,
) -> SanitizedCatalystContext {
    SanitizedCatalystContext {
        relative_uri: relative_uri.to_string(),
        stash: SanitizedStash {
            current_language: current_language(state, headers),
            source_entity,
            ..SanitizedStash::default()
        },
        ..SanitizedCatalystContext::default()
    }
}

fn current_language(state: &AppState, headers: &HeaderMap) -> String {
    extract_cookie_value(headers, LANGUAGE_COOKIE_NAME)
        .filter(|lang| is_language_tag(lang))
        .or_else(|| state.fallback_cookies.get(LANGUAGE_COOKIE_NAME))
        .unwrap_or_else(|| state.config.default_language.clone())
}

fn is_language_tag(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LANGUAGE_TAG_LEN
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
}

/// Only same-site absolute paths are followed; `//host` is protocol-relative.
fn safe_return_path(value: &str) -> Option<&str> {
    let value = value.trim();
    (value.starts_with('/') && !value.starts_with("//") && !value.contains('\\')).then_some(value)
}

fn html_response(body: String, status: StatusCode) -> Response {
    (
        status,
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, CACHE_NO_STORE),
        ],
        body,
    )
        .into_response()
}

fn append_document_cookies(
    response: &mut Response,
    document: &DocumentCookies,
) -> Result<(), WebError> {
    for cookie in document.serialized() {
        let value = HeaderValue::from_str(cookie).map_err(|_| WebError::Header)?;
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(())
}

fn extract_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        if key.trim() == cookie_name {
            let value = value.trim();
            return (!value.is_empty()).then(|| value.to_string());
        }
    }

    None
}
