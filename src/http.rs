//! HTTP adapter.
//!
//! `locale_middleware` negotiates the locale of every request, stores the
//! resulting [`RequestState`] in the request extensions for handlers, and
//! writes the persistence cookie when negotiation asks for it.

use crate::i18n::{LocaleRegistry, LocaleRequest, NegotiationSettings, Negotiator, ResolutionMetrics};
use crate::state::{ExecutionContext, RequestState};
use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::collections::HashMap;
use std::sync::Arc;
use time::Duration;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Paths under this prefix run in the admin context.
const ADMIN_PREFIX: &str = "/admin";

/// Shared state for the locale middleware.
#[derive(Clone)]
pub struct LocaleLayerState {
    pub registry: Arc<LocaleRegistry>,
    pub settings: Arc<NegotiationSettings>,
}

impl LocaleLayerState {
    pub fn new(registry: Arc<LocaleRegistry>, settings: NegotiationSettings) -> Self {
        Self {
            registry,
            settings: Arc::new(settings),
        }
    }
}

/// Execution context for a request path.
pub fn context_for_path(path: &str) -> ExecutionContext {
    let is_admin = path == ADMIN_PREFIX
        || path
            .strip_prefix(ADMIN_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'));
    if is_admin {
        ExecutionContext::Admin
    } else {
        ExecutionContext::Frontend
    }
}

/// Negotiate the request locale and expose it to handlers.
pub async fn locale_middleware(
    State(state): State<LocaleLayerState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let context = context_for_path(request.uri().path());
    let locale_request = locale_request(&state.settings, &jar, &request);

    let resolution = Negotiator::new(&state.registry, &state.settings).resolve(&locale_request, context);
    let persist = resolution.persist.clone();
    debug!(
        path = %request.uri().path(),
        locale = ?resolution.locale,
        source = ?resolution.source,
        "Locale negotiated"
    );

    request.extensions_mut().insert(resolution.into_state(context));
    let response = next.run(request).await;

    match persist {
        Some(persist) => {
            let cookie = Cookie::build((persist.key, persist.value))
                .path("/")
                .same_site(SameSite::Lax)
                .max_age(Duration::days(i64::from(state.settings.cookie_days)));
            (jar.add(cookie), response).into_response()
        }
        None => response,
    }
}

/// Collect the negotiation inputs from a request.
fn locale_request(settings: &NegotiationSettings, jar: &CookieJar, request: &Request) -> LocaleRequest {
    let headers = request.headers();
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let cookie = |key: &Option<String>| {
        key.as_deref()
            .and_then(|key| jar.get(key))
            .map(|cookie| cookie.value().to_string())
    };

    let param = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(params)| params.get(&settings.query_param).cloned());

    LocaleRequest {
        param,
        persisted_frontend: cookie(&settings.frontend_key),
        persisted_admin: cookie(&settings.admin_key),
        accept_language: header_value(header::ACCEPT_LANGUAGE.as_str()),
        geo_country: settings.geo_header.as_deref().and_then(header_value),
        host: header_value(header::HOST.as_str()),
    }
}

async fn current_locale(Extension(state): Extension<RequestState>) -> Json<RequestState> {
    Json(state)
}

async fn health() -> impl IntoResponse {
    "OK"
}

async fn metrics() -> impl IntoResponse {
    Json(ResolutionMetrics::global().report())
}

/// Router exposing the negotiated state.
pub fn router(state: LocaleLayerState) -> Router {
    Router::new()
        .route("/locale", get(current_locale))
        .route("/admin/locale", get(current_locale))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(from_fn_with_state(state, locale_middleware))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::Locale;
    use axum::body::Body;
    use axum::http::StatusCode;
    use serial_test::serial;
    use tower::ServiceExt;

    fn layer_state(settings: NegotiationSettings) -> LocaleLayerState {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("en_US", "English").with_default(true),
                Locale::new("fr_CA", "French (Canada)"),
                Locale::new("de_DE", "German"),
            ],
            Vec::new(),
        );
        LocaleLayerState::new(Arc::new(registry), settings)
    }

    async fn get_json(app: Router, request: axum::http::Request<Body>) -> (Response, serde_json::Value) {
        let response = app.oneshot(request).await.expect("response");
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).expect("json");
        (Response::from_parts(parts, Body::empty()), json)
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect()
    }

    // ==================== Context Tests ====================

    #[test]
    fn test_context_for_path() {
        assert_eq!(context_for_path("/admin"), ExecutionContext::Admin);
        assert_eq!(context_for_path("/admin/locale"), ExecutionContext::Admin);
        assert_eq!(context_for_path("/administrator"), ExecutionContext::Frontend);
        assert_eq!(context_for_path("/locale"), ExecutionContext::Frontend);
    }

    // ==================== Middleware Tests ====================

    #[tokio::test]
    #[serial]
    async fn test_query_parameter_sets_locale_and_cookie() {
        let app = router(layer_state(NegotiationSettings::default()));
        let request = axum::http::Request::builder()
            .uri("/locale?l=fr_CA")
            .body(Body::empty())
            .expect("request");

        let (response, json) = get_json(app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json["locale"], "fr_CA");
        assert_eq!(json["context"], "frontend");
        assert_eq!(json["stage"], "live");

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1);
        let attributes: Vec<&str> = cookies[0].split(';').map(str::trim).collect();
        assert_eq!(attributes[0], "locale=fr_CA");
        assert!(attributes.contains(&"Path=/"));
        assert!(attributes.contains(&"SameSite=Lax"));
        assert!(attributes.contains(&"Max-Age=7776000"));
    }

    #[tokio::test]
    #[serial]
    async fn test_cookie_lifetime_follows_settings() {
        let settings = NegotiationSettings {
            cookie_days: 1,
            ..NegotiationSettings::default()
        };
        let request = axum::http::Request::builder()
            .uri("/admin/locale?l=de_DE")
            .body(Body::empty())
            .expect("request");

        let (response, json) = get_json(router(layer_state(settings)), request).await;
        assert_eq!(json["locale"], "de_DE");

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("admin_locale=de_DE;"));
        assert!(cookies[0].contains("Max-Age=86400"));
    }

    #[tokio::test]
    #[serial]
    async fn test_persisted_cookie_is_not_rewritten() {
        let app = router(layer_state(NegotiationSettings::default()));
        let request = axum::http::Request::builder()
            .uri("/locale")
            .header(header::COOKIE, "locale=de_DE")
            .body(Body::empty())
            .expect("request");

        let (response, json) = get_json(app, request).await;
        assert_eq!(json["locale"], "de_DE");
        assert!(set_cookies(&response).is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_admin_path_uses_admin_key() {
        let app = router(layer_state(NegotiationSettings::default()));
        let request = axum::http::Request::builder()
            .uri("/admin/locale")
            .header(header::COOKIE, "locale=de_DE; admin_locale=fr_CA")
            .body(Body::empty())
            .expect("request");

        let (_, json) = get_json(app, request).await;
        assert_eq!(json["locale"], "fr_CA");
        assert_eq!(json["context"], "admin");
        assert_eq!(json["stage"], "draft");
    }

    #[tokio::test]
    #[serial]
    async fn test_browser_detection_toggle() {
        let request = || {
            axum::http::Request::builder()
                .uri("/locale")
                .header(header::ACCEPT_LANGUAGE, "de-DE,de;q=0.9")
                .body(Body::empty())
                .expect("request")
        };

        let (_, json) = get_json(router(layer_state(NegotiationSettings::default())), request()).await;
        assert_eq!(json["locale"], "en_US");

        let settings = NegotiationSettings {
            detect_locale: true,
            ..NegotiationSettings::default()
        };
        let (_, json) = get_json(router(layer_state(settings)), request()).await;
        assert_eq!(json["locale"], "de_DE");
    }

    #[tokio::test]
    #[serial]
    async fn test_health_endpoint() {
        let app = router(layer_state(NegotiationSettings::default()));
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");

        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"OK");
    }
}
