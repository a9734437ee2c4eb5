mod caption;
mod health;
mod root;

use crate::{Ctx, MAX_UPLOAD_BYTES};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Extra room for multipart boundaries and the small text fields, so the
/// 10 MB check is done by the handler and answered with its own message.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn get_routes(ctx: Ctx, cors_origins: Vec<HeaderValue>) -> Router {
    Router::new()
        .route("/", get(root::index))
        .route("/docs", get(root::docs))
        .route("/api/health", get(health::health_check))
        .route(
            "/api/caption",
            post(caption::generate_caption)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD)),
        )
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Credentials are allowed, so methods and headers are mirrored instead of `*`.
fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Invalid origins are logged and skipped. `*` is skipped as well, a
/// wildcard cannot be combined with credentials.
pub fn parse_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .filter(|o| {
            if *o == "*" {
                tracing::warn!("ignore wildcard cors origin, list the allowed origins instead");
                return false;
            }
            true
        })
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("ignore invalid cors origin {:?}: {}", o, e);
                None
            }
        })
        .collect()
}

#[test]
fn test_parse_origins() {
    let origins = parse_origins(&[
        "http://localhost:4200".to_string(),
        " ".to_string(),
        "bad\norigin".to_string(),
        " http://localhost:3000 ".to_string(),
    ]);
    assert_eq!(
        origins,
        vec![
            HeaderValue::from_static("http://localhost:4200"),
            HeaderValue::from_static("http://localhost:3000"),
        ]
    );
}

#[test]
fn test_wildcard_origin_is_skipped() {
    let origins = parse_origins(&["*".to_string(), "http://localhost:3000".to_string()]);
    assert_eq!(origins, vec![HeaderValue::from_static("http://localhost:3000")]);

    // building the layer must not panic
    let _ = cors_layer(origins);
    let _ = cors_layer(parse_origins(&[" * ".to_string()]));
}
