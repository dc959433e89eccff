//! HTTP surface of the proxy: routes, shared state and request logging.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, DefaultBodyLimit, Multipart, Request, State,
        multipart::MultipartRejection,
    },
    http::{Method, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::{
    config::ProxyConfig,
    error::{ErrorBody, ProxyError},
    recognition::{MAX_IMAGE_BYTES, RecognitionClient, RecognitionError, RecognitionRequest},
    token::TokenCache,
};

/// Name reported by the health check.
pub const SERVICE_NAME: &str = "FatSecret API Proxy Server";

/// Room left in the request body limit for multipart framing and text fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// State shared by every handler.
pub struct AppState {
    pub tokens: TokenCache,
    pub recognizer: RecognitionClient,
}

impl AppState {
    /// Wires the token cache and recognition client from the configuration.
    pub fn from_config(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            tokens: TokenCache::new(
                http.clone(),
                config.credentials,
                config.token_url,
                config.scope,
            ),
            recognizer: RecognitionClient::new(http, config.recognition_url)
                .with_timeout(config.upstream_timeout),
        })
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub service: &'static str,
}

/// Body of `GET /api/token-status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatusResponse {
    pub has_token: bool,
    pub expires_in: String,
    pub expiry_time: String,
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/recognize-food",
            post(recognize_food)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
        .route("/api/token-status", get(token_status))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        service: SERVICE_NAME,
    })
}

async fn recognize_food(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ProxyError> {
    // a body that is not multipart/form-data carries no image
    let mut multipart = multipart.map_err(|rejection| {
        log::debug!("Rejected upload body: {rejection}");
        ProxyError::MissingImage
    })?;

    let mut image = None;
    let mut file_name = None;
    let mut region = None;
    let mut language = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                file_name = field.file_name().map(str::to_owned);
                image = Some(field.bytes().await?);
            }
            Some("region") => region = Some(field.text().await?),
            Some("language") => language = Some(field.text().await?),
            _ => {}
        }
    }

    let image = image.filter(|bytes| !bytes.is_empty()).ok_or(ProxyError::MissingImage)?;
    if image.len() > MAX_IMAGE_BYTES {
        return Err(ProxyError::ImageTooLarge {
            limit: MAX_IMAGE_BYTES,
        });
    }

    log::info!(
        "Processing image: {} ({} bytes)",
        file_name.as_deref().unwrap_or("<unnamed>"),
        image.len()
    );

    let request = RecognitionRequest::new(image, region, language);
    let token = state.tokens.get_token().await?;

    match state.recognizer.recognize(&token.access_token, &request).await {
        Ok(body) => {
            log::info!("FatSecret response OK");
            Ok(Json(body))
        }
        Err(err) => {
            log::error!("Error processing image recognition: {err}");
            if matches!(
                &err,
                RecognitionError::Upstream { status, .. } if *status == StatusCode::UNAUTHORIZED
            ) {
                state.tokens.clear_token();
            }
            Err(err.into())
        }
    }
}

async fn token_status(State(state): State<Arc<AppState>>) -> Response {
    match state.tokens.get_token().await {
        Ok(token) => {
            let remaining = token.remaining_at(state.tokens.now());
            Json(TokenStatusResponse {
                has_token: !token.access_token.is_empty(),
                expires_in: format!("{} seconds", remaining.num_seconds()),
                expiry_time: token.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            })
            .into_response()
        }
        Err(err) => {
            log::error!("Failed to check token status: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(
                    "Failed to check token status",
                    ProxyError::from(err).to_string(),
                )),
            )
                .into_response()
        }
    }
}

async fn not_found(method: Method, uri: Uri) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new(
            "Not Found",
            format!("Route {method} {} not found", uri.path()),
        )),
    )
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_owned();

    log::info!("{method} {uri} from {ip} ({user_agent})");
    let response = next.run(req).await;
    log::info!("{method} {uri} -> {}", response.status());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::ManualClock;
    use axum::body::Body;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BOUNDARY: &str = "proxy-test-boundary";

    fn config_for(server: &MockServer) -> ProxyConfig {
        let uri = server.uri();
        ProxyConfig::from_lookup(move |name| match name {
            "FATSECRET_CLIENT_ID" => Some("test-id".to_string()),
            "FATSECRET_CLIENT_SECRET" => Some("test-secret".to_string()),
            "FATSECRET_TOKEN_URL" => Some(format!("{uri}/connect/token")),
            "FATSECRET_RECOGNITION_URL" => Some(format!("{uri}/rest/image-recognition/v2")),
            _ => None,
        })
        .unwrap()
    }

    fn state_for(server: &MockServer) -> Arc<AppState> {
        Arc::new(AppState::from_config(config_for(server)).unwrap())
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 86400,
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    /// Encodes `(name, file name, content)` triples as multipart/form-data.
    fn multipart_request(fields: &[(&str, Option<&str>, &str)]) -> Request {
        let mut body = Vec::new();
        for (name, file_name, content) in fields {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        axum::http::Request::builder()
            .method("POST")
            .uri("/api/recognize-food")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_ok() {
        let server = MockServer::start().await;
        let response = router(state_for(&server))
            .oneshot(get_request("/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_NAME);
        assert!(body["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_unknown_route_404() {
        let server = MockServer::start().await;
        let response = router(state_for(&server))
            .oneshot(get_request("/nope"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Not Found", "message": "Route GET /nope not found" })
        );
    }

    #[tokio::test]
    async fn test_missing_image_400_without_fetch() {
        let server = MockServer::start().await;
        mount_token(&server, 0).await;

        let response = router(state_for(&server))
            .oneshot(multipart_request(&[("region", None, "US")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No image file provided");
        assert_eq!(body["message"], "Please upload an image file");
    }

    #[tokio::test]
    async fn test_bare_post_is_missing_image() {
        let server = MockServer::start().await;
        mount_token(&server, 0).await;

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/recognize-food")
            .body(Body::empty())
            .unwrap();
        let response = router(state_for(&server)).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({
                "error": "No image file provided",
                "message": "Please upload an image file",
            })
        );
    }

    #[tokio::test]
    async fn test_recognition_forwarded_verbatim() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        let upstream = json!({ "food_response": [{ "food_id": 33691, "food_entry_name": "apple" }] });
        Mock::given(method("POST"))
            .and(path("/rest/image-recognition/v2"))
            .and(header_eq("authorization", "Bearer tok"))
            .and(body_partial_json(json!({
                "image_b64": "anBlZw==",
                "include_food_data": true,
                "region": "GB",
                "language": "en",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(upstream.clone()))
            .expect(2)
            .mount(&server)
            .await;

        let app = router(state_for(&server));
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(multipart_request(&[
                    ("image", Some("apple.jpg"), "jpeg"),
                    ("region", None, "GB"),
                ]))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await, upstream);
        }
    }

    #[tokio::test]
    async fn test_upstream_error_passthrough() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/rest/image-recognition/v2"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 108, "message": "Invalid image" }
            })))
            .mount(&server)
            .await;

        let response = router(state_for(&server))
            .oneshot(multipart_request(&[("image", Some("x.jpg"), "jpeg")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "FatSecret API Error");
        assert_eq!(body["message"], "Invalid image");
        assert_eq!(body["details"]["error"]["code"], 108);
    }

    #[tokio::test]
    async fn test_upstream_unauthorized_clears_token() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/rest/image-recognition/v2"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "code": 13, "message": "Invalid token" }
            })))
            .mount(&server)
            .await;

        let state = state_for(&server);
        let response = router(state.clone())
            .oneshot(multipart_request(&[("image", Some("x.jpg"), "jpeg")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.tokens.cached().is_none());
    }

    #[tokio::test]
    async fn test_upstream_timeout_504() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/rest/image-recognition/v2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.upstream_timeout = Duration::from_millis(100);
        let state = Arc::new(AppState::from_config(config).unwrap());

        let response = router(state)
            .oneshot(multipart_request(&[("image", Some("x.jpg"), "jpeg")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Request Timeout", "message": "Image processing took too long" })
        );
    }

    #[tokio::test]
    async fn test_token_failure_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let response = router(state_for(&server))
            .oneshot(multipart_request(&[("image", Some("x.jpg"), "jpeg")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({
                "error": "Internal Server Error",
                "message": "Failed to authenticate with FatSecret API",
            })
        );
    }

    #[tokio::test]
    async fn test_token_status_counts_down() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        let clock = ManualClock::new();
        let mut state = AppState::from_config(config_for(&server)).unwrap();
        state.tokens = state.tokens.with_clock(clock.clone());
        let app = router(Arc::new(state));

        let first = json_body(app.clone().oneshot(get_request("/api/token-status")).await.unwrap()).await;
        assert_eq!(first["hasToken"], true);
        assert_eq!(first["expiresIn"], "86340 seconds");
        assert!(first["expiryTime"].as_str().is_some());

        clock.advance(40);
        let second = json_body(app.oneshot(get_request("/api/token-status")).await.unwrap()).await;
        assert_eq!(second["expiresIn"], "86300 seconds");
        assert_eq!(first["expiryTime"], second["expiryTime"]);
    }

    #[tokio::test]
    async fn test_token_status_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let response = router(state_for(&server))
            .oneshot(get_request("/api/token-status"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Failed to check token status");
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed() {
        let server = MockServer::start().await;
        let request = axum::http::Request::builder()
            .method("OPTIONS")
            .uri("/api/recognize-food")
            .header(header::ORIGIN, "http://localhost:8081")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = router(state_for(&server)).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
