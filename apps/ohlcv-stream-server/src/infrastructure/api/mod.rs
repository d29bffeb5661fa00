//! HTTP and WebSocket API
//!
//! # Endpoints
//!
//! - `GET /` - Welcome message
//! - `GET /fetch_data` - One-shot historical bars
//! - `GET /ws` - Upgrade to the streaming channel

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::application::services::{
    HistoryError, HistoryRequest, HistoryResponse, HistoryService, StreamHub,
};
use crate::infrastructure::ws::{SessionConfig, run_session};

// =============================================================================
// State
// =============================================================================

/// Shared state for the API handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    /// Streaming hub.
    pub hub: Arc<StreamHub>,
    /// Historical fetch service.
    pub history: Arc<HistoryService>,
    /// Settings for each streaming session.
    pub session: SessionConfig,
}

/// Create the API router.
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(welcome))
        .route("/fetch_data", get(fetch_data))
        .route("/ws", get(stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Serialize)]
struct WelcomeResponse {
    message: &'static str,
}

async fn welcome() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the Stock Data API",
    })
}

/// Raw `/fetch_data` query. Every field is a string so that bad values get
/// the service's own error messages.
#[derive(Debug, Default, Deserialize)]
struct FetchDataParams {
    symbol: Option<String>,
    exchange: Option<String>,
    interval: Option<String>,
    n_bars: Option<String>,
    fut_contract: Option<String>,
}

async fn fetch_data(
    State(state): State<ApiState>,
    Query(params): Query<FetchDataParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let request = HistoryRequest::parse(
        params.symbol.as_deref(),
        params.exchange.as_deref(),
        params.interval.as_deref(),
        params.n_bars.as_deref(),
        params.fut_contract.as_deref(),
    )?;

    Ok(Json(state.history.fetch(&request).await?))
}

async fn stream(State(state): State<ApiState>, ws: WebSocketUpgrade) -> Response {
    let ApiState { hub, session, .. } = state;
    ws.on_upgrade(move |socket| run_session(socket, hub, session))
}

// =============================================================================
// Errors
// =============================================================================

/// JSON error body: `{"code": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError(HistoryError);

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.0 {
            HistoryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            HistoryError::NotFound { .. } => StatusCode::NOT_FOUND,
            HistoryError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Code carried in the body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self.0 {
            HistoryError::InvalidRequest(_) => "INVALID_REQUEST",
            HistoryError::NotFound { .. } => "NOT_FOUND",
            HistoryError::Upstream(_) => "UPSTREAM_UNAVAILABLE",
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(error: HistoryError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.0.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

// =============================================================================
// Server
// =============================================================================

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// HTTP server for the API router.
pub struct ApiServer {
    port: u16,
    state: ApiState,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: ApiState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server fails while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` if the server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;
        tracing::info!(%addr, "API server listening");

        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{FetchError, InMemoryBarSource};
    use crate::application::services::{BarFetcher, HubConfig};
    use crate::domain::streaming::Bar;

    fn bar(minute: u32, close: rust_decimal::Decimal) -> Bar {
        Bar {
            datetime: Utc.with_ymd_and_hms(2024, 1, 2, 9, minute, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(10),
        }
    }

    fn app(source: Arc<InMemoryBarSource>) -> Router {
        let fetcher = Arc::new(BarFetcher::new(source, Duration::from_secs(1)));
        let hub = StreamHub::new(Arc::clone(&fetcher), HubConfig::default(), CancellationToken::new());
        create_router(ApiState {
            hub,
            history: Arc::new(HistoryService::new(fetcher)),
            session: SessionConfig::default(),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn welcome_message() {
        let (status, json) = get_json(app(Arc::new(InMemoryBarSource::new(vec![]))), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Welcome to the Stock Data API");
    }

    #[tokio::test]
    async fn fetch_data_returns_bars() {
        let source = Arc::new(InMemoryBarSource::new(vec![bar(1, dec!(101.456)), bar(0, dec!(100))]));
        let (status, json) = get_json(
            app(Arc::clone(&source)),
            "/fetch_data?symbol=AAPL&exchange=NASDAQ&interval=in_1_minute&n_bars=2",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["symbol"], "AAPL");
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["Close"], 100.0);
        assert_eq!(data[1]["Close"], 101.46);
        assert_eq!(source.requests()[0].n_bars, 2);
    }

    #[tokio::test]
    async fn invalid_interval_is_bad_request() {
        let (status, json) = get_json(
            app(Arc::new(InMemoryBarSource::new(vec![]))),
            "/fetch_data?symbol=AAPL&exchange=NASDAQ&interval=in_2_minute",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_REQUEST");
        assert_eq!(json["message"], "Invalid 'interval' value: in_2_minute");
    }

    #[tokio::test]
    async fn empty_result_is_not_found() {
        let (status, json) = get_json(
            app(Arc::new(InMemoryBarSource::new(vec![]))),
            "/fetch_data?symbol=NOPE&exchange=NASDAQ",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "No data found for symbol NOPE on exchange NASDAQ");
    }

    #[tokio::test]
    async fn upstream_failure_is_server_error() {
        let source = Arc::new(InMemoryBarSource::new(vec![]));
        source.push_response(Err(FetchError::Unavailable("connection refused".into())));
        let (status, json) =
            get_json(app(source), "/fetch_data?symbol=AAPL&exchange=NASDAQ").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "UPSTREAM_UNAVAILABLE");
        assert!(json["message"].as_str().unwrap().starts_with("Error: "));
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let response = app(Arc::new(InMemoryBarSource::new(vec![])))
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("origin", "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }
}
