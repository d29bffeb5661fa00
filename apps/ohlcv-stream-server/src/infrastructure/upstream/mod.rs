//! HTTP Bar Source
//!
//! `BarSource` implementation backed by a REST historical bar API:
//! `GET {base_url}/history?symbol=..&exchange=..&interval=..&n_bars=..[&fut_contract=..]`.
//!
//! The body is either a bare JSON array of bars or an object with a `data`
//! array (the shape this server's own `/fetch_data` returns), so instances
//! can be chained.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::application::ports::{BarRequest, BarSource, FetchError};
use crate::domain::streaming::Bar;
use crate::infrastructure::config::UpstreamSettings;

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    Bars(Vec<Bar>),
    Wrapped { data: Vec<Bar> },
}

impl HistoryBody {
    fn into_bars(self) -> Vec<Bar> {
        match self {
            Self::Bars(bars) | Self::Wrapped { data: bars } => bars,
        }
    }
}

/// REST-backed bar source.
pub struct HttpBarSource {
    http_client: reqwest::Client,
    history_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpBarSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBarSource")
            .field("history_url", &self.history_url)
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpBarSource {
    /// Create a source from upstream settings.
    ///
    /// The HTTP client's own timeout matches the fetch timeout so abandoned
    /// requests do not linger.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(settings: &UpstreamSettings) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .user_agent(concat!("ohlcv-stream-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            history_url: format!("{}/history", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.as_ref().map(|key| key.expose().to_string()),
        })
    }
}

#[async_trait]
impl BarSource for HttpBarSource {
    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Bar>, FetchError> {
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", request.symbol.clone()),
            ("exchange", request.exchange.clone()),
            ("interval", request.interval.as_str().to_string()),
            ("n_bars", request.n_bars.to_string()),
        ];
        if let Some(contract) = request.fut_contract {
            query.push(("fut_contract", contract.to_string()));
        }

        let mut builder = self.http_client.get(&self.history_url).query(&query);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, request, body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;
        let bars = serde_json::from_slice::<HistoryBody>(&bytes)
            .map_err(|e| FetchError::Decode(e.to_string()))?
            .into_bars();

        debug!(
            symbol = %request.symbol,
            exchange = %request.exchange,
            interval = %request.interval,
            bars = bars.len(),
            "Upstream responded"
        );
        Ok(bars)
    }
}

fn classify_status(status: StatusCode, request: &BarRequest, body: String) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound {
            symbol: request.symbol.clone(),
            exchange: request.exchange.clone(),
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            FetchError::InvalidQuery(if body.is_empty() { status.to_string() } else { body })
        }
        other => FetchError::Unavailable(format!("upstream returned {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::streaming::Interval;
    use crate::infrastructure::config::ApiKey;

    fn settings(server: &MockServer, api_key: Option<&str>) -> UpstreamSettings {
        UpstreamSettings {
            base_url: server.uri(),
            api_key: api_key.map(|k| ApiKey::new(k.to_string())),
            fetch_timeout: Duration::from_secs(2),
        }
    }

    fn request() -> BarRequest {
        BarRequest {
            symbol: "AAPL".into(),
            exchange: "NASDAQ".into(),
            interval: Interval::Min5,
            n_bars: 2,
            fut_contract: None,
        }
    }

    #[tokio::test]
    async fn decodes_bare_array_with_query_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .and(query_param("symbol", "AAPL"))
            .and(query_param("interval", "in_5_minute"))
            .and(query_param("n_bars", "2"))
            .and(header("authorization", "Bearer k"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"[{"datetime":"2024-03-01T14:30:00Z","open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":100}]"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpBarSource::new(&settings(&server, Some("k"))).unwrap();
        let bars = source.fetch_bars(&request()).await.unwrap();

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, dec!(1.5));
    }

    #[tokio::test]
    async fn decodes_wrapped_body() {
        let server = MockServer::start().await;
        Mock::given(path("/history"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"symbol":"AAPL","data":[{"datetime":"2024-03-01T14:30:00Z","Open":1,"High":2,"Low":0.5,"Close":1.5,"Volume":100}]}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let source = HttpBarSource::new(&settings(&server, None)).unwrap();
        let bars = source.fetch_bars(&request()).await.unwrap();
        assert_eq!(bars[0].high, dec!(2));
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(query_param("symbol", "MISSING"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(query_param("symbol", "BAD"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad exchange"))
            .mount(&server)
            .await;
        Mock::given(query_param("symbol", "DOWN"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpBarSource::new(&settings(&server, None)).unwrap();
        let fetch = |symbol: &str| {
            let mut req = request();
            req.symbol = symbol.to_string();
            req
        };

        assert!(matches!(
            source.fetch_bars(&fetch("MISSING")).await,
            Err(FetchError::NotFound { .. })
        ));
        assert_eq!(
            source.fetch_bars(&fetch("BAD")).await,
            Err(FetchError::InvalidQuery("bad exchange".into()))
        );
        assert!(matches!(
            source.fetch_bars(&fetch("DOWN")).await,
            Err(FetchError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(path("/history"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let source = HttpBarSource::new(&settings(&server, None)).unwrap();
        assert!(matches!(
            source.fetch_bars(&request()).await,
            Err(FetchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn passes_futures_contract() {
        let server = MockServer::start().await;
        Mock::given(query_param("fut_contract", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("[]", "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpBarSource::new(&settings(&server, None)).unwrap();
        let mut req = request();
        req.fut_contract = Some(1);
        assert_eq!(source.fetch_bars(&req).await, Ok(vec![]));
    }
}
