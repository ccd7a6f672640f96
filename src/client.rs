//! Connector HTTP client — the four verbs a backend's `/api/v1` surface
//! exposes: `EpisodeSearch`, `SeasonSearch`, `MoviesSearch` (all
//! `POST /command`), and a liveness ping (`GET /`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name", rename_all_fields = "camelCase")]
enum CommandBody {
    EpisodeSearch { episode_ids: Vec<i64> },
    SeasonSearch { series_id: i64, season_number: i32 },
    MoviesSearch { movie_ids: Vec<i64> },
}

#[derive(Debug, Clone, Deserialize)]
struct CommandResponse {
    id: i64,
}

/// Result of a successful search dispatch against a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandId(pub i64);

/// The backend surface the dispatcher drives. One implementation per
/// `ConnectorType`, all speaking the same `/command` pattern (base URL +
/// api-key header + JSON body) over a shared `reqwest::Client`.
#[async_trait]
pub trait ConnectorClient: Send + Sync {
    async fn send_episode_search(&self, episode_ids: &[i64]) -> Result<CommandId, OrchestratorError>;
    async fn send_season_search(&self, series_id: i64, season_number: i32) -> Result<CommandId, OrchestratorError>;
    async fn send_movies_search(&self, movie_ids: &[i64]) -> Result<CommandId, OrchestratorError>;
    async fn ping(&self) -> Result<(), OrchestratorError>;
}

/// `reqwest`-backed client for a single connector instance.
pub struct HttpConnectorClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl HttpConnectorClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn build(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, OrchestratorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self::new(http, base_url, api_key))
    }

    async fn send_command(&self, body: CommandBody) -> Result<CommandId, OrchestratorError> {
        let url = format!("{}/command", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        handle_response(response).await.map(|parsed: CommandResponse| CommandId(parsed.id))
    }
}

#[async_trait]
impl ConnectorClient for HttpConnectorClient {
    async fn send_episode_search(&self, episode_ids: &[i64]) -> Result<CommandId, OrchestratorError> {
        self.send_command(CommandBody::EpisodeSearch {
            episode_ids: episode_ids.to_vec(),
        })
        .await
    }

    async fn send_season_search(&self, series_id: i64, season_number: i32) -> Result<CommandId, OrchestratorError> {
        self.send_command(CommandBody::SeasonSearch { series_id, season_number }).await
    }

    async fn send_movies_search(&self, movie_ids: &[i64]) -> Result<CommandId, OrchestratorError> {
        self.send_command(CommandBody::MoviesSearch {
            movie_ids: movie_ids.to_vec(),
        })
        .await
    }

    async fn ping(&self) -> Result<(), OrchestratorError> {
        let url = format!("{}/", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_to_error(response.status(), None))
        }
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, OrchestratorError> {
    let status = response.status();
    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| OrchestratorError::Unknown(format!("malformed response body: {e}")))
    } else {
        let retry_after = status
            .eq(&StatusCode::TOO_MANY_REQUESTS)
            .then(|| response.headers().get("retry-after").and_then(|v| v.to_str().ok()?.parse::<u64>().ok()).map(Duration::from_secs))
            .flatten();
        Err(status_to_error(status, retry_after))
    }
}

fn status_to_error(status: StatusCode, retry_after: Option<Duration>) -> OrchestratorError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => OrchestratorError::RateLimit { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OrchestratorError::Authentication(format!("HTTP {status}")),
        s if s.is_server_error() => OrchestratorError::Server { status: s.as_u16() },
        s => OrchestratorError::Server { status: s.as_u16() },
    }
}

fn map_transport_error(error: reqwest::Error) -> OrchestratorError {
    if error.is_timeout() {
        OrchestratorError::Timeout
    } else {
        OrchestratorError::Network(error.to_string())
    }
}

/// Builds a connector client for a given connector identity. Kept as a
/// free function rather than a method on `Connector` so the dispatcher can
/// substitute a fake in tests without touching the domain type.
pub trait ConnectorClientFactory: Send + Sync {
    fn build(&self, connector_id: Uuid, connector_type: crate::domain::ConnectorType, base_url: &str, api_key: &str) -> Box<dyn ConnectorClient>;
}
