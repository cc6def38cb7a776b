//! reqwest-backed implementation of the game service contract.

use super::{BackendError, GameBackend};
use crate::model::{
    CharacterResponse, ClientConfig, CommandRequest, CommandResponse, CommandToken,
    StartResponse, StatusResponse,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max).collect();
    out.push('…');
    out
}

#[async_trait]
impl GameBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn start(&self) -> Result<StartResponse, BackendError> {
        let url = self.url("start");
        debug!(%url, "GET start");
        let response = self.client.get(&url).send().await?;
        Self::read_json(response).await
    }

    async fn command(&self, request: &CommandRequest) -> Result<CommandResponse, BackendError> {
        let url = self.url("command");
        debug!(%url, client_token = %request.client_token, "POST command");
        let response = self.client.post(&url).json(request).send().await?;
        Self::read_json(response).await
    }

    async fn status(&self, id: &CommandToken) -> Result<StatusResponse, BackendError> {
        let url = self.url(&format!("status/{}", id.as_str()));
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(%id, "backend does not know this command id");
            return Err(BackendError::UnknownToken(id.clone()));
        }
        Self::read_json(response).await
    }

    async fn character(&self) -> Result<CharacterResponse, BackendError> {
        let response = self.client.get(self.url("character")).send().await?;
        Self::read_json(response).await
    }
}
