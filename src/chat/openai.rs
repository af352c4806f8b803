//! OpenAI Responses API provider.
//!
//! Sends `POST {base_url}/responses` with `"stream": true` and reads the
//! server-sent events, yielding the text of each
//! `response.output_text.delta` event.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::{ChatProvider, FragmentStream, ProviderError};
use crate::config::ChatSettings;

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl OpenAiProvider {
    /// Build a provider, reading the API key from `settings.api_key_env`
    pub fn from_settings(settings: &ChatSettings) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("{} is not set, chat requests will be rejected", settings.api_key_env);
        }
        Self::new(settings, api_key)
    }

    pub fn new(settings: &ChatSettings, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        info!("Chat provider: {} (model {})", settings.base_url, settings.model);
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            model: settings.model.clone(),
            api_key,
            api_key_env: settings.api_key_env.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream(&self, message: &str) -> Result<FragmentStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured(format!("{} is not set", self.api_key_env)))?;

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "input": message,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Upstream stream opened");
        Ok(parse_event_stream(response.bytes_stream()))
    }
}

/// Turn a Responses API event stream into text fragments.
pub fn parse_event_stream<S, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let body = body.map_err(std::io::Error::other).boxed();
    let mut lines = BufReader::new(StreamReader::new(body)).lines();

    Box::pin(try_stream! {
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ProviderError::Stream(e.to_string()))?
        {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            let event: Value = serde_json::from_str(data)
                .map_err(|e| ProviderError::Stream(format!("malformed event: {e}")))?;

            match event["type"].as_str() {
                Some("response.output_text.delta") => {
                    if let Some(delta) = event["delta"].as_str() {
                        yield delta.to_owned();
                    }
                }
                Some("response.completed") => break,
                Some("response.failed") => {
                    let message = event["response"]["error"]["message"]
                        .as_str()
                        .unwrap_or("response failed")
                        .to_owned();
                    Err(ProviderError::Stream(message))?;
                }
                Some("error") => {
                    let message = event["message"].as_str().unwrap_or("upstream error").to_owned();
                    Err(ProviderError::Stream(message))?;
                }
                _ => {}
            }
        }
    })
}
