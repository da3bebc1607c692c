//! Collector transport
//!
//! The harvest scheduler talks to the collector through the [`HttpClient`]
//! trait; [`CollectorClient`] is the reqwest-backed default. Transmission
//! failures are routed to the dead-letter path by the scheduler, never to
//! the emitting caller.

use crate::config::VideoConfig;
use crate::error::{Error, Result};
use crate::event::{Priority, VideoEvent};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Application token header sent with every batch
const APPLICATION_TOKEN_HEADER: &str = "X-App-License-Key";

/// Agent identification header
const USER_AGENT_HEADER: &str = "User-Agent";

/// Contract for event batch transmission
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a batch of events for one harvest priority. `Ok` means the
    /// collector accepted the batch; any `Err` sends it to retry.
    async fn send_events(&self, events: &[VideoEvent], priority: Priority) -> Result<()>;
}

/// Reqwest-backed collector client
pub struct CollectorClient {
    client: Client,
    endpoint: Url,
    application_token: String,
}

impl CollectorClient {
    pub fn new(config: &VideoConfig) -> Result<Self> {
        let endpoint = match &config.collector_address {
            Some(url) => url.clone(),
            None => Url::parse(&format!(
                "https://video-collector.{}.mediapulse.io/v1/events",
                config.region.to_lowercase()
            ))
            .map_err(|e| Error::InvalidEndpoint(e.to_string()))?,
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            client,
            endpoint,
            application_token: config.application_token.clone(),
        })
    }

    fn user_agent(&self) -> String {
        format!("MediaPulse/{}", crate::VERSION)
    }
}

#[async_trait]
impl HttpClient for CollectorClient {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn send_events(&self, events: &[VideoEvent], priority: Priority) -> Result<()> {
        let payload: Vec<serde_json::Value> = events.iter().map(VideoEvent::to_wire).collect();

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(APPLICATION_TOKEN_HEADER, &self.application_token)
            .header(USER_AGENT_HEADER, self.user_agent())
            .query(&[("type", priority.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ConnectionTimeout
                } else {
                    Error::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CollectorStatus {
                status: status.as_u16(),
            });
        }

        debug!(priority = %priority, status = status.as_u16(), "Batch accepted");
        Ok(())
    }
}
