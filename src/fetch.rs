//! Document retrieval for sources.
//!
//! [`FetchGateway`] is the only stage that performs network I/O. The default
//! implementation, [`HttpGateway`], picks a strategy per source:
//!
//! - **fast**: a single GET; the body is returned verbatim, transport errors
//!   and non-success statuses are [`FetchError`]s.
//! - **rendered** (`render_required` sources): a headless browser session run
//!   by a Browserless-compatible service. It navigates, waits for `<body>`,
//!   lets deferred scripts settle, then returns the rendered markup. What a
//!   failed render yields is decided by [`RenderFailure`].
//!
//! Retries are not done here; see [`crate::retry::RetryingGateway`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::errors::FetchError;
use crate::models::{RawDocument, Source};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Retrieves the raw document for a source.
#[async_trait]
pub trait FetchGateway: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<RawDocument, FetchError>;
}

#[async_trait]
impl<T: FetchGateway + ?Sized> FetchGateway for Arc<T> {
    async fn fetch(&self, source: &Source) -> Result<RawDocument, FetchError> {
        (**self).fetch(source).await
    }
}

/// What a failed or timed-out headless render produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RenderFailure {
    /// Log and hand back an empty document; the firing extracts nothing.
    #[default]
    EmptyDocument,
    /// Surface a [`FetchError::Render`], failing the firing.
    Error,
}

/// Settings for the headless rendering service.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Base URL of the Browserless service, e.g. `http://localhost:3000`.
    pub base_url: String,
    pub token: Option<String>,
    /// Hard bound on one render session.
    pub timeout: Duration,
    /// Pause after `<body>` is ready, for deferred scripts.
    pub settle_delay: Duration,
}

/// Client for a Browserless `/content` endpoint.
#[derive(Debug, Clone)]
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    settings: RenderSettings,
}

impl BrowserlessRenderer {
    pub fn new(settings: RenderSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            settings: RenderSettings {
                base_url: settings.base_url.trim_end_matches('/').to_string(),
                ..settings
            },
        })
    }

    /// Fetch fully rendered markup for `url`.
    #[instrument(level = "info", skip(self))]
    pub async fn render(&self, url: &str) -> Result<String, FetchError> {
        let mut endpoint = format!("{}/content", self.settings.base_url);
        if let Some(ref token) = self.settings.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let body = serde_json::json!({
            "url": url,
            "userAgent": USER_AGENT,
            "gotoOptions": { "waitUntil": "domcontentloaded" },
            "waitForSelector": {
                "selector": "body",
                "timeout": self.settings.timeout.as_millis() as u64,
            },
            "waitForTimeout": self.settings.settle_delay.as_millis() as u64,
        });

        let render_err = |reason: String| FetchError::Render {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| render_err(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(render_err(format!("HTTP {}: {}", status.as_u16(), message)));
        }

        let html = resp.text().await.map_err(|e| render_err(e.to_string()))?;
        info!(bytes = html.len(), "Rendered page via headless browser");
        Ok(html)
    }
}

/// Production gateway: plain HTTP for static pages, Browserless for the rest.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    renderer: Option<BrowserlessRenderer>,
    render_failure: RenderFailure,
}

impl HttpGateway {
    pub fn new(
        request_timeout: Duration,
        renderer: Option<BrowserlessRenderer>,
        render_failure: RenderFailure,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            renderer,
            render_failure,
        })
    }

    #[instrument(level = "info", skip(self))]
    async fn fetch_fast(&self, url: &str) -> Result<RawDocument, FetchError> {
        let transport = |source: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.text().await.map_err(transport)?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(RawDocument::new(body))
    }

    async fn fetch_rendered(&self, url: &str) -> Result<RawDocument, FetchError> {
        let result = match &self.renderer {
            Some(renderer) => renderer.render(url).await,
            None => Err(FetchError::Render {
                url: url.to_string(),
                reason: "no rendering service configured".to_string(),
            }),
        };

        match (result, self.render_failure) {
            (Ok(html), _) => Ok(RawDocument::new(html)),
            (Err(e), RenderFailure::EmptyDocument) => {
                warn!(%url, error = %e, "Render failed; continuing with an empty document");
                Ok(RawDocument::empty())
            }
            (Err(e), RenderFailure::Error) => Err(e),
        }
    }
}

#[async_trait]
impl FetchGateway for HttpGateway {
    async fn fetch(&self, source: &Source) -> Result<RawDocument, FetchError> {
        if source.render_required {
            self.fetch_rendered(&source.url).await
        } else {
            self.fetch_fast(&source.url).await
        }
    }
}
