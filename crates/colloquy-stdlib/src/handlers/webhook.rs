//! Outbound HTTP nodes
//!
//! One handler serves the `webhook`, `api` and `integration` kinds. Calls
//! are bounded by a timeout and a fixed retry budget; server errors and
//! transport failures retry with backoff, client errors fail immediately.
//! An exhausted budget surfaces as [`EngineError::ExternalCallError`], which
//! the engine routes to the node's error edge when one is configured.

use async_trait::async_trait;
use colloquy_core::config::HttpConfig;
use colloquy_core::domain::deferred::retry_backoff;
use colloquy_core::domain::flow::NodeId;
use colloquy_core::{
    EngineError, NodeContext, NodeHandler, NodeOutcome, Trigger, VarScope, VariablesPatch,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::render_value;

const RETRY_BASE_DELAY_MS: u64 = 250;
const RETRY_MAX_DELAY_MS: u64 = 2_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    query: HashMap<String, Value>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    retries: Option<u32>,
    #[serde(default)]
    response_variable: Option<String>,
    next_node_id: String,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Calls an external HTTP endpoint and optionally stores the response.
#[derive(Debug)]
pub struct HttpCallHandler {
    client: Client,
    settings: HttpConfig,
}

impl HttpCallHandler {
    /// Build the handler with a shared client.
    pub fn new(settings: HttpConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(settings.timeout_seconds))
                .connect_timeout(Duration::from_secs(settings.connect_timeout_seconds))
                .build()
                .unwrap(),
            settings,
        }
    }

    fn build_request(
        &self,
        ctx: &NodeContext,
        config: &WebhookConfig,
        method: &Method,
        url: &str,
    ) -> RequestBuilder {
        let mut request = self.client.request(method.clone(), url);

        if let Some(seconds) = config.timeout_seconds {
            request = request.timeout(Duration::from_secs(seconds));
        }
        for (name, value) in &config.headers {
            request = request.header(name, ctx.render(value));
        }
        if !config.query.is_empty() {
            let params: Vec<(String, String)> = config
                .query
                .iter()
                .map(|(name, value)| {
                    let rendered = match value {
                        Value::String(s) => ctx.render(s),
                        other => other.to_string(),
                    };
                    (name.clone(), rendered)
                })
                .collect();
            request = request.query(&params);
        }
        if *method != Method::GET && *method != Method::HEAD {
            if let Some(body) = &config.body {
                request = request.json(&render_value(ctx, body));
            }
        }

        request
    }
}

impl Default for HttpCallHandler {
    fn default() -> Self {
        Self::new(HttpConfig::default())
    }
}

#[async_trait]
impl NodeHandler for HttpCallHandler {
    fn kind(&self) -> &str {
        "webhook"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("webhook node: {}", e)))?;

        let method = Method::from_str(&config.method.to_uppercase()).map_err(|_| {
            EngineError::InvalidConfiguration(format!("Invalid HTTP method: {}", config.method))
        })?;
        let url = ctx.render(&config.url);
        let retries = config.retries.unwrap_or(self.settings.max_retries);

        let mut last_error =
            EngineError::ExternalCallError(format!("No attempt made for {}", url));
        for attempt in 0..=retries {
            if attempt > 0 {
                let delay = retry_backoff(attempt, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS);
                warn!(url = %url, attempt, "Retrying HTTP call after {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            debug!(method = %method, url = %url, attempt, "Calling external endpoint");
            let request = self.build_request(ctx, &config, &method, &url);
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        let body: Value = serde_json::from_str(&text)
                            .unwrap_or_else(|_| json!({ "rawBody": text }));
                        let mut outcome = NodeOutcome::goto(NodeId(config.next_node_id));
                        if let Some(variable) = config.response_variable {
                            outcome = outcome.with_patch(VariablesPatch::new().set(
                                VarScope::Session,
                                variable,
                                json!({ "status": status.as_u16(), "body": body }),
                            ));
                        }
                        return Ok(outcome);
                    }
                    if status.is_client_error() {
                        return Err(EngineError::ExternalCallError(format!(
                            "HTTP {} calling {}",
                            status.as_u16(),
                            url
                        )));
                    }
                    last_error = EngineError::ExternalCallError(format!(
                        "HTTP {} calling {}",
                        status.as_u16(),
                        url
                    ));
                }
                Err(e) => {
                    last_error = EngineError::ExternalCallError(format!(
                        "{} request to {} failed: {}",
                        method, url, e
                    ));
                }
            }
        }

        Err(last_error)
    }
}
