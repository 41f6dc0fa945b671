//! HTTP client for the natural-language translation service

use async_trait::async_trait;
use querydesk_core::collaborators::{SchemaMetadata, Translator};
use querydesk_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct TranslateRequest<'a> {
    question: &'a str,
    schema: &'a SchemaMetadata,
}

#[derive(Deserialize)]
struct TranslateResponse {
    sql: Option<String>,
}

/// Posts `{question, schema}` to the configured endpoint and reads `{sql}` back
pub struct HttpTranslator {
    client: Client,
    endpoint: String,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(format!("QueryDesk/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, nl_query: &str, schema: &SchemaMetadata) -> Result<String> {
        debug!(endpoint = %self.endpoint, tables = schema.tables.len(), "Requesting translation");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&TranslateRequest {
                question: nl_query,
                schema,
            })
            .send()
            .await
            .map_err(|e| Error::Translation(format!("Translator unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Translation(format!(
                "Translator returned {}: {}",
                status, body
            )));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| Error::Translation(format!("Invalid translator response: {}", e)))?;

        body.sql
            .filter(|sql| !sql.trim().is_empty())
            .ok_or_else(|| Error::Translation("Translator produced no SQL".to_string()))
    }
}

/// Used when no translation endpoint is configured
pub struct UnconfiguredTranslator;

#[async_trait]
impl Translator for UnconfiguredTranslator {
    async fn translate(&self, _nl_query: &str, _schema: &SchemaMetadata) -> Result<String> {
        Err(Error::Translation(
            "Natural-language queries are disabled: no translator endpoint configured"
                .to_string(),
        ))
    }
}
