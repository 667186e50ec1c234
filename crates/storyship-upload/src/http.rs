//! GraphQL-over-HTTP [`RemoteClient`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use storyship_core::{PipelineError, RemoteClient, Result};
use tracing::debug;

use crate::config::RemoteConfig;

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

/// Runs registered GraphQL documents against the service endpoint.
pub struct HttpRemoteClient {
    config: RemoteConfig,
    client: reqwest::Client,
    documents: HashMap<String, String>,
}

impl HttpRemoteClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("storyship/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            documents: HashMap::new(),
        })
    }

    /// Register the GraphQL document sent for `operation`.
    pub fn with_operation(mut self, operation: &str, document: &str) -> Self {
        self.documents
            .insert(operation.to_string(), document.trim().to_string());
        self
    }
}

fn into_data(operation: &str, response: GraphQlResponse) -> Result<Value> {
    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(PipelineError::remote(operation, messages.join("; ")));
    }
    response
        .data
        .filter(|data| !data.is_null())
        .ok_or_else(|| PipelineError::remote(operation, "response carries no data"))
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn run_query(&self, operation: &str, variables: Value) -> Result<Value> {
        let document = self.documents.get(operation).ok_or_else(|| {
            PipelineError::Internal(format!("no GraphQL document registered for {operation}"))
        })?;

        let mut request = self.client.post(&self.config.api_url).json(&json!({
            "operationName": operation,
            "query": document,
            "variables": variables,
        }));
        if let Some(token) = &self.config.project_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::remote(operation, e))?;
        let status = response.status();
        debug!(operation = %operation, status = %status, "query finished");
        if !status.is_success() {
            return Err(PipelineError::remote(
                operation,
                format!("service responded with status {status}"),
            ));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::remote(operation, e))?;
        into_data(operation, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> GraphQlResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_data_is_returned() {
        let data = into_data("Op", parse(r#"{"data": {"x": 1}}"#)).unwrap();
        assert_eq!(data, json!({"x": 1}));
    }

    #[test]
    fn test_graphql_errors_fail_the_query() {
        let err = into_data(
            "Op",
            parse(r#"{"data": null, "errors": [{"message": "a"}, {"message": "b"}]}"#),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "remote request Op failed: a; b");
    }

    #[test]
    fn test_missing_data_fails_the_query() {
        assert!(into_data("Op", parse("{}")).is_err());
    }

    #[tokio::test]
    async fn test_unregistered_operation_is_rejected() {
        let client = HttpRemoteClient::new(RemoteConfig::new("http://127.0.0.1:9")).unwrap();
        let err = client.run_query("Unknown", json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }
}
