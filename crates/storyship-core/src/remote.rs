//! Remote service client seam.
//!
//! The pipeline talks to the visual-testing service exclusively through
//! named GraphQL operations. Transport, authentication and retries of the
//! query itself belong to the implementation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::error::{PipelineError, Result};

/// Executes named GraphQL operations against the service.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Run `operation` with `variables`, returning the `data` object.
    ///
    /// Fails on non-2xx responses and on a non-empty GraphQL `errors` array.
    async fn run_query(&self, operation: &str, variables: Value) -> Result<Value>;
}

/// Run `operation` and deserialize the field `field` of its result.
pub async fn query_field<T: DeserializeOwned>(
    client: &dyn RemoteClient,
    operation: &str,
    field: &str,
    variables: Value,
) -> Result<T> {
    let data = client.run_query(operation, variables).await?;
    let value = data
        .get(field)
        .cloned()
        .ok_or_else(|| PipelineError::remote(operation, format!("response has no `{field}`")))?;
    serde_json::from_value(value).map_err(|e| PipelineError::remote(operation, e))
}
