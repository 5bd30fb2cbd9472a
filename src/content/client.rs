//! GraphQL Content Service Client
//!
//! Fetches binary metadata and publication details from the content
//! service. Requests are issued with async reqwest and driven to completion
//! on a tokio runtime handle, so callers stay synchronous.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use super::errors::ContentError;
use super::types::{BinaryComponent, BinaryKey, ContextData, Namespace};
use crate::config::ResolverConfig;

const BINARY_COMPONENT_QUERY: &str = "query binaryComponent($namespaceId: Int!, $publicationId: Int!, \
$binaryId: Int, $url: String, $contextData: [InputClaimValue]) { \
binaryComponent(namespaceId: $namespaceId, publicationId: $publicationId, binaryId: $binaryId, \
url: $url, contextData: $contextData) { id lastPublishDate \
variants { edges { node { downloadUrl path type } } } } }";

const PUBLICATION_QUERY: &str = "query publication($namespaceId: Int!, $publicationId: Int!, \
$contextData: [InputClaimValue]) { publication(namespaceId: $namespaceId, \
publicationId: $publicationId, contextData: $contextData) { publicationUrl } }";

/// Metadata capability the resolver needs from the content service
pub trait ContentClient: Send + Sync {
    /// Look up a binary component. `Ok(None)` means the service has no
    /// component for the given key.
    fn get_binary_component(
        &self,
        namespace: Namespace,
        publication_id: u32,
        key: &BinaryKey,
        context: &ContextData,
    ) -> Result<Option<BinaryComponent>, ContentError>;

    /// Resolve the base URL of a publication
    fn get_publication_url(
        &self,
        namespace: Namespace,
        publication_id: u32,
        context: &ContextData,
    ) -> Result<String, ContentError>;
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinaryComponentData {
    binary_component: Option<BinaryComponent>,
}

#[derive(Debug, Deserialize)]
struct PublicationData {
    publication: Option<Publication>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Publication {
    publication_url: Option<String>,
}

/// Content service client speaking GraphQL over HTTP
#[derive(Clone)]
pub struct GraphQlClient {
    /// HTTP client for making requests
    http_client: Client,
    /// GraphQL endpoint
    endpoint: String,
    /// Optional bearer token
    access_token: Option<String>,
    /// Tokio runtime handle for async operations
    runtime: Handle,
}

impl GraphQlClient {
    /// Create a client from resolver configuration
    pub fn new(config: &ResolverConfig, runtime: Handle) -> Result<Self, ContentError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ContentError::Network(format!("Failed to create HTTP client: {}", e)))?;

        info!(endpoint = %config.endpoint, "Content service client ready");

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            access_token: config.access_token.clone(),
            runtime,
        })
    }

    /// Post a GraphQL request and decode its `data` member
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<Option<T>, ContentError> {
        let request_context = format!("{} {}", operation, variables);
        debug!(endpoint = %self.endpoint, request = %request_context, "Sending content service request");

        let mut request = self.http_client.post(&self.endpoint).json(&GraphQlRequest {
            query,
            variables,
        });
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let context = format!("requesting '{}' ({}): {}", self.endpoint, request_context, body);
            let err = ContentError::from_status(status, &context);
            if err.is_not_found() {
                info!(status = status, request = %request_context, "Item not found in content service");
            } else {
                error!(status = status, request = %request_context, body = %body, "Content service request failed");
            }
            return Err(err);
        }

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| ContentError::InvalidResponse(format!("{}: {}", operation, e)))?;

        if body.data.is_none() && !body.errors.is_empty() {
            let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
            error!(request = %request_context, errors = ?messages, "Content service returned errors");
            return Err(ContentError::InvalidResponse(messages.join("; ")));
        }

        Ok(body.data)
    }

    async fn fetch_binary_component(
        &self,
        namespace: Namespace,
        publication_id: u32,
        key: &BinaryKey,
        context: &ContextData,
    ) -> Result<Option<BinaryComponent>, ContentError> {
        let (binary_id, url) = match key {
            BinaryKey::Id(id) => (Some(*id), None),
            BinaryKey::Path(path) => (None, Some(path.as_str())),
        };
        let variables = json!({
            "namespaceId": namespace.graphql_id(),
            "publicationId": publication_id,
            "binaryId": binary_id,
            "url": url,
            "contextData": context,
        });

        let data: Option<BinaryComponentData> = self
            .execute("binaryComponent", BINARY_COMPONENT_QUERY, variables)
            .await?;
        let component = data.and_then(|d| d.binary_component);

        debug!(
            namespace = %namespace,
            publication = publication_id,
            key = %key,
            found = component.is_some(),
            "Fetched binary component"
        );
        Ok(component)
    }

    async fn fetch_publication_url(
        &self,
        namespace: Namespace,
        publication_id: u32,
        context: &ContextData,
    ) -> Result<String, ContentError> {
        let variables = json!({
            "namespaceId": namespace.graphql_id(),
            "publicationId": publication_id,
            "contextData": context,
        });

        let data: Option<PublicationData> = self
            .execute("publication", PUBLICATION_QUERY, variables)
            .await?;

        data.and_then(|d| d.publication)
            .and_then(|p| p.publication_url)
            .ok_or_else(|| {
                ContentError::NotFound(format!(
                    "No publication {} in namespace {}",
                    publication_id, namespace
                ))
            })
    }
}

impl ContentClient for GraphQlClient {
    fn get_binary_component(
        &self,
        namespace: Namespace,
        publication_id: u32,
        key: &BinaryKey,
        context: &ContextData,
    ) -> Result<Option<BinaryComponent>, ContentError> {
        self.runtime
            .block_on(self.fetch_binary_component(namespace, publication_id, key, context))
    }

    fn get_publication_url(
        &self,
        namespace: Namespace,
        publication_id: u32,
        context: &ContextData,
    ) -> Result<String, ContentError> {
        self.runtime
            .block_on(self.fetch_publication_url(namespace, publication_id, context))
    }
}
