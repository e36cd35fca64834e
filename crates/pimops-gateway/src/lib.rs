//! Authenticated HTTP gateway to the Bluestone PIM.
//!
//! Two auth schemes coexist on the remote: the read-only attribute listing
//! takes an api key plus a context header, while group listing and all
//! mutation endpoints take a bearer token from a client-credentials grant.
//! Transient failures (5xx, 429, connect/timeout) are retried with capped
//! exponential backoff; 409 conflicts are never retried and surface as
//! [`GatewayError::Conflict`] carrying the conflicting entity id when the
//! error body yields one.

use std::time::Duration;

use async_trait::async_trait;
use pimops_core::{AttributeCreateRequest, AttributeRecord, GroupCreateRequest, GroupRecord};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "pimops-gateway";

pub const ATTRIBUTE_PAGE_SIZE: usize = 50;
pub const GROUP_PAGE_SIZE: usize = 1000;

const RESOURCE_ID_HEADER: &str = "resource-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Explicit configuration for the remote client. Built once at startup and
/// passed in; nothing inside the gateway reads the environment ad hoc.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub auth_url: String,
    pub attributes_url: String,
    pub attribute_groups_url: String,
    pub definitions_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_key: String,
    pub context: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            auth_url: std::env::var("BLUESTONE_AUTH_URL")
                .unwrap_or_else(|_| "https://idp-us.bluestonepim.com/op/token".to_string()),
            attributes_url: std::env::var("BLUESTONE_GET_ATTRIBUTES_URL")
                .unwrap_or_else(|_| "https://idp-us.bluestonepim.com/v1/attributes".to_string()),
            attribute_groups_url: std::env::var("BLUESTONE_ATTRIBUTE_GROUPS_URL")
                .unwrap_or_else(|_| "https://api-us.bluestonepim.com/pim/attributeGroups".to_string()),
            definitions_url: std::env::var("BLUESTONE_DEFINITIONS_URL")
                .unwrap_or_else(|_| "https://api-us.bluestonepim.com/pim/definitions".to_string()),
            client_id: std::env::var("BLUESTONE_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("BLUESTONE_CLIENT_SECRET").unwrap_or_default(),
            api_key: std::env::var("BLUESTONE_API_KEY").unwrap_or_default(),
            context: std::env::var("BLUESTONE_API_CONTEXT").unwrap_or_else(|_| "en".to_string()),
            timeout: std::env::var("PIMOPS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(20)),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("resource already exists (conflicting entity: {})", entity_id.as_deref().unwrap_or("unknown"))]
    Conflict { entity_id: Option<String> },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Result of a create call that went through. 409s never reach here; they
/// surface as [`GatewayError::Conflict`] for the caller to absorb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub resource_id: String,
}

/// Remote operations the import pipeline needs. Trait seam so the engine
/// tests run against an in-memory double.
#[async_trait]
pub trait PimGateway: Send + Sync {
    async fn list_attributes(&self) -> Result<Vec<AttributeRecord>, GatewayError>;
    async fn list_groups(&self) -> Result<Vec<GroupRecord>, GatewayError>;
    async fn create_group(&self, request: &GroupCreateRequest) -> Result<CreateOutcome, GatewayError>;
    async fn create_attribute(
        &self,
        request: &AttributeCreateRequest,
    ) -> Result<CreateOutcome, GatewayError>;
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

#[derive(Debug, Deserialize)]
struct AttributePage {
    results: Option<Vec<AttributeRecord>>,
}

#[derive(Debug, Deserialize)]
struct GroupPage {
    #[serde(default)]
    data: Vec<GroupRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictBody {
    #[serde(default)]
    conflicting_entities: Vec<ConflictingEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictingEntity {
    entity_id: String,
}

/// Pull `conflictingEntities[0].entityId` out of a 409 error body, if the
/// body parses at all.
pub fn parse_conflict_entity_id(body: &str) -> Option<String> {
    let parsed: ConflictBody = serde_json::from_str(body).ok()?;
    parsed.conflicting_entities.into_iter().next().map(|e| e.entity_id)
}

pub struct BluestoneGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    token: Mutex<Option<TokenResponse>>,
}

impl BluestoneGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    /// Fetch a bearer header, reusing the cached token after the first call.
    async fn bearer_header(&self) -> Result<String, GatewayError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(format!("{} {}", token.token_type, token.access_token));
        }

        let response = self
            .client
            .post(&self.config.auth_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|_| GatewayError::UnexpectedShape("token response".to_string()))?;
        let header = format!("{} {}", token.token_type, token.access_token);
        *guard = Some(token);
        Ok(header)
    }

    /// Send a request, retrying transient failures per the backoff policy.
    /// Returns the response for the caller to interpret; non-retryable
    /// statuses come back as-is (409 handling is endpoint-specific).
    async fn send_with_retries<F>(&self, build: F) -> Result<reqwest::Response, GatewayError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let backoff = self.config.backoff;
        let mut last_error: Option<reqwest::Error> = None;

        for attempt in 0..=backoff.max_retries {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success()
                        && classify_status(status) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(%status, attempt, "retrying transient remote failure");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(error = %err, attempt, "retrying failed request");
                        last_error = Some(err);
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(GatewayError::Request(err));
                }
            }
        }

        match last_error {
            Some(err) => Err(GatewayError::Request(err)),
            None => Err(GatewayError::UnexpectedShape("retry loop exhausted".to_string())),
        }
    }

    async fn status_error(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        GatewayError::HttpStatus { status, url, body }
    }

    /// Common handling for the two create endpoints: 409 becomes a typed
    /// conflict, success reads the id from the `resource-id` header.
    async fn read_create_outcome(
        response: reqwest::Response,
    ) -> Result<CreateOutcome, GatewayError> {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Conflict {
                entity_id: parse_conflict_entity_id(&body),
            });
        }
        if !status.is_success() {
            return Err(Self::status_error(response).await);
        }

        let resource_id = response
            .headers()
            .get(RESOURCE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::UnexpectedShape(format!("missing {RESOURCE_ID_HEADER} header"))
            })?;

        Ok(CreateOutcome { resource_id })
    }
}

#[async_trait]
impl PimGateway for BluestoneGateway {
    /// Full paginated listing; terminates on the first short or empty page.
    async fn list_attributes(&self) -> Result<Vec<AttributeRecord>, GatewayError> {
        let mut items = Vec::new();
        let mut page_no = 1usize;

        loop {
            let response = self
                .send_with_retries(|| {
                    self.client
                        .get(&self.config.attributes_url)
                        .query(&[("pageNo", page_no), ("itemsOnPage", ATTRIBUTE_PAGE_SIZE)])
                        .header("x-api-key", &self.config.api_key)
                        .header("context", &self.config.context)
                        .header("Accept", "application/json")
                })
                .await?;

            if !response.status().is_success() {
                return Err(Self::status_error(response).await);
            }

            let page: AttributePage = response
                .json()
                .await
                .map_err(|_| GatewayError::UnexpectedShape("attribute page".to_string()))?;
            let results = page
                .results
                .ok_or_else(|| GatewayError::UnexpectedShape("missing results field".to_string()))?;

            if results.is_empty() {
                break;
            }
            let short_page = results.len() < ATTRIBUTE_PAGE_SIZE;
            items.extend(results);
            if short_page {
                break;
            }
            page_no += 1;
        }

        debug!(count = items.len(), "listed remote attributes");
        Ok(items)
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, GatewayError> {
        let bearer = self.bearer_header().await?;
        let mut groups = Vec::new();
        let mut page = 0usize;

        loop {
            let response = self
                .send_with_retries(|| {
                    self.client
                        .get(&self.config.attribute_groups_url)
                        .query(&[("page", page), ("pageSize", GROUP_PAGE_SIZE)])
                        .header("Authorization", &bearer)
                        .header("context", &self.config.context)
                        .header("Accept", "application/json")
                })
                .await?;

            if !response.status().is_success() {
                return Err(Self::status_error(response).await);
            }

            let body: GroupPage = response
                .json()
                .await
                .map_err(|_| GatewayError::UnexpectedShape("group page".to_string()))?;
            let short_page = body.data.len() < GROUP_PAGE_SIZE;
            groups.extend(body.data);
            if short_page {
                break;
            }
            page += 1;
        }

        debug!(count = groups.len(), "listed remote groups");
        Ok(groups)
    }

    async fn create_group(&self, request: &GroupCreateRequest) -> Result<CreateOutcome, GatewayError> {
        let bearer = self.bearer_header().await?;
        let response = self
            .send_with_retries(|| {
                self.client
                    .post(&self.config.attribute_groups_url)
                    .header("Authorization", &bearer)
                    .header("Accept", "application/json")
                    .json(request)
            })
            .await?;
        Self::read_create_outcome(response).await
    }

    async fn create_attribute(
        &self,
        request: &AttributeCreateRequest,
    ) -> Result<CreateOutcome, GatewayError> {
        let bearer = self.bearer_header().await?;
        let response = self
            .send_with_retries(|| {
                self.client
                    .post(&self.config.definitions_url)
                    .header("Authorization", &bearer)
                    .header("Accept", "application/json")
                    .json(request)
            })
            .await?;
        Self::read_create_outcome(response).await
    }
}
