//! JSON-protocol API client
//!
//! Provides `AwsJsonClient` for calling `X-Amz-Target` style APIs, where
//! every operation is a POST of a JSON document to the service endpoint.

use super::Auth;

use eyre::{Context, Result, eyre};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use url::Url;

/// Error codes that signal the caller exceeded a rate quota
const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "LimitExceededException",
];

/// Wire protocol flavour of a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Table API (`DynamoDB_20120810.*`)
    DynamoDb,
    /// Stream API (`Kinesis_20131202.*`)
    Kinesis,
}

impl Protocol {
    pub fn target_prefix(&self) -> &'static str {
        match self {
            Self::DynamoDb => "DynamoDB_20120810",
            Self::Kinesis => "Kinesis_20131202",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::DynamoDb => "application/x-amz-json-1.0",
            Self::Kinesis => "application/x-amz-json-1.1",
        }
    }

    fn service(&self) -> &'static str {
        match self {
            Self::DynamoDb => "dynamodb",
            Self::Kinesis => "kinesis",
        }
    }

    /// Public endpoint of the service in `region`
    pub fn regional_endpoint(&self, region: &str) -> Result<Url> {
        let url = format!("https://{}.{}.amazonaws.com/", self.service(), region);
        Url::parse(&url).with_context(|| format!("Invalid region '{}'", region))
    }
}

/// Error response returned by the backend
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code} (HTTP {status}): {message}")]
pub struct ServiceError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Parse an error body of the form `{"__type": "ns#Code", "message": "..."}`
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let code = field("__type")
            .map(|t| {
                t.rsplit_once('#')
                    .map_or_else(|| t.clone(), |(_, code)| code.to_string())
            })
            .unwrap_or_else(|| format!("Http{}", status));
        let message = field("message")
            .or_else(|| field("Message"))
            .unwrap_or_else(|| body.trim().to_string());

        Self::new(status, code, message)
    }

    /// Returns true if the call was rejected for exceeding a rate quota
    pub fn is_throttling(&self) -> bool {
        self.status == 429 || THROTTLING_CODES.contains(&self.code.as_str())
    }
}

/// Client for a single JSON-protocol service endpoint.
///
/// # Example
/// ```no_run
/// use store_dump::client::{Auth, AwsJsonClient, Protocol};
/// use serde_json::json;
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let url = Url::parse("http://localhost:8000")?;
/// let client = AwsJsonClient::try_new(url, Auth::None, Protocol::DynamoDb)?;
/// let page = client.call("Scan", &json!({"TableName": "users", "Limit": 10})).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct AwsJsonClient {
    client: Client,
    url: Url,
    protocol: Protocol,
}

impl AwsJsonClient {
    /// Create a client for `url` speaking `protocol`
    ///
    /// # Errors
    /// Returns an error if the credentials cannot be encoded as headers or
    /// the HTTP client cannot be built
    pub fn try_new(url: Url, auth: Auth, protocol: Protocol) -> Result<Self> {
        let mut headers = HeaderMap::new();
        auth.apply(&mut headers)?;
        let client = Client::builder().default_headers(headers).build()?;
        log::debug!("Using {} endpoint {} (auth: {})", protocol.service(), url, auth);

        Ok(Self {
            client,
            url,
            protocol,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Invoke `operation` with a JSON request body.
    ///
    /// Numbers in the response keep their exact textual form.
    ///
    /// # Errors
    /// Returns a [`ServiceError`] for non-success responses, or a plain
    /// error for transport and parse failures.
    pub async fn call(&self, operation: &str, body: &Value) -> Result<Value> {
        let target = format!("{}.{}", self.protocol.target_prefix(), operation);
        log::trace!("POST {} ({})", self.url, target);

        let response = self
            .client
            .post(self.url.clone())
            .header("X-Amz-Target", &target)
            .header(CONTENT_TYPE, self.protocol.content_type())
            .body(serde_json::to_vec(body)?)
            .send()
            .await
            .map_err(|e| eyre!("Failed to send {} request: {}", target, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", target))?;

        if !status.is_success() {
            return Err(ServiceError::from_response(status.as_u16(), &text).into());
        }

        serde_json::from_str(&text).with_context(|| format!("Failed to parse {} response", target))
    }
}

impl std::fmt::Display for AwsJsonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.protocol.service())
    }
}
