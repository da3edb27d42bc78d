use reqwest::{Client, Method};
use serde_json::Value;
use std::fmt;
use tracing::info;

use crate::config::CredentialConfig;
use crate::error::SessionError;

/// Signed endpoint for one conversation attempt
///
/// Short-lived; never reused across attempts.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    url: String,
}

impl SessionCredential {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

// Signed URLs carry secrets in the query string
impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible = self.url.split('?').next().unwrap_or_default();
        f.debug_struct("SessionCredential")
            .field("url", &format_args!("{}?…", visible))
            .finish()
    }
}

#[async_trait::async_trait]
pub trait CredentialFetcher: Send + Sync {
    /// Obtain a credential for a new attempt
    async fn fetch(&self) -> Result<SessionCredential, SessionError>;
}

/// Calls the credential webhook over HTTP
pub struct HttpCredentialFetcher {
    client: Client,
    url: String,
    method: Method,
    url_fields: Vec<String>,
}

impl HttpCredentialFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            method: Method::GET,
            url_fields: vec!["signed_url".to_string(), "token".to_string()],
        }
    }

    pub fn from_config(config: &CredentialConfig) -> Result<Self, SessionError> {
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes()).map_err(|_| {
            SessionError::CredentialUnavailable(format!("invalid HTTP method {:?}", config.method))
        })?;

        Ok(Self {
            client: Client::new(),
            url: config.url.clone(),
            method,
            url_fields: config.url_fields.clone(),
        })
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_url_fields(mut self, fields: Vec<String>) -> Self {
        self.url_fields = fields;
        self
    }

    fn extract_url(&self, body: &Value) -> Option<String> {
        self.url_fields.iter().find_map(|field| {
            body.get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

#[async_trait::async_trait]
impl CredentialFetcher for HttpCredentialFetcher {
    async fn fetch(&self) -> Result<SessionCredential, SessionError> {
        info!("Fetching session credential from {}", self.url);

        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .send()
            .await
            .map_err(|e| SessionError::CredentialUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::CredentialUnavailable(format!(
                "webhook call failed with status: {}. Response: {}",
                status.as_u16(),
                body
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            SessionError::CredentialUnavailable(format!("response is not JSON: {}", e))
        })?;

        let url = self.extract_url(&body).ok_or_else(|| {
            SessionError::CredentialUnavailable(format!(
                "response did not contain any of {:?}",
                self.url_fields
            ))
        })?;

        info!("Received session credential");

        Ok(SessionCredential::new(url))
    }
}

/// A credential known ahead of time
pub struct StaticCredential(pub String);

#[async_trait::async_trait]
impl CredentialFetcher for StaticCredential {
    async fn fetch(&self) -> Result<SessionCredential, SessionError> {
        Ok(SessionCredential::new(self.0.clone()))
    }
}
