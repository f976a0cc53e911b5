use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::error::AuthkeepError;

/// Token pair as returned by the provider and persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl TokenRecord {
    /// Refresh token, if the record carries a usable one.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Absolute expiry of the access token given when it was issued.
    pub fn expires_at(
        &self,
        issued: chrono::DateTime<chrono::Utc>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        self.expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| issued + chrono::Duration::seconds(secs))
    }
}

/// Raw token endpoint response. Error-shaped bodies carry `error` instead
/// of `access_token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn error_detail(&self) -> Option<String> {
        let error = self.error.as_deref()?;
        Some(match self.error_description.as_deref() {
            Some(desc) => format!("{error}: {desc}"),
            None => error.to_string(),
        })
    }

    fn into_record(self) -> Result<TokenRecord, AuthkeepError> {
        if let Some(detail) = self.error_detail() {
            return Err(AuthkeepError::AuthExchangeError(detail));
        }
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthkeepError::AuthExchangeError("response has no access_token".into())
            })?;
        Ok(TokenRecord {
            access_token,
            expires_in: self.expires_in,
            refresh_token: self.refresh_token,
            scope: self.scope,
            token_type: self.token_type,
        })
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Debug, Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    grant_type: &'static str,
}

/// Whole-request limit for token endpoint calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Performs the two token endpoint grants for one set of credentials.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    credentials: Credentials,
}

impl TokenExchangeClient {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_timeout(credentials, DEFAULT_REQUEST_TIMEOUT)
    }

    /// A stalled endpoint fails with `TransportError` after `timeout`.
    pub fn with_timeout(credentials: Credentials, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()
            .unwrap_or_default();
        Self::with_client(http, credentials)
    }

    pub fn with_client(http: reqwest::Client, credentials: Credentials) -> Self {
        Self { http, credentials }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// `grant_type=refresh_token`. The provider does not rotate the refresh
    /// token here, so only the access token is returned.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, AuthkeepError> {
        let body = RefreshRequest {
            refresh_token,
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
            grant_type: "refresh_token",
        };
        let record = self.post(&body, "refresh").await?;
        Ok(record.access_token)
    }

    /// `grant_type=authorization_code`. Returns the full record to persist.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenRecord, AuthkeepError> {
        let body = CodeRequest {
            code,
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
            redirect_uri,
            grant_type: "authorization_code",
        };
        self.post(&body, "code exchange").await
    }

    async fn post<B: Serialize>(&self, body: &B, what: &str) -> Result<TokenRecord, AuthkeepError> {
        let endpoint = &self.credentials.token_uri;
        tracing::debug!(%endpoint, "sending token {what} request");

        let transport_err = |e: reqwest::Error| AuthkeepError::TransportError {
            endpoint: endpoint.clone(),
            detail: if e.is_timeout() {
                format!("request timed out: {e}")
            } else {
                e.to_string()
            },
        };

        let resp = self
            .http
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status();
        let text = resp.text().await.map_err(transport_err)?;

        let parsed: Result<TokenResponse, _> = serde_json::from_str(&text);
        match parsed {
            Ok(token_resp) if status.is_success() => token_resp.into_record(),
            Ok(token_resp) => {
                let detail = token_resp.error_detail().unwrap_or(text);
                Err(AuthkeepError::AuthExchangeError(format!(
                    "token {what} failed with status {status}: {detail}"
                )))
            }
            Err(e) => Err(AuthkeepError::AuthExchangeError(format!(
                "failed to parse token {what} response (status {status}): {e}"
            ))),
        }
    }
}
