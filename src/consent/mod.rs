pub mod loopback;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use crate::credentials::Credentials;
use crate::error::AuthkeepError;

pub use loopback::LoopbackConsent;

impl std::fmt::Debug for dyn ConsentFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentFlow").finish()
    }
}

/// How the user gets to approve access.
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    /// Show `consent_url` to the user and return the URL the provider
    /// redirected to afterwards. It should carry a `code` query parameter.
    async fn open_consent_screen(
        &self,
        consent_url: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthkeepError>;
}

/// Build `<auth_uri>?client_id=..&redirect_uri=..&response_type=code&scope=..`.
pub fn build_consent_url(
    credentials: &Credentials,
    redirect_uri: &str,
    scope: &str,
) -> Result<String, AuthkeepError> {
    let url = Url::parse_with_params(
        &credentials.auth_uri,
        &[
            ("client_id", credentials.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope),
        ],
    )
    .map_err(|e| AuthkeepError::ConfigError {
        path: "<credentials>".into(),
        detail: format!("invalid auth_uri '{}': {e}", credentials.auth_uri),
    })?;
    Ok(url.into())
}

/// Pull the authorization code out of a redirect URL.
pub fn extract_code(redirect_url: &str) -> Result<String, AuthkeepError> {
    // Listeners may hand back just the request target ("/?code=..").
    let base = Url::parse("http://localhost/").map_err(|e| {
        AuthkeepError::AuthExchangeError(format!("invalid base url: {e}"))
    })?;
    let url = Url::options()
        .base_url(Some(&base))
        .parse(redirect_url)
        .map_err(|e| {
            AuthkeepError::AuthExchangeError(format!("invalid redirect url '{redirect_url}': {e}"))
        })?;

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (Some(code), _) => Ok(code),
        (None, Some(error)) => Err(AuthkeepError::AuthExchangeError(format!(
            "consent was not granted: {error}"
        ))),
        (None, None) => Err(AuthkeepError::AuthExchangeError(
            "no authorization code in redirect url".into(),
        )),
    }
}

/// Consent collaborator that answers with a fixed redirect URL.
#[derive(Debug)]
pub struct CannedConsent {
    redirect_url: String,
    calls: AtomicUsize,
    last_consent_url: Mutex<Option<String>>,
}

impl CannedConsent {
    pub fn new(redirect_url: impl Into<String>) -> Self {
        Self {
            redirect_url: redirect_url.into(),
            calls: AtomicUsize::new(0),
            last_consent_url: Mutex::new(None),
        }
    }

    /// How many times the consent screen was "shown".
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_consent_url(&self) -> Option<String> {
        self.last_consent_url.lock().await.clone()
    }
}

#[async_trait]
impl ConsentFlow for CannedConsent {
    async fn open_consent_screen(
        &self,
        consent_url: &str,
        _redirect_uri: &str,
    ) -> Result<String, AuthkeepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_consent_url.lock().await = Some(consent_url.to_string());
        Ok(self.redirect_url.clone())
    }
}
