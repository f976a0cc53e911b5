//! Access token state machine.
//!
//! A [`TokenManager`] owns one token handle that moves between
//! `Unresolved`, `Pending` and `Resolved`. Every caller that arrives while an
//! exchange is pending awaits the same shared future, so N concurrent
//! [`TokenManager::get_token`] calls cost one trip to the token endpoint and
//! at most one consent screen.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::cache::{load_token_record, save_token_record};
use crate::consent::{build_consent_url, extract_code, ConsentFlow};
use crate::credentials::{load_credentials, Credentials};
use crate::error::AuthkeepError;
use crate::token::{TokenExchangeClient, TokenRecord, DEFAULT_REQUEST_TIMEOUT};

type PendingExchange = Shared<BoxFuture<'static, Result<String, AuthkeepError>>>;

enum TokenHandle {
    Unresolved,
    Pending(PendingExchange),
    Resolved(String),
}

impl TokenHandle {
    fn is_resolved(&self) -> bool {
        match self {
            TokenHandle::Unresolved => false,
            TokenHandle::Pending(pending) => matches!(pending.peek(), Some(Ok(_))),
            TokenHandle::Resolved(_) => true,
        }
    }
}

/// Observable state of the token handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Unresolved,
    Pending,
    Resolved,
}

/// Everything an exchange needs. Shared with the spawned exchange task so
/// the exchange runs to completion even if every caller goes away.
struct Session {
    client: TokenExchangeClient,
    consent: Arc<dyn ConsentFlow>,
    tokens_path: PathBuf,
    scope: String,
    tokens: Mutex<Option<TokenRecord>>,
    redirect_uri: Mutex<Option<String>>,
    persist_error: Mutex<Option<AuthkeepError>>,
}

impl Session {
    async fn refresh(&self, refresh_token: String) -> Result<String, AuthkeepError> {
        tracing::debug!("refreshing access token");
        self.client.refresh_access_token(&refresh_token).await
    }

    async fn consent_and_exchange(&self) -> Result<String, AuthkeepError> {
        let redirect_uri = self.redirect_uri.lock().await.clone().ok_or_else(|| {
            AuthkeepError::ConfigError {
                path: "<credentials>".into(),
                detail: "no redirect uri configured".into(),
            }
        })?;
        let consent_url = build_consent_url(self.client.credentials(), &redirect_uri, &self.scope)?;

        tracing::debug!(%redirect_uri, "requesting user consent");
        let redirect = self
            .consent
            .open_consent_screen(&consent_url, &redirect_uri)
            .await?;
        let code = extract_code(&redirect)?;

        let record = self.client.exchange_code(&code, &redirect_uri).await?;
        tracing::info!(
            expires_at = ?record.expires_at(chrono::Utc::now()),
            "obtained tokens from authorization code"
        );
        if record.refresh_token().is_none() {
            tracing::warn!("provider returned no refresh token; consent will be needed next run");
        }

        // A failed write keeps this session's token; the next process
        // will have to ask for consent again.
        if let Err(e) = save_token_record(&self.tokens_path, &record) {
            tracing::warn!("{e}");
            *self.persist_error.lock().await = Some(e);
        }

        let access_token = record.access_token.clone();
        *self.tokens.lock().await = Some(record);
        Ok(access_token)
    }
}

/// Hands out access tokens for one client and one scope.
pub struct TokenManager {
    session: Arc<Session>,
    handle: Mutex<TokenHandle>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("client_id", &self.session.client.credentials().client_id)
            .field("scope", &self.session.scope)
            .field("tokens_path", &self.session.tokens_path)
            .finish()
    }
}

impl TokenManager {
    pub fn builder(scope: impl Into<String>) -> TokenManagerBuilder {
        TokenManagerBuilder::new(scope)
    }

    /// Return the current access token, starting an exchange if there is
    /// none yet. Concurrent callers share one exchange.
    pub async fn get_token(&self) -> Result<String, AuthkeepError> {
        let pending = {
            let mut handle = self.handle.lock().await;
            match &*handle {
                TokenHandle::Resolved(token) => return Ok(token.clone()),
                TokenHandle::Pending(pending) => match pending.peek() {
                    Some(Ok(token)) => {
                        let token = token.clone();
                        *handle = TokenHandle::Resolved(token.clone());
                        return Ok(token);
                    }
                    // Settled with an error nobody has cleared yet.
                    Some(Err(_)) => {
                        let pending = self.start_exchange().await;
                        *handle = TokenHandle::Pending(pending.clone());
                        pending
                    }
                    None => pending.clone(),
                },
                TokenHandle::Unresolved => {
                    let pending = self.start_exchange().await;
                    *handle = TokenHandle::Pending(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;
        self.settle(&pending, &result).await;
        result
    }

    /// Like [`get_token`](Self::get_token), but first drops a resolved (or,
    /// with `force`, any) access token. The stored refresh token is kept, so
    /// no consent screen is shown when one exists.
    pub async fn get_refreshed_token(&self, force: bool) -> Result<String, AuthkeepError> {
        self.invalidate(force, false).await;
        self.get_token().await
    }

    /// Like [`get_refreshed_token`](Self::get_refreshed_token), but also
    /// forgets the stored token record so the full consent flow runs.
    pub async fn get_clean_token(&self, force: bool) -> Result<String, AuthkeepError> {
        self.invalidate(force, true).await;
        self.get_token().await
    }

    /// Build the consent screen URL and remember `redirect_uri` for the
    /// following code exchange.
    pub async fn consent_screen_endpoint(&self, redirect_uri: &str) -> Result<String, AuthkeepError> {
        let url = build_consent_url(
            self.session.client.credentials(),
            redirect_uri,
            &self.session.scope,
        )?;
        *self.session.redirect_uri.lock().await = Some(redirect_uri.to_string());
        Ok(url)
    }

    /// Redirect URI the next consent flow will use.
    pub async fn redirect_uri(&self) -> Option<String> {
        self.session.redirect_uri.lock().await.clone()
    }

    pub async fn state(&self) -> HandleState {
        match &*self.handle.lock().await {
            TokenHandle::Unresolved => HandleState::Unresolved,
            TokenHandle::Pending(pending) => match pending.peek() {
                None => HandleState::Pending,
                Some(Ok(_)) => HandleState::Resolved,
                Some(Err(_)) => HandleState::Unresolved,
            },
            TokenHandle::Resolved(_) => HandleState::Resolved,
        }
    }

    /// Whether the next exchange will use the refresh grant.
    pub async fn has_refresh_token(&self) -> bool {
        self.session
            .tokens
            .lock()
            .await
            .as_ref()
            .and_then(TokenRecord::refresh_token)
            .is_some()
    }

    /// Take the last failure to write the token file, if any.
    pub async fn take_persist_error(&self) -> Option<AuthkeepError> {
        self.session.persist_error.lock().await.take()
    }

    pub fn scope(&self) -> &str {
        &self.session.scope
    }

    pub fn tokens_path(&self) -> &Path {
        &self.session.tokens_path
    }

    async fn start_exchange(&self) -> PendingExchange {
        let refresh_token = self
            .session
            .tokens
            .lock()
            .await
            .as_ref()
            .and_then(TokenRecord::refresh_token)
            .map(str::to_owned);

        let session = Arc::clone(&self.session);
        let task = tokio::spawn(async move {
            match refresh_token {
                Some(refresh_token) => session.refresh(refresh_token).await,
                None => session.consent_and_exchange().await,
            }
        });

        async move {
            task.await.map_err(|e| {
                AuthkeepError::AuthExchangeError(format!("token exchange task failed: {e}"))
            })?
        }
        .boxed()
        .shared()
    }

    /// Move the handle out of `Pending` once `pending` has settled, unless
    /// it was replaced in the meantime.
    async fn settle(&self, pending: &PendingExchange, result: &Result<String, AuthkeepError>) {
        let mut handle = self.handle.lock().await;
        if let TokenHandle::Pending(current) = &*handle {
            if current.ptr_eq(pending) {
                *handle = match result {
                    Ok(token) => TokenHandle::Resolved(token.clone()),
                    Err(e) => {
                        tracing::debug!("token exchange failed: {e}");
                        TokenHandle::Unresolved
                    }
                };
            }
        }
    }

    async fn invalidate(&self, force: bool, clear_record: bool) {
        // An in-flight exchange always finishes before a new one starts.
        let mut handle = loop {
            let handle = self.handle.lock().await;
            let in_flight = match &*handle {
                TokenHandle::Pending(pending) if force && pending.peek().is_none() => {
                    Some(pending.clone())
                }
                _ => None,
            };
            match in_flight {
                Some(pending) => {
                    drop(handle);
                    let result = pending.clone().await;
                    self.settle(&pending, &result).await;
                }
                None => break handle,
            }
        };

        if force || handle.is_resolved() {
            tracing::debug!(clear_record, "discarding token handle");
            *handle = TokenHandle::Unresolved;
            if clear_record {
                *self.session.tokens.lock().await = None;
            }
        }
    }
}

enum CredentialSource {
    Path(PathBuf),
    Loaded(Credentials),
}

/// Configures a [`TokenManager`].
pub struct TokenManagerBuilder {
    scope: String,
    credentials: Option<CredentialSource>,
    tokens_path: Option<PathBuf>,
    redirect_uri: Option<String>,
    http: Option<reqwest::Client>,
    request_timeout: Option<Duration>,
    consent: Option<Arc<dyn ConsentFlow>>,
}

impl TokenManagerBuilder {
    fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            credentials: None,
            tokens_path: None,
            redirect_uri: None,
            http: None,
            request_timeout: None,
            consent: None,
        }
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials = Some(CredentialSource::Path(path.into()));
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(CredentialSource::Loaded(credentials));
        self
    }

    pub fn tokens_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tokens_path = Some(path.into());
        self
    }

    /// Overrides the first `redirect_uris` entry of the credentials.
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Limit on each token endpoint request. Ignored when an explicit
    /// [`http_client`](Self::http_client) is given.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn consent<C: ConsentFlow + 'static>(self, consent: C) -> Self {
        self.consent_arc(Arc::new(consent))
    }

    pub fn consent_arc(mut self, consent: Arc<dyn ConsentFlow>) -> Self {
        self.consent = Some(consent);
        self
    }

    /// Load credentials and any saved token record. Missing or broken
    /// credentials fail here; a missing token file does not.
    pub fn build(self) -> Result<TokenManager, AuthkeepError> {
        let credentials = match self.credentials {
            Some(CredentialSource::Path(path)) => load_credentials(&path)?,
            Some(CredentialSource::Loaded(credentials)) => credentials,
            None => {
                return Err(AuthkeepError::ConfigError {
                    path: "<builder>".into(),
                    detail: "no credentials given".into(),
                })
            }
        };
        let consent = self.consent.ok_or_else(|| AuthkeepError::ConfigError {
            path: "<builder>".into(),
            detail: "no consent flow given".into(),
        })?;
        let tokens_path = self
            .tokens_path
            .unwrap_or_else(crate::cache::default_tokens_path);
        let tokens = load_token_record(&tokens_path);
        let redirect_uri = self
            .redirect_uri
            .or_else(|| credentials.default_redirect_uri().map(str::to_owned));

        tracing::debug!(
            tokens_path = %tokens_path.display(),
            has_tokens = tokens.is_some(),
            "token manager ready"
        );

        let client = match self.http {
            Some(http) => TokenExchangeClient::with_client(http, credentials),
            None => TokenExchangeClient::with_timeout(
                credentials,
                self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            ),
        };

        Ok(TokenManager {
            session: Arc::new(Session {
                client,
                consent,
                tokens_path,
                scope: self.scope,
                tokens: Mutex::new(tokens),
                redirect_uri: Mutex::new(redirect_uri),
                persist_error: Mutex::new(None),
            }),
            handle: Mutex::new(TokenHandle::Unresolved),
        })
    }
}
