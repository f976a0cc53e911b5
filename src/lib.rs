pub mod cache;
pub mod consent;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod token;

pub use cache::{default_tokens_path, load_token_record, save_token_record};
pub use consent::{build_consent_url, extract_code, CannedConsent, ConsentFlow, LoopbackConsent};
pub use credentials::{load_credentials, Credentials};
pub use error::AuthkeepError;
pub use manager::{HandleState, TokenManager, TokenManagerBuilder};
pub use token::{TokenExchangeClient, TokenRecord};

/// One-shot convenience function: load everything from disk, run the
/// loopback consent flow if needed and return an access token.
pub async fn access_token(
    credentials_path: impl Into<std::path::PathBuf>,
    tokens_path: impl Into<std::path::PathBuf>,
    scope: &str,
) -> Result<String, AuthkeepError> {
    let manager = TokenManager::builder(scope)
        .credentials_path(credentials_path)
        .tokens_path(tokens_path)
        .consent(LoopbackConsent::new(std::time::Duration::from_secs(120)))
        .build()?;
    let token = manager.get_token().await?;
    match manager.take_persist_error().await {
        Some(e) => Err(e),
        None => Ok(token),
    }
}
