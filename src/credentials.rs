use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AuthkeepError;

/// Application credentials for an installed-app OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// The downloaded credentials document nests everything under `installed`.
#[derive(Debug, Deserialize)]
struct CredentialsDocument {
    installed: Credentials,
}

impl Credentials {
    /// Parse a credentials document. `origin` is only used in error messages.
    pub fn from_json(input: &str, origin: &Path) -> Result<Self, AuthkeepError> {
        let doc: CredentialsDocument =
            serde_json::from_str(input).map_err(|e| AuthkeepError::ConfigError {
                path: origin.to_path_buf(),
                detail: e.to_string(),
            })?;
        Ok(doc.installed)
    }

    /// Redirect URI used when the caller does not pick one.
    pub fn default_redirect_uri(&self) -> Option<&str> {
        self.redirect_uris.first().map(String::as_str)
    }
}

/// Load application credentials. Any failure here is fatal to the caller.
pub fn load_credentials(path: &Path) -> Result<Credentials, AuthkeepError> {
    let data = std::fs::read_to_string(path).map_err(|e| AuthkeepError::ConfigError {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let credentials = Credentials::from_json(&data, path)?;
    tracing::debug!(
        path = %path.display(),
        client_id = %credentials.client_id,
        "loaded application credentials"
    );
    Ok(credentials)
}
