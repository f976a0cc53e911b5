use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Errors produced while obtaining or persisting tokens.
///
/// Cloneable so that one settled exchange can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthkeepError {
    #[error("Error in config {}: {detail}", path.display())]
    ConfigError { path: PathBuf, detail: String },

    #[error("Cannot read token file {}: {detail}", path.display())]
    CacheReadError { path: PathBuf, detail: String },

    #[error("Cannot write token file {}: {detail}", path.display())]
    CacheWriteError { path: PathBuf, detail: String },

    #[error("Transport error talking to {endpoint}: {detail}")]
    TransportError { endpoint: String, detail: String },

    #[error("Token exchange failed: {0}")]
    AuthExchangeError(String),

    #[error("{}", format_consent(.detail, .timeout))]
    ConsentError {
        detail: String,
        timeout: Option<Duration>,
    },

    #[error("I/O error: {0}")]
    IoError(Arc<std::io::Error>),
}

fn format_consent(detail: &str, timeout: &Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("Consent not completed after {}s: {detail}", t.as_secs()),
        None => format!("Consent failed: {detail}"),
    }
}

impl From<std::io::Error> for AuthkeepError {
    fn from(err: std::io::Error) -> Self {
        AuthkeepError::IoError(Arc::new(err))
    }
}

impl AuthkeepError {
    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            AuthkeepError::ConfigError { .. } => "config_error",
            AuthkeepError::CacheReadError { .. } => "cache_read_error",
            AuthkeepError::CacheWriteError { .. } => "cache_write_error",
            AuthkeepError::TransportError { .. } => "transport_error",
            AuthkeepError::AuthExchangeError(_) => "auth_exchange_error",
            AuthkeepError::ConsentError { .. } => "consent_error",
            AuthkeepError::IoError(_) => "io_error",
        }
    }

    /// The file the error concerns, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            AuthkeepError::ConfigError { path, .. }
            | AuthkeepError::CacheReadError { path, .. }
            | AuthkeepError::CacheWriteError { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(path) = self.path() {
            obj.insert(
                "path".into(),
                serde_json::Value::String(path.display().to_string()),
            );
        }
        obj.insert("message".into(), serde_json::Value::String(self.to_string()));
        obj.insert("code".into(), serde_json::Value::String(self.code().to_string()));
        serde_json::json!({ "error": obj })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_config_error() {
        let err = AuthkeepError::ConfigError {
            path: PathBuf::from("/home/user/.authkeep/credentials.json"),
            detail: "missing field `installed`".into(),
        };
        assert_eq!(
            err.to_string(),
            "Error in config /home/user/.authkeep/credentials.json: missing field `installed`"
        );
    }

    #[test]
    fn display_transport_error() {
        let err = AuthkeepError::TransportError {
            endpoint: "https://a/token".into(),
            detail: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Transport error talking to https://a/token: connection refused"
        );
    }

    #[test]
    fn display_consent_with_and_without_timeout() {
        let err = AuthkeepError::ConsentError {
            detail: "no redirect".into(),
            timeout: Some(Duration::from_secs(120)),
        };
        assert_eq!(err.to_string(), "Consent not completed after 120s: no redirect");

        let err = AuthkeepError::ConsentError {
            detail: "browser closed".into(),
            timeout: None,
        };
        assert_eq!(err.to_string(), "Consent failed: browser closed");
    }

    #[test]
    fn error_code_mapping_all_variants() {
        let p = || PathBuf::from("/a");
        assert_eq!(
            AuthkeepError::ConfigError { path: p(), detail: "d".into() }.code(),
            "config_error"
        );
        assert_eq!(
            AuthkeepError::CacheReadError { path: p(), detail: "d".into() }.code(),
            "cache_read_error"
        );
        assert_eq!(
            AuthkeepError::CacheWriteError { path: p(), detail: "d".into() }.code(),
            "cache_write_error"
        );
        assert_eq!(
            AuthkeepError::TransportError {
                endpoint: "e".into(),
                detail: "d".into()
            }
            .code(),
            "transport_error"
        );
        assert_eq!(
            AuthkeepError::AuthExchangeError("e".into()).code(),
            "auth_exchange_error"
        );
        assert_eq!(
            AuthkeepError::ConsentError {
                detail: "d".into(),
                timeout: None
            }
            .code(),
            "consent_error"
        );
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "test");
        assert_eq!(AuthkeepError::from(io_err).code(), "io_error");
    }

    #[test]
    fn error_to_json_structure() {
        let err = AuthkeepError::CacheWriteError {
            path: PathBuf::from("/tmp/tokens.json"),
            detail: "read-only file system".into(),
        };
        let json = err.to_json();
        let error_obj = json.get("error").expect("should have error key");
        assert_eq!(error_obj["path"], "/tmp/tokens.json");
        assert_eq!(error_obj["code"], "cache_write_error");
        assert!(error_obj["message"]
            .as_str()
            .unwrap()
            .contains("read-only"));
    }

    #[test]
    fn error_to_json_without_path() {
        let json = AuthkeepError::AuthExchangeError("invalid_grant".into()).to_json();
        assert!(json["error"].get("path").is_none());
        assert_eq!(json["error"]["code"], "auth_exchange_error");
    }

    #[test]
    fn clone_keeps_io_source() {
        let err = AuthkeepError::from(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "port taken",
        ));
        let copy = err.clone();
        assert_eq!(copy.to_string(), "I/O error: port taken");
    }
}
