use std::path::{Path, PathBuf};

use crate::error::AuthkeepError;
use crate::token::TokenRecord;

/// Default token file location: `~/.authkeep/tokens.json`.
pub fn default_tokens_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".authkeep")
        .join("tokens.json")
}

/// Load a previously saved token record.
///
/// A missing or unreadable file means "no prior token", never an error.
pub fn load_token_record(path: &Path) -> Option<TokenRecord> {
    match try_load(path) {
        Ok(Some(record)) => Some(record),
        Ok(None) => {
            tracing::debug!(path = %path.display(), "no token file, consent will be required");
            None
        }
        Err(e) => {
            tracing::warn!("{e}; ignoring cached tokens");
            None
        }
    }
}

fn try_load(path: &Path) -> Result<Option<TokenRecord>, AuthkeepError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(read_err(path, e.to_string())),
    };
    parse_record(path, &data).map(Some)
}

/// The file must hold a JSON object; serde would otherwise accept `[]` as
/// an all-default record.
fn parse_record(path: &Path, data: &str) -> Result<TokenRecord, AuthkeepError> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| read_err(path, e.to_string()))?;
    if !value.is_object() {
        return Err(read_err(path, "token file is not a JSON object".into()));
    }
    serde_json::from_value(value).map_err(|e| read_err(path, e.to_string()))
}

fn read_err(path: &Path, detail: String) -> AuthkeepError {
    AuthkeepError::CacheReadError {
        path: path.to_path_buf(),
        detail,
    }
}

/// Overwrite the token file with `record`, pretty-printed.
pub fn save_token_record(path: &Path, record: &TokenRecord) -> Result<(), AuthkeepError> {
    let write_err = |detail: String| AuthkeepError::CacheWriteError {
        path: path.to_path_buf(),
        detail,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    let data = serde_json::to_string_pretty(record).map_err(|e| write_err(e.to_string()))?;
    std::fs::write(path, data).map_err(|e| write_err(e.to_string()))?;
    tracing::info!(path = %path.display(), "saved token record");
    Ok(())
}
