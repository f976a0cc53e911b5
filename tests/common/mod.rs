pub mod http_mock;

use std::path::PathBuf;

/// Credentials document in the "installed" shape, pointing at `token_uri`.
pub fn credentials_json(token_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "installed": {
            "client_id": "c1",
            "project_id": "test-project",
            "client_secret": "s1",
            "auth_uri": "https://a/auth",
            "token_uri": token_uri,
            "redirect_uris": ["http://localhost"]
        }
    })
}

/// Temp directory holding `credentials.json` and optionally `tokens.json`.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

#[allow(dead_code)]
impl Workspace {
    pub fn new(token_uri: &str, tokens: Option<serde_json::Value>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let creds = serde_json::to_string_pretty(&credentials_json(token_uri)).unwrap();
        std::fs::write(dir.path().join("credentials.json"), creds).unwrap();
        if let Some(tokens) = tokens {
            std::fs::write(dir.path().join("tokens.json"), tokens.to_string()).unwrap();
        }
        Self { dir }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.path().join("credentials.json")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.dir.path().join("tokens.json")
    }

    pub fn tokens_on_disk(&self) -> Option<serde_json::Value> {
        let raw = std::fs::read_to_string(self.tokens_path()).ok()?;
        serde_json::from_str(&raw).ok()
    }
}
