use std::time::Duration;

use assert_cmd::prelude::*;
use assert_cmd::Command;
use predicates::prelude::*;

mod common;

use common::http_mock::{start_token_endpoint, token_uri};
use common::Workspace;

fn authkeep_cmd(ws: &Workspace) -> Command {
    let mut cmd = Command::cargo_bin("authkeep").unwrap();
    cmd.env("AUTHKEEP_CREDENTIALS", ws.credentials_path())
        .env("AUTHKEEP_TOKENS", ws.tokens_path())
        .env_remove("AUTHKEEP_SCOPE")
        .env_remove("AUTHKEEP_REDIRECT_URI")
        .env_remove("AUTHKEEP_REQUEST_TIMEOUT_MS");
    cmd
}

/// Run the binary off the async runtime so the mock server keeps serving.
async fn run(mut cmd: Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

#[test]
fn consent_url_prints_url() {
    let ws = Workspace::new("https://a/token", None);
    authkeep_cmd(&ws)
        .args(["consent-url", "--scope", "s"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("https://a/auth?client_id=c1"))
        .stdout(predicate::str::contains("response_type=code"));
}

#[test]
fn consent_url_json_with_redirect_override() {
    let ws = Workspace::new("https://a/token", None);
    authkeep_cmd(&ws)
        .args(["consent-url", "--scope", "s", "--json"])
        .args(["--redirect-uri", "http://127.0.0.1:9999/cb"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"consent_url\""))
        .stdout(predicate::str::contains("127.0.0.1%3A9999"));
}

#[test]
fn missing_scope_fails() {
    let ws = Workspace::new("https://a/token", None);
    authkeep_cmd(&ws)
        .arg("token")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no scope given"));
}

#[test]
fn missing_credentials_fails_with_json_error() {
    let ws = Workspace::new("https://a/token", None);
    std::fs::remove_file(ws.credentials_path()).unwrap();
    authkeep_cmd(&ws)
        .args(["token", "--scope", "s", "--json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"config_error\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn token_uses_saved_refresh_token() {
    let server = start_token_endpoint("RT1", 1, 0, Duration::ZERO).await;
    let ws = Workspace::new(
        &token_uri(&server),
        Some(serde_json::json!({ "refresh_token": "RT1" })),
    );
    let mut cmd = authkeep_cmd(&ws);
    cmd.args(["token", "--scope", "s", "--no-browser"]);

    run(cmd).await.assert().success().stdout("AT2\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_json_output() {
    let server = start_token_endpoint("RT1", 1, 0, Duration::ZERO).await;
    let ws = Workspace::new(
        &token_uri(&server),
        Some(serde_json::json!({ "refresh_token": "RT1" })),
    );
    let mut cmd = authkeep_cmd(&ws);
    cmd.args(["refresh", "--scope", "s", "--json"]);

    run(cmd)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("\"access_token\":\"AT2\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_token_endpoint_times_out() {
    let server = start_token_endpoint("RT1", 1, 0, Duration::from_secs(30)).await;
    let ws = Workspace::new(
        &token_uri(&server),
        Some(serde_json::json!({ "refresh_token": "RT1" })),
    );
    let mut cmd = authkeep_cmd(&ws);
    cmd.args(["token", "--scope", "s", "--json", "--request-timeout", "200"])
        .timeout(Duration::from_secs(10));

    run(cmd)
        .await
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"transport_error\""));
}
