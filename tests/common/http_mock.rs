use std::time::Duration;

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Token endpoint answering both grants. `expect_*` are exact call counts,
/// verified when the server is dropped.
#[allow(dead_code)]
pub async fn start_token_endpoint(
    refresh_token: &str,
    expect_refresh: u64,
    expect_code: u64,
    delay: Duration,
) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_partial_json(serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "AT2" }))
                .set_delay(delay),
        )
        .expect(expect_refresh)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_partial_json(serde_json::json!({
            "grant_type": "authorization_code",
            "code": "XYZ"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "access_token": "AT1",
                    "refresh_token": "RT1",
                    "expires_in": 3600,
                    "scope": "s",
                    "token_type": "Bearer"
                }))
                .set_delay(delay),
        )
        .expect(expect_code)
        .mount(&server)
        .await;

    server
}

#[allow(dead_code)]
pub fn token_uri(server: &MockServer) -> String {
    format!("{}/token", server.uri())
}
