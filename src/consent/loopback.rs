use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::{Host, Url};

use super::ConsentFlow;
use crate::error::AuthkeepError;

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><body><h1>Authorization received</h1>\
                            <p>You can close this window and return to the terminal.</p></body></html>";

/// Opens the consent screen in the system browser and waits for the
/// provider to redirect back to a loopback redirect URI.
#[derive(Debug, Clone)]
pub struct LoopbackConsent {
    timeout: Duration,
    open_browser: bool,
}

impl LoopbackConsent {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            open_browser: true,
        }
    }

    /// Only listen; the caller shows the URL some other way.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }
}

#[async_trait]
impl ConsentFlow for LoopbackConsent {
    async fn open_consent_screen(
        &self,
        consent_url: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthkeepError> {
        let (redirect, addr) = loopback_redirect(redirect_uri)?;
        let port = redirect.port_or_known_default().unwrap_or(80);

        // Bind before showing the screen so a fast redirect is not lost.
        let listener = TcpListener::bind((addr, port)).await?;
        tracing::debug!(%addr, port, "waiting for consent redirect");

        if !self.open_browser || webbrowser::open(consent_url).is_err() {
            tracing::warn!("Open this URL to grant access:\n{consent_url}");
        }

        let target = tokio::time::timeout(self.timeout, accept_redirect(&listener))
            .await
            .map_err(|_| AuthkeepError::ConsentError {
                detail: format!("no redirect received on port {port}"),
                timeout: Some(self.timeout),
            })??;

        let full = redirect.join(&target).map_err(|e| AuthkeepError::ConsentError {
            detail: format!("unusable redirect target '{target}': {e}"),
            timeout: None,
        })?;
        Ok(full.into())
    }
}

/// Parse the redirect URI and pick the loopback address its host names.
fn loopback_redirect(redirect_uri: &str) -> Result<(Url, IpAddr), AuthkeepError> {
    let url = Url::parse(redirect_uri).map_err(|e| AuthkeepError::ConsentError {
        detail: format!("invalid redirect uri '{redirect_uri}': {e}"),
        timeout: None,
    })?;
    let addr = match url.host() {
        _ if url.scheme() != "http" => None,
        Some(Host::Domain("localhost")) => Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Some(Host::Ipv4(ip)) if ip.is_loopback() => Some(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) if ip.is_loopback() => Some(IpAddr::V6(ip)),
        _ => None,
    };
    match addr {
        Some(addr) => Ok((url, addr)),
        None => Err(AuthkeepError::ConsentError {
            detail: format!("redirect uri '{redirect_uri}' is not a loopback http address"),
            timeout: None,
        }),
    }
}

/// Accept one request and return its target (path + query).
async fn accept_redirect(listener: &TcpListener) -> Result<String, AuthkeepError> {
    let (mut stream, _) = listener.accept().await?;

    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let target = request_target(&request).ok_or_else(|| AuthkeepError::ConsentError {
        detail: "malformed redirect request".to_string(),
        timeout: None,
    })?;

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        SUCCESS_PAGE.len(),
        SUCCESS_PAGE
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;

    Ok(target)
}

fn request_target(request: &str) -> Option<String> {
    // "GET /callback?code=... HTTP/1.1"
    let first_line = request.lines().next()?;
    let mut parts = first_line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    target.starts_with('/').then(|| target.to_string())
}
