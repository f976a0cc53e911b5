use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use authkeep::{AuthkeepError, LoopbackConsent, TokenManager};

#[derive(Parser)]
#[command(name = "authkeep", version, about = "Obtain and cache OAuth2 access tokens for an installed application")]
struct Cli {
    /// Application credentials JSON (the "installed" client download)
    #[arg(long, global = true, env = "AUTHKEEP_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Token file, rewritten after every successful consent
    #[arg(long, global = true, env = "AUTHKEEP_TOKENS")]
    tokens: Option<PathBuf>,

    /// Scope to request
    #[arg(long, global = true, env = "AUTHKEEP_SCOPE")]
    scope: Option<String>,

    /// Redirect URI (defaults to the first one in the credentials)
    #[arg(long, global = true, env = "AUTHKEEP_REDIRECT_URI")]
    redirect_uri: Option<String>,

    /// How long to wait for the consent redirect, in milliseconds
    #[arg(long, global = true, env = "AUTHKEEP_CONSENT_TIMEOUT_MS")]
    consent_timeout: Option<u64>,

    /// Limit on each token endpoint request, in milliseconds
    #[arg(long, global = true, env = "AUTHKEEP_REQUEST_TIMEOUT_MS")]
    request_timeout: Option<u64>,

    /// Do not try to open a browser; print the consent URL instead
    #[arg(long, global = true)]
    no_browser: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print an access token, refreshing or asking for consent as needed
    Token,
    /// Print a freshly refreshed access token
    Refresh,
    /// Run the consent screen again and print the new access token
    Login,
    /// Print the consent screen URL without running it
    #[command(name = "consent-url")]
    ConsentUrl,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AUTHKEEP_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli).await {
        if json {
            println!("{}", e.to_json());
        } else {
            eprintln!("{} {e}", "Error:".red().bold());
        }
        std::process::exit(1);
    }
}

fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".authkeep")
        .join("credentials.json")
}

async fn run(cli: Cli) -> Result<(), AuthkeepError> {
    let scope = cli.scope.ok_or_else(|| AuthkeepError::ConfigError {
        path: PathBuf::from("<cli>"),
        detail: "no scope given (use --scope or AUTHKEEP_SCOPE)".into(),
    })?;
    let timeout = Duration::from_millis(cli.consent_timeout.unwrap_or(120_000));
    let mut consent = LoopbackConsent::new(timeout);
    if cli.no_browser {
        consent = consent.without_browser();
    }

    let mut builder = TokenManager::builder(scope)
        .credentials_path(cli.credentials.unwrap_or_else(default_credentials_path))
        .tokens_path(cli.tokens.unwrap_or_else(authkeep::default_tokens_path))
        .consent(consent);
    if let Some(uri) = cli.redirect_uri.clone() {
        builder = builder.redirect_uri(uri);
    }
    if let Some(ms) = cli.request_timeout {
        builder = builder.request_timeout(Duration::from_millis(ms));
    }
    let manager = builder.build()?;

    let token = match cli.command {
        Commands::Token => manager.get_token().await?,
        Commands::Refresh => manager.get_refreshed_token(true).await?,
        Commands::Login => manager.get_clean_token(true).await?,
        Commands::ConsentUrl => {
            let uri = manager
                .redirect_uri()
                .await
                .ok_or_else(|| AuthkeepError::ConfigError {
                    path: PathBuf::from("<cli>"),
                    detail: "no redirect uri (use --redirect-uri or add redirect_uris)".into(),
                })?;
            let url = manager.consent_screen_endpoint(&uri).await?;
            if cli.json {
                println!("{}", serde_json::json!({ "consent_url": url }));
            } else {
                println!("{url}");
            }
            return Ok(());
        }
    };

    if cli.json {
        println!("{}", serde_json::json!({ "access_token": token }));
    } else {
        println!("{token}");
    }

    // The token is usable this run, but failing to save it is still an error.
    match manager.take_persist_error().await {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
