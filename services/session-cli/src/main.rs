//! session-fetch
//!
//! Command-line client for a bearer-token API:
//! 1. `login` stores an access/refresh pair in the credentials file
//! 2. `request` calls the API with the stored access token
//! 3. An expired access token is refreshed and the request replayed transparently
//! 4. A rejected refresh token logs the session out

mod config;

use anyhow::{Context, Result, bail};
use common::Secret;
use reqwest::Method;
use session_auth::{CredentialPair, CredentialStore, FileCredentialStore, HttpRefreshEndpoint};
use session_client::{AuthClient, RequestDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::ReqwestTransport;

use crate::config::Config;

const USAGE: &str = "usage: session-fetch [--config PATH] <command>

commands:
  login <ACCESS_TOKEN> <REFRESH_TOKEN>   store a session
  logout                                 forget the stored session
  status                                 report whether a session is stored
  request <METHOD> <PATH> [JSON_BODY]    send an authenticated request";

/// What the user asked for on the command line
#[derive(Debug, PartialEq)]
enum Command {
    Login {
        access: Secret<String>,
        refresh: Secret<String>,
    },
    Logout,
    Status,
    Request {
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
    },
}

/// Parsed command line: optional `--config` plus one command
#[derive(Debug, PartialEq)]
struct Cli {
    config_path: Option<String>,
    command: Command,
}

impl Cli {
    /// Parse arguments, excluding the program name.
    fn parse(args: &[String]) -> Result<Self> {
        let mut config_path = None;
        let mut positional = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--config" {
                let path = iter.next().context("--config requires a path")?;
                config_path = Some(path.clone());
            } else {
                positional.push(arg.as_str());
            }
        }

        let command = match positional.as_slice() {
            ["login", access, refresh] => Command::Login {
                access: Secret::new(access.to_string()),
                refresh: Secret::new(refresh.to_string()),
            },
            ["logout"] => Command::Logout,
            ["status"] => Command::Status,
            ["request", method, path, rest @ ..] if rest.len() <= 1 => {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .with_context(|| format!("invalid HTTP method: {method}"))?;
                let body = rest
                    .first()
                    .map(|raw| serde_json::from_str(raw))
                    .transpose()
                    .context("request body must be valid JSON")?;
                Command::Request {
                    method,
                    path: path.to_string(),
                    body,
                }
            }
            _ => bail!("{USAGE}"),
        };

        Ok(Self {
            config_path,
            command,
        })
    }
}

/// Wire the authenticated client from configuration.
async fn build_client(config: &Config) -> Result<(AuthClient, Arc<FileCredentialStore>)> {
    let http = reqwest::Client::new();
    let timeout = Duration::from_secs(config.api.timeout_secs);
    let transport = Arc::new(ReqwestTransport::new(
        http.clone(),
        config.api.base_url.clone(),
        timeout,
    ));
    let store = Arc::new(
        FileCredentialStore::load(config.credentials.path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to load credentials from {}",
                    config.credentials.path.display()
                )
            })?,
    );
    let refresher = Arc::new(HttpRefreshEndpoint::new(
        http,
        &config.api.base_url,
        &config.api.refresh_path,
        timeout,
    ));

    let client = AuthClient::new(
        transport,
        store.clone(),
        refresher,
        config.api.refresh_path.clone(),
    );
    Ok((client, store))
}

/// Run one command and return what should be printed on stdout.
async fn execute(
    command: Command,
    client: &AuthClient,
    store: &FileCredentialStore,
) -> Result<String> {
    match command {
        Command::Login { access, refresh } => {
            client
                .login(CredentialPair::new(
                    access.expose().as_str(),
                    refresh.expose().as_str(),
                ))
                .await
                .context("failed to store session")?;
            info!(path = %store.path().display(), "session stored");
            Ok("logged in".to_string())
        }
        Command::Logout => {
            client.logout().await.context("failed to clear session")?;
            Ok("logged out".to_string())
        }
        Command::Status => Ok(match store.get().await {
            Some(_) => format!("logged in ({})", store.path().display()),
            None => "logged out".to_string(),
        }),
        Command::Request { method, path, body } => {
            let mut request = RequestDescriptor::new(method, path);
            if let Some(body) = body {
                request = request.json(&body)?;
            }
            match client.send(request).await {
                Ok(response) => Ok(response.text()),
                Err(session_client::Error::Status(response)) => {
                    bail!("{}: {}", response.status, response.text())
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr with LOG_LEVEL / RUST_LOG support; stdout carries response bodies
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse(&args)?;

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        refresh_path = %config.api.refresh_path,
        credentials = %config.credentials.path.display(),
        "configuration loaded"
    );

    let (client, store) = build_client(&config).await?;
    let output = execute(cli.command, &client, &store).await?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use std::path::Path;
    use tokio::net::TcpListener;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_login_holds_tokens_as_secrets() {
        let cli = Cli::parse(&args(&["login", "at_1", "rt_1"])).unwrap();
        assert_eq!(cli.config_path, None);
        match &cli.command {
            Command::Login { access, refresh } => {
                assert_eq!(access.expose(), "at_1");
                assert_eq!(refresh.expose(), "rt_1");
            }
            other => panic!("expected login, got {other:?}"),
        }
        assert!(!format!("{cli:?}").contains("at_1"));
    }

    #[test]
    fn parse_config_flag_anywhere() {
        let cli = Cli::parse(&args(&["status", "--config", "/etc/sf.toml"])).unwrap();
        assert_eq!(cli.config_path.as_deref(), Some("/etc/sf.toml"));
        assert_eq!(cli.command, Command::Status);

        let cli = Cli::parse(&args(&["--config", "a.toml", "logout"])).unwrap();
        assert_eq!(cli.config_path.as_deref(), Some("a.toml"));
        assert_eq!(cli.command, Command::Logout);
    }

    #[test]
    fn parse_request_with_and_without_body() {
        let cli = Cli::parse(&args(&["request", "get", "/posts/feed?page=2"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Request {
                method: Method::GET,
                path: "/posts/feed?page=2".into(),
                body: None,
            }
        );

        let cli = Cli::parse(&args(&["request", "POST", "/posts", r#"{"caption":"hi"}"#])).unwrap();
        assert_eq!(
            cli.command,
            Command::Request {
                method: Method::POST,
                path: "/posts".into(),
                body: Some(serde_json::json!({"caption": "hi"})),
            }
        );
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(Cli::parse(&args(&[])).is_err());
        assert!(Cli::parse(&args(&["login", "only-one"])).is_err());
        assert!(Cli::parse(&args(&["request", "GET"])).is_err());
        assert!(Cli::parse(&args(&["request", "GET", "/x", "{not json"])).is_err());
        assert!(Cli::parse(&args(&["request", "GET", "/x", "{}", "extra"])).is_err());
        assert!(Cli::parse(&args(&["status", "--config"])).is_err());
    }

    /// Mock API: `/api/me` accepts only `Bearer T2`; the refresh route
    /// trades `RT1` for `T2/RT2` and rejects anything else.
    async fn start_api() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new()
            .route(
                "/api/me",
                axum::routing::get(|headers: HeaderMap| async move {
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Bearer T2") => (StatusCode::OK, r#"{"username":"f8"}"#),
                        _ => (StatusCode::UNAUTHORIZED, r#"{"message":"Unauthorized"}"#),
                    }
                }),
            )
            .route(
                "/api/auth/refresh-token",
                axum::routing::post(|axum::Json(req): axum::Json<serde_json::Value>| async move {
                    if req["refreshToken"] == "RT1" {
                        (
                            StatusCode::OK,
                            r#"{"data":{"accessToken":"T2","refreshToken":"RT2"}}"#,
                        )
                    } else {
                        (StatusCode::UNAUTHORIZED, r#"{"message":"Refresh token expired"}"#)
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}/api")
    }

    fn test_config(base_url: String, credentials: &Path) -> Config {
        Config {
            api: config::ApiConfig {
                base_url,
                refresh_path: session_auth::REFRESH_PATH.into(),
                timeout_secs: 5,
            },
            credentials: config::CredentialsConfig {
                path: credentials.to_path_buf(),
            },
        }
    }

    fn login(access: &str, refresh: &str) -> Command {
        Command::Login {
            access: Secret::new(access.to_string()),
            refresh: Secret::new(refresh.to_string()),
        }
    }

    fn get(path: &str) -> Command {
        Command::Request {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let base = start_api().await;
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join(session_auth::SESSION_FILE);
        let config = test_config(base, &credentials);

        let (client, store) = build_client(&config).await.unwrap();
        execute(login("T1", "RT1"), &client, &store).await.unwrap();

        let body = execute(get("/me"), &client, &store).await.unwrap();
        assert_eq!(body, r#"{"username":"f8"}"#);

        // A fresh process picks up the refreshed pair from disk
        let (client, store) = build_client(&config).await.unwrap();
        assert_eq!(store.get().await, Some(CredentialPair::new("T2", "RT2")));
        let body = execute(get("/me"), &client, &store).await.unwrap();
        assert_eq!(body, r#"{"username":"f8"}"#);
    }

    #[tokio::test]
    async fn rejected_refresh_logs_out() {
        let base = start_api().await;
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("auth.json");
        let config = test_config(base, &credentials);

        let (client, store) = build_client(&config).await.unwrap();
        execute(login("T1", "RT_revoked"), &client, &store).await.unwrap();
        assert!(credentials.exists());

        let err = execute(get("/me"), &client, &store).await.unwrap_err();
        assert!(err.to_string().contains("token refresh failed"), "got: {err}");
        assert!(store.get().await.is_none());
        assert!(!credentials.exists());

        let status = execute(Command::Status, &client, &store).await.unwrap();
        assert_eq!(status, "logged out");
    }

    #[tokio::test]
    async fn status_and_logout() {
        let base = start_api().await;
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("auth.json");
        let config = test_config(base, &credentials);

        let (client, store) = build_client(&config).await.unwrap();
        assert_eq!(
            execute(Command::Status, &client, &store).await.unwrap(),
            "logged out"
        );

        execute(login("T1", "RT1"), &client, &store).await.unwrap();
        let status = execute(Command::Status, &client, &store).await.unwrap();
        assert!(status.starts_with("logged in"), "got: {status}");
        assert!(!status.contains("T1"));

        execute(Command::Logout, &client, &store).await.unwrap();
        assert!(!credentials.exists());
    }

    #[tokio::test]
    async fn hung_refresh_endpoint_is_bounded_by_configured_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route(
                "/api/me",
                axum::routing::get(|| async { (StatusCode::UNAUTHORIZED, "expired") }),
            )
            .route(
                "/api/auth/refresh-token",
                axum::routing::post(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    StatusCode::OK
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(format!("http://{addr}/api"), &dir.path().join("auth.json"));
        config.api.timeout_secs = 1;

        let (client, store) = build_client(&config).await.unwrap();
        execute(login("T1", "RT1"), &client, &store).await.unwrap();

        let started = std::time::Instant::now();
        let err = execute(get("/me"), &client, &store).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "got: {err}");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!client.coordinator().is_refreshing());
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let base = start_api().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(base, &dir.path().join("auth.json"));

        let (client, store) = build_client(&config).await.unwrap();
        execute(login("T2", "RT2"), &client, &store).await.unwrap();

        let err = execute(get("/missing"), &client, &store).await.unwrap_err();
        assert!(err.to_string().starts_with("404"), "got: {err}");
    }
}
