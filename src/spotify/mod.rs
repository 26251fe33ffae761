//! Spotify web api client that reports what the user is listening to.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use dialoguer::Input;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use tokio::net::TcpListener;

pub use auth::{AuthCodeResponse, AuthToken, Callback, OAuth};
pub use credentials::Credentials;

use crate::config::{Env, Settings};
use crate::error::{Error, Result};
use crate::playback::{MusicSource, PlaybackState};
use response::CurrentlyPlaying;

pub mod auth;
mod credentials;
pub mod response;

const API_URL: &str = "https://api.spotify.com/v1";

#[macro_export]
macro_rules! scopes {
    ($($scope: ident),* $(,)?) => {
        std::collections::HashSet::from_iter(vec![$(stringify!($scope).replace("_", "-"),)*])
    };
}

/// Seconds from a `Retry-After` header
fn retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Hosts the callback server can listen on
fn is_local(uri: &hyper::Uri) -> bool {
    matches!(uri.host(), Some("localhost" | "127.0.0.1"))
}

pub struct Spotify {
    oauth: OAuth,
    client: reqwest::Client,
}

impl Spotify {
    pub fn new(credentials: Credentials, settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        let scopes: HashSet<String> = scopes!(user_read_playback_state);

        Ok(Self {
            oauth: OAuth::new(credentials, scopes, settings.token_cache.clone(), client.clone()),
            client,
        })
    }

    /// Headless login from `REFRESH_TOKEN`
    pub async fn login(&mut self, env: &Env) -> Result<()> {
        let refresh_token = Env::require(&env.refresh_token, "REFRESH_TOKEN")?;
        self.oauth.login(refresh_token).await
    }

    /// Run the authorization code flow and return the refresh token it minted.
    ///
    /// A localhost `REDIRECT_URI` is served here and opened in the browser. Any other redirect
    /// is opened by hand and the resulting url pasted back in.
    pub async fn authorize(&mut self, env: &Env) -> Result<String> {
        let redirect = Env::require(&env.redirect_uri, "REDIRECT_URI")?.to_string();
        let uri: hyper::Uri = redirect
            .parse()
            .map_err(|e| Error::config(format!("invalid REDIRECT_URI: {e}")))?;

        let url = self.oauth.authorization_url(&redirect)?;
        let code = if is_local(&uri) {
            self.listen_for_code(&uri, &url).await?
        } else {
            self.prompt_for_code(&url).await?
        };

        let token = self.oauth.request_token(&code, &redirect).await?;
        token
            .refresh_token()
            .map(str::to_string)
            .ok_or_else(|| Error::auth("spotify did not return a refresh token"))
    }

    async fn listen_for_code(&self, uri: &hyper::Uri, url: &str) -> Result<String> {
        // Mini http server to serve callback and parse auth code from spotify
        let addr = SocketAddr::from(([127, 0, 0, 1], uri.port_u16().unwrap_or(80)));
        let listener = TcpListener::bind(addr).await?;
        log::info!("Listening for the spotify callback on {addr}");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback = Callback::new(uri.path(), self.oauth.state(), tx);
        let handle = tokio::task::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        log::error!("Failed to accept spotify callback connection: {err}");
                        continue;
                    }
                };
                let io = hyper_util::rt::TokioIo::new(stream);

                let cb = callback.clone();
                tokio::task::spawn(async move {
                    if let Err(err) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, cb)
                        .await
                    {
                        log::error!("Error serving connection to spotify callback: {err:?}");
                    }
                });
            }
        });

        // When the user accepts, the callback is triggered and the code is sent back
        if let Err(err) = open::that(url) {
            log::warn!("Couldn't open a browser ({err}), visit this url to continue: {url}");
        }

        let result = rx
            .recv()
            .await
            .unwrap_or_else(|| Err(Error::auth("spotify did not send a response")));
        handle.abort();
        result
    }

    async fn prompt_for_code(&self, url: &str) -> Result<String> {
        println!("Open this url and accept the authorization request:\n\n{url}\n");

        let pasted = tokio::task::spawn_blocking(|| {
            Input::<String>::new()
                .with_prompt("Paste the url you were redirected to")
                .interact_text()
        })
        .await
        .map_err(|e| Error::auth(format!("prompt failed: {e}")))?
        .map_err(|e| Error::auth(format!("prompt failed: {e}")))?;

        let query = pasted.split_once('?').map(|(_, q)| q).unwrap_or(pasted.as_str());
        AuthCodeResponse::code(query, &self.oauth.state())
    }

    /// `GET /me/player/currently-playing`. Nothing playing is `Ok(None)`.
    pub async fn currently_playing(&mut self) -> Result<Option<CurrentlyPlaying>> {
        let header = self.oauth.update().await?.to_header();

        let response = self
            .client
            .get(format!("{API_URL}/me/player/currently-playing"))
            .query(&[("additional_types", "track,episode")])
            .header("Authorization", header)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK => {
                let body = response.text().await?;
                if body.trim().is_empty() {
                    return Ok(None);
                }
                let jd = &mut serde_json::Deserializer::from_str(&body);
                serde_path_to_error::deserialize(jd)
                    .map(Some)
                    .map_err(|e| Error::Json(e.to_string()))
            }
            StatusCode::UNAUTHORIZED => {
                self.oauth.invalidate();
                Err(Error::InvalidToken)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited {
                retry_after: retry_after(response.headers().get(RETRY_AFTER)),
            }),
            status => {
                let message = response.text().await.unwrap_or_default();
                log::debug!("[{status}] {message}");
                Err(Error::Request {
                    code: status.as_u16(),
                    message,
                })
            }
        }
    }
}

impl MusicSource for Spotify {
    async fn current_playback(&mut self) -> Result<Option<PlaybackState>> {
        Ok(self
            .currently_playing()
            .await?
            .and_then(CurrentlyPlaying::into_playback))
    }
}
