use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, Duration, Local};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use callback::{AuthCodeResponse, Callback};

use super::Credentials;
use crate::error::{Error, Result};

mod callback;

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

fn to_base64<S>(data: &String, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data.as_bytes()))
}

fn from_base64<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.as_bytes())
        .map_err(serde::de::Error::custom)?;
    String::from_utf8(bytes).map_err(serde::de::Error::custom)
}

fn to_base64_option<S>(data: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let data = data
        .as_ref()
        .map(|v| base64::engine::general_purpose::STANDARD.encode(v.as_bytes()));
    Option::<String>::serialize(&data, serializer)
}

fn from_base64_option<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(s) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.as_bytes())
        .map_err(serde::de::Error::custom)?;
    Ok(Some(String::from_utf8(bytes).map_err(serde::de::Error::custom)?))
}

/// Body of a successful `POST /api/token`
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    scope: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

/// Body of a rejected `POST /api/token`
#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    error_description: Option<String>,
}

/// Authentication token information for spotify
///
/// `access_token` and `refresh_token` are stored as base64 strings to prevent data being stored in
/// plaintext
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    token_type: String,
    scopes: HashSet<String>,
    expires: DateTime<Local>,
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    access_token: String,
    #[serde(
        default,
        serialize_with = "to_base64_option",
        deserialize_with = "from_base64_option"
    )]
    refresh_token: Option<String>,
}

impl AuthToken {
    /// A token that only knows how to refresh itself
    pub fn from_refresh_token(refresh_token: &str) -> Self {
        Self {
            token_type: String::from("Bearer"),
            scopes: HashSet::new(),
            expires: Local::now() - Duration::seconds(12),
            access_token: String::new(),
            refresh_token: Some(refresh_token.to_string()),
        }
    }

    /// Check if the auth token is expired with 10 seconds leeway for slower requests
    pub fn is_expired(&self) -> bool {
        self.expires < (Local::now() + Duration::seconds(10))
    }

    pub fn expire(&mut self) {
        self.expires = Local::now() - Duration::seconds(12);
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Get the auth header for the token
    ///
    /// # Example
    ///
    /// `Bearer 1POdFZRZbvb...qqillRxMr2z`
    pub fn to_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::write(path, serde_json::to_string(self)?)?)
    }

    /// Save to the cache, keeping the in memory token usable when that fails
    pub fn persist(&self, path: &Path) -> bool {
        match self.save(path) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Couldn't write token cache {}: {err}", path.display());
                false
            }
        }
    }

    /// Cached token, if there is a readable one
    pub fn load(path: &Path) -> Option<Self> {
        let token = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&token) {
            Ok(token) => Some(token),
            Err(err) => {
                log::warn!("Ignoring unreadable token cache {}: {err}", path.display());
                None
            }
        }
    }

    /// Apply a refresh response in place. Spotify only sometimes rotates the refresh token.
    pub fn parse_refresh(&mut self, value: &str) -> Result<()> {
        let token = AuthToken::from_str(value)?;
        self.access_token = token.access_token;
        self.token_type = token.token_type;
        self.expires = token.expires;
        if !token.scopes.is_empty() {
            self.scopes = token.scopes;
        }
        if token.refresh_token.is_some() {
            self.refresh_token = token.refresh_token;
        }
        Ok(())
    }
}

impl FromStr for AuthToken {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let jd = &mut serde_json::Deserializer::from_str(s);
        let response: TokenResponse = serde_path_to_error::deserialize(jd)
            .map_err(|e| Error::Json(format!("failed to parse AuthToken: {e}")))?;

        Ok(Self {
            token_type: response.token_type,
            scopes: response
                .scope
                .split(' ')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
            expires: Local::now() + Duration::seconds(response.expires_in),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        })
    }
}

/// Turn a failed token request into an [`Error::Auth`]
fn token_error(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<TokenError>(body) {
        Ok(TokenError {
            error,
            error_description: Some(description),
        }) => Error::auth(format!("{error}: {description}")),
        Ok(TokenError { error, .. }) => Error::auth(error),
        Err(_) if status.is_server_error() => Error::Request {
            code: status.as_u16(),
            message: body.to_string(),
        },
        Err(_) => Error::auth(format!("[{status}] {body}")),
    }
}

/// Authorization code flow with a cached, self refreshing token
#[derive(Debug)]
pub struct OAuth {
    credentials: Credentials,
    scopes: HashSet<String>,
    state: Uuid,
    cache: PathBuf,
    token: Option<AuthToken>,
    client: reqwest::Client,
}

impl OAuth {
    pub fn new(
        credentials: Credentials,
        scopes: HashSet<String>,
        cache: PathBuf,
        client: reqwest::Client,
    ) -> Self {
        Self {
            token: AuthToken::load(&cache),
            credentials,
            scopes,
            state: Uuid::new_v4(),
            cache,
            client,
        }
    }

    /// Anti forgery value sent with the authorization request
    pub fn state(&self) -> String {
        self.state.to_string()
    }

    pub fn authorization_url(&self, redirect_uri: &str) -> Result<String> {
        let mut scopes = self.scopes.iter().cloned().collect::<Vec<_>>();
        scopes.sort();

        let query = serde_urlencoded::to_string([
            ("client_id", self.credentials.client_id.clone()),
            ("response_type", "code".to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("scope", scopes.join(" ")),
            ("state", self.state()),
            ("show_dialog", "true".to_string()),
        ])?;
        Ok(format!("{AUTHORIZE_URL}?{query}"))
    }

    /// Exchange an authorization code for a new token and cache it
    pub async fn request_token(&mut self, code: &str, redirect_uri: &str) -> Result<&AuthToken> {
        let body = serde_urlencoded::to_string([
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])?;

        let response = self
            .client
            .post(TOKEN_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Authorization", format!("Basic {}", self.credentials.auth()))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(token_error(status, &body));
        }

        let token = AuthToken::from_str(&body)?;
        if token.refresh_token.is_none() {
            return Err(Error::auth("spotify did not return a refresh token"));
        }
        token.persist(&self.cache);
        Ok(&*self.token.insert(token))
    }

    /// Start from a known refresh token. A cached token minted from the same refresh token is
    /// reused while it's still valid.
    pub async fn login(&mut self, refresh_token: &str) -> Result<()> {
        let cached = self
            .token
            .take()
            .filter(|token| token.refresh_token() == Some(refresh_token));

        self.token = Some(cached.unwrap_or_else(|| AuthToken::from_refresh_token(refresh_token)));
        self.update().await?;
        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<()> {
        let Some(token) = &mut self.token else {
            return Err(Error::auth("no spotify token, run with ENV=dev to create one"));
        };
        let Some(refresh_token) = token.refresh_token.clone() else {
            return Err(Error::auth("spotify token has no refresh token"));
        };

        let response = self
            .client
            .post(TOKEN_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Authorization", format!("Basic {}", self.credentials.auth()))
            .body(serde_urlencoded::to_string([
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(token_error(status, &body));
        }

        token.parse_refresh(&body)?;
        if token.refresh_token() != Some(refresh_token.as_str()) {
            log::warn!("Spotify rotated the refresh token, update REFRESH_TOKEN from the token cache");
        }
        token.persist(&self.cache);
        log::debug!("Refreshed spotify access token");
        Ok(())
    }

    /// Refresh the access token if it has expired and return it
    pub async fn update(&mut self) -> Result<&AuthToken> {
        let expired = match &self.token {
            Some(token) => token.is_expired(),
            None => return Err(Error::auth("no spotify token, run with ENV=dev to create one")),
        };
        if expired {
            self.refresh().await?;
        }
        self.token
            .as_ref()
            .ok_or_else(|| Error::auth("no spotify token, run with ENV=dev to create one"))
    }

    /// Force a refresh before the next request
    pub fn invalidate(&mut self) {
        if let Some(token) = &mut self.token {
            token.expire();
        }
    }
}
