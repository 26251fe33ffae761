use std::fmt::{Display, Formatter};
use std::time::Duration;

use color_eyre::{Report, Section};

pub type Result<T> = std::result::Result<T, Error>;

/// How the poll loop should react to an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration. Only raised before the loop starts.
    Config,
    /// Credentials or session rejected by the remote service
    Auth,
    /// Network blips, 5xx responses, unexpected payloads
    Transient,
    /// Anti-automation throttling on the profile service
    Throttled,
    /// Input rejected before any request was made
    Validation,
}

#[derive(Debug)]
pub enum Error {
    Config(String),
    Auth(String),
    /// Access token expired or was revoked mid-flight
    InvalidToken,
    /// Spotify asked us to slow down
    RateLimited { retry_after: Option<Duration> },
    Throttled(String),
    Validation(String),
    Request { code: u16, message: String },
    Json(String),
    Http(reqwest::Error),
    Io(std::io::Error),
}

impl Error {
    pub fn config<S: Display>(message: S) -> Self {
        Error::Config(message.to_string())
    }

    pub fn auth<S: Display>(message: S) -> Self {
        Error::Auth(message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Throttled(_) => ErrorKind::Throttled,
            Error::Validation(_) => ErrorKind::Validation,
            Error::InvalidToken
            | Error::RateLimited { .. }
            | Error::Request { .. }
            | Error::Json(_)
            | Error::Http(_)
            | Error::Io(_) => ErrorKind::Transient,
        }
    }

    /// Minimum wait the remote service asked for, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(message) => write!(f, "configuration error: {message}"),
            Error::Auth(message) => write!(f, "authentication failed: {message}"),
            Error::InvalidToken => write!(f, "access token is invalid or expired"),
            Error::RateLimited { retry_after: Some(wait) } => {
                write!(f, "rate limited, retry after {}s", wait.as_secs())
            }
            Error::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Error::Throttled(message) => write!(f, "throttled: {message}"),
            Error::Validation(message) => write!(f, "invalid input: {message}"),
            Error::Request { code, message } => write!(f, "[{code}] {message}"),
            Error::Json(message) => write!(f, "unexpected response body: {message}"),
            Error::Http(err) => write!(f, "{err}"),
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Http(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(value.to_string())
    }
}

impl From<serde_urlencoded::ser::Error> for Error {
    fn from(value: serde_urlencoded::ser::Error) -> Self {
        Error::Json(value.to_string())
    }
}

impl From<Error> for Report {
    fn from(value: Error) -> Self {
        let suggestion = match &value {
            Error::Config(_) => "Check the environment variables and biotify.yml",
            Error::Auth(_) => "Verify the credentials, or mint a new refresh token with ENV=dev",
            Error::InvalidToken => "The token is invalid or expired, try refreshing it",
            Error::RateLimited { .. } | Error::Throttled(_) => "Try again later",
            Error::Validation(_) => "The biography must not be empty",
            Error::Request { .. } | Error::Json(_) | Error::Http(_) | Error::Io(_) => {
                "Check the network connection and try again later"
            }
        };
        Report::msg(value.to_string()).suggestion(suggestion)
    }
}
