//! Minimal client for the instagram private (mobile) api.
//!
//! Only what the biography needs: login with session reuse, reading the current user and
//! replacing the biography.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

pub use session::{Session, Uuids};

use crate::config::{Env, Settings};
use crate::error::{Error, ErrorKind, Result};
use crate::profile::ProfileSink;

mod session;

const API_URL: &str = "https://i.instagram.com/api/v1";
const APP_ID: &str = "567067343352427";
const USER_AGENT: &str = "Instagram 269.0.0.18.75 Android (26/8.0.0; 480dpi; 1080x1920; OnePlus; 6T Dev; devitron; qcom; en_US; 314665256)";

/// Longest biography instagram accepts
pub const MAX_BIOGRAPHY_LEN: usize = 150;

/// Phrases instagram uses when it decides the account is automated
const THROTTLE_SIGNALS: [&str; 3] = [
    "feedback_required",
    "challenge_required",
    "Please wait a few minutes",
];

/// Body for the form encoded `signed_body` parameter
pub fn signed_body(data: &Value) -> String {
    format!("SIGNATURE.{data}")
}

/// Uniform delay between `min` and `max`
pub fn jitter((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Map a response onto its json body or the error it represents
pub fn classify(status: StatusCode, body: &str) -> Result<Value> {
    let json: Option<Value> = serde_json::from_str(body).ok();
    let failed = json
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(Value::as_str)
        == Some("fail");

    if status.is_success() && !failed {
        return json.ok_or_else(|| Error::Json(format!("expected json, got `{body}`")));
    }

    let message = json
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();
    let error_type = json
        .as_ref()
        .and_then(|v| v.get("error_type"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let spam = json
        .as_ref()
        .and_then(|v| v.get("spam"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if status == StatusCode::TOO_MANY_REQUESTS
        || spam
        || THROTTLE_SIGNALS
            .iter()
            .any(|signal| message.contains(signal) || body.contains(signal))
    {
        return Err(Error::Throttled(message));
    }

    if message == "login_required"
        || matches!(error_type, "bad_password" | "invalid_user" | "invalid_credentials")
        || status == StatusCode::UNAUTHORIZED
    {
        return Err(Error::auth(message));
    }

    Err(Error::Request {
        code: status.as_u16(),
        message,
    })
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    pk: Value,
    #[serde(default)]
    biography: String,
}

pub struct Instagram {
    client: reqwest::Client,
    session: Session,
    session_file: PathBuf,
    delay_range: (Duration, Duration),
}

impl Instagram {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            session: Session::default(),
            session_file: settings.session_file.clone(),
            delay_range: settings.delay_range(),
        })
    }

    /// Resume the saved session when it's still valid, otherwise log in with credentials
    pub async fn login(&mut self, env: &Env) -> Result<()> {
        let username = Env::require(&env.instagram_username, "INSTAGRAM_USERNAME")?;
        let password = Env::require(&env.instagram_password, "INSTAGRAM_PASSWORD")?;

        if let Some(session) = Session::load(&self.session_file) {
            self.session = session;
            match self.login_via_session(username, password).await {
                Ok(()) => return Ok(()),
                Err(err) => log::info!("Couldn't login user using session information: {err}"),
            }
        }

        log::info!("Attempting to login via credentials");
        self.session.reset();
        match self.login_with_credentials(username, password).await {
            Ok(()) => {
                self.session.persist(&self.session_file);
                Ok(())
            }
            Err(err) => {
                log::info!("Couldn't login user using credentials: {err}");
                Err(Error::auth("Couldn't login user"))
            }
        }
    }

    async fn login_via_session(&mut self, username: &str, password: &str) -> Result<()> {
        if !self.session.is_authorized() {
            return Err(Error::auth("session has no login"));
        }

        match self.current_user().await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::Auth => {
                log::info!("Session is invalid, logging in via credentials");
                self.session.reset();
                self.login_with_credentials(username, password).await?;
                self.session.persist(&self.session_file);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn login_with_credentials(&mut self, username: &str, password: &str) -> Result<()> {
        let uuids = &self.session.uuids;
        let data = json!({
            "jazoest": jazoest(&uuids.phone_id),
            "country_codes": "[{\"country_code\":\"1\",\"source\":[\"default\"]}]",
            "phone_id": uuids.phone_id,
            "enc_password": format!("#PWD_INSTAGRAM:0:{}:{password}", chrono::Utc::now().timestamp()),
            "username": username,
            "adid": uuids.advertising_id,
            "guid": uuids.uuid,
            "device_id": uuids.android_device_id,
            "google_tokens": "[]",
            "login_attempt_count": "0",
        });

        let (headers, body) = self.post("accounts/login/", &data).await?;

        let authorization = headers
            .get("ig-set-authorization")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::auth("instagram did not return an authorization header"))?;
        let user_id = body
            .pointer("/logged_in_user/pk")
            .map(|pk| pk.to_string().trim_matches('"').to_string())
            .ok_or_else(|| Error::auth("instagram did not return the logged in user"))?;

        self.session.authorization = Some(authorization.to_string());
        self.session.user_id = Some(user_id);
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        let body = self.get("accounts/current_user/?edit=true").await?;
        let current: CurrentUser = serde_json::from_value(body)?;
        log::debug!("Logged in to instagram as {}", current.user.pk);
        Ok(current.user)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let uuids = &self.session.uuids;
        let pairs = [
            ("X-IG-App-ID", APP_ID),
            ("X-IG-Device-ID", uuids.uuid.as_str()),
            ("X-IG-Android-ID", uuids.android_device_id.as_str()),
            ("X-IG-Capabilities", "3brTvx0="),
            ("X-IG-Connection-Type", "WIFI"),
            ("Accept-Language", "en-US"),
        ];
        for (key, value) in pairs {
            if let Ok(value) = value.parse() {
                headers.insert(key, value);
            }
        }
        if let Some(value) = self.session.authorization.as_deref().and_then(|a| a.parse().ok()) {
            headers.insert("Authorization", value);
        }
        headers
    }

    async fn get(&self, path: &str) -> Result<Value> {
        tokio::time::sleep(jitter(self.delay_range)).await;

        let response = self
            .client
            .get(format!("{API_URL}/{path}"))
            .headers(self.headers())
            .send()
            .await?;

        let status = response.status();
        classify(status, &response.text().await?)
    }

    async fn post(&self, path: &str, data: &Value) -> Result<(HeaderMap, Value)> {
        tokio::time::sleep(jitter(self.delay_range)).await;

        let response = self
            .client
            .post(format!("{API_URL}/{path}"))
            .headers(self.headers())
            .header("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8")
            .body(serde_urlencoded::to_string([("signed_body", signed_body(data))])?)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        Ok((headers, classify(status, &response.text().await?)?))
    }
}

/// Checksum field the mobile app derives from the phone id
fn jazoest(phone_id: &str) -> String {
    let sum: u32 = phone_id.bytes().map(u32::from).sum();
    format!("2{sum}")
}

impl ProfileSink for Instagram {
    fn max_biography_len(&self) -> Option<usize> {
        Some(MAX_BIOGRAPHY_LEN)
    }

    async fn read_biography(&mut self) -> Result<String> {
        Ok(self.current_user().await?.biography)
    }

    async fn set_biography(&mut self, text: &str) -> Result<()> {
        let uuids = &self.session.uuids;
        let data = json!({
            "raw_text": text,
            "_uuid": uuids.uuid,
            "_uid": self.session.user_id,
            "device_id": uuids.android_device_id,
        });

        let (_, body) = self.post("accounts/set_biography/", &data).await?;
        match body.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            _ => Err(Error::Request {
                code: 200,
                message: format!("Couldn't update biography: {body}"),
            }),
        }
    }
}
