use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::CONFIG_PATH;

/// Which entry point `main` runs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Mint a spotify refresh token interactively and exit
    #[default]
    Dev,
    /// Run the poll loop unattended
    Server,
}

/// Credentials and mode read from the process environment (and `.env`)
#[derive(Debug, Default, Deserialize)]
pub struct Env {
    #[serde(rename = "env", default)]
    pub mode: Mode,
    pub instagram_username: Option<String>,
    pub instagram_password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
}

impl Env {
    pub fn load() -> Result<Self> {
        // A missing .env is fine, the variables may come from the service manager
        let _ = dotenvy::dotenv();
        envy::from_env().map_err(Error::config)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter(pairs.into_iter().map(|(k, v)| (k.into(), v.into()))).map_err(Error::config)
    }

    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        match value.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::config(format!("missing environment variable {name}"))),
        }
    }
}

/// Tunables loaded from `biotify.yml`. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Max api calls per `window_secs`
    pub quota: u32,
    pub window_secs: u64,
    /// Calls a plain cycle costs; reserved before the cycle starts
    pub requests_per_cycle: u32,
    pub settle_delay_secs: u64,
    pub cooldown_secs: u64,
    pub error_backoff_secs: u64,
    pub cycle_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Random delay in seconds in front of every instagram request
    pub delay_range: [u64; 2],
    pub session_file: PathBuf,
    pub token_cache: PathBuf,
    pub log_file: PathBuf,
    pub log_max_bytes: u64,
    pub log_backups: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quota: 80,
            window_secs: 30,
            requests_per_cycle: 2,
            settle_delay_secs: 17,
            cooldown_secs: 24 * 60 * 60,
            error_backoff_secs: 30,
            cycle_delay_ms: 330,
            request_timeout_secs: 30,
            delay_range: [10, 30],
            session_file: PathBuf::from("session.json"),
            token_cache: CONFIG_PATH.join("cache/token.json"),
            log_file: PathBuf::from("biotify.log"),
            log_max_bytes: 10 * 1024 * 1024,
            log_backups: 5,
        }
    }
}

impl Settings {
    /// Load the first settings file that exists, or the defaults when none do
    pub fn load_with_fallback<const N: usize>(paths: [&str; N]) -> Result<Self> {
        let file = paths.iter().map(PathBuf::from).find(|path| path.exists());

        let settings = match file {
            None => Settings::default(),
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                Self::parse(&content)
                    .map_err(|e| Error::config(format!("{}: {e}", path.display())))?
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // An empty file deserializes to unit, not to a map
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests_per_cycle == 0 {
            return Err(Error::config("requests_per_cycle must be at least 1"));
        }
        if self.quota < self.requests_per_cycle {
            return Err(Error::config(format!(
                "quota ({}) is smaller than requests_per_cycle ({})",
                self.quota, self.requests_per_cycle
            )));
        }
        if self.quota < 2 {
            return Err(Error::config("quota must allow at least a read and a write"));
        }
        if self.window_secs == 0 {
            return Err(Error::config("window_secs must be greater than 0"));
        }
        if self.delay_range[0] > self.delay_range[1] {
            return Err(Error::config("delay_range must be [min, max]"));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.delay_range[0]),
            Duration::from_secs(self.delay_range[1]),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = Settings::parse("settle_delay_secs: 5\ncooldown_secs: 3600\n").unwrap();
        assert_eq!(settings.settle_delay(), Duration::from_secs(5));
        assert_eq!(settings.cooldown(), Duration::from_secs(3600));
        assert_eq!(settings.quota, 80);
        assert_eq!(settings.window(), Duration::from_secs(30));
        assert_eq!(settings.cycle_delay(), Duration::from_millis(330));
    }

    #[test]
    fn empty_file_is_default() {
        let settings = Settings::parse("  \n").unwrap();
        assert_eq!(settings.requests_per_cycle, 2);
    }

    #[test]
    fn quota_below_cycle_cost_is_rejected() {
        let settings = Settings { quota: 1, requests_per_cycle: 2, ..Settings::default() };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_settings_file_falls_back() {
        let settings = Settings::load_with_fallback(["does-not-exist.yml"]).unwrap();
        assert_eq!(settings.error_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn env_mode_and_credentials() {
        let env = Env::from_pairs([
            ("ENV", "server"),
            ("CLIENT_ID", "abc"),
            ("INSTAGRAM_USERNAME", ""),
        ])
        .unwrap();

        assert_eq!(env.mode, Mode::Server);
        assert_eq!(Env::require(&env.client_id, "CLIENT_ID").unwrap(), "abc");
        assert!(Env::require(&env.instagram_username, "INSTAGRAM_USERNAME").is_err());
        assert!(Env::require(&env.refresh_token, "REFRESH_TOKEN").is_err());
    }

    #[test]
    fn mode_defaults_to_dev() {
        let env = Env::from_pairs(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(env.mode, Mode::Dev);
    }

    #[test]
    fn unknown_mode_is_a_config_error() {
        assert!(matches!(Env::from_pairs([("ENV", "prod")]), Err(Error::Config(_))));
    }
}
