use std::fmt::{Debug, Formatter};

use base64::Engine;

use crate::config::Env;
use crate::error::Result;

/// Spotify app registration
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    client_secret: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// `CLIENT_ID` and `CLIENT_SECRET`
    pub fn from_env(env: &Env) -> Result<Self> {
        Ok(Self::new(
            Env::require(&env.client_id, "CLIENT_ID")?,
            Env::require(&env.client_secret, "CLIENT_SECRET")?,
        ))
    }

    /// Value for a `Basic` authorization header
    pub fn auth(&self) -> String {
        let auth = format!("{}:{}", self.client_id, self.client_secret);
        base64::engine::general_purpose::STANDARD.encode(auth.as_bytes())
    }
}
