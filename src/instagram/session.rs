use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Device identifiers the mobile client sends with every request.
///
/// These survive a re-login so instagram keeps seeing the same device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uuids {
    pub phone_id: String,
    pub uuid: String,
    pub client_session_id: String,
    pub advertising_id: String,
    pub android_device_id: String,
}

impl Uuids {
    pub fn generate() -> Self {
        let android = Uuid::new_v4().simple().to_string();
        Self {
            phone_id: Uuid::new_v4().to_string(),
            uuid: Uuid::new_v4().to_string(),
            client_session_id: Uuid::new_v4().to_string(),
            advertising_id: Uuid::new_v4().to_string(),
            android_device_id: format!("android-{}", &android[..16]),
        }
    }
}

/// Everything needed to resume a logged in instagram session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub uuids: Uuids,
    /// `Bearer IGT:2:...` header issued at login
    #[serde(default)]
    pub authorization: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            uuids: Uuids::generate(),
            authorization: None,
            user_id: None,
        }
    }
}

impl Session {
    pub fn load(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                log::info!("Couldn't load session information: {err}");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(err) => {
                log::info!("Couldn't load session information: {err}");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::write(path, serde_json::to_string_pretty(self)?)?)
    }

    /// Save the session, carrying on with the in memory one when that fails
    pub fn persist(&self, path: &Path) -> bool {
        match self.save(path) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Couldn't save session information to {}: {err}", path.display());
                false
            }
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some() && self.user_id.is_some()
    }

    /// Drop the login but keep the device identity
    pub fn reset(&mut self) {
        self.authorization = None;
        self.user_id = None;
    }
}
