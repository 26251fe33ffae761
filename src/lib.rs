use std::path::PathBuf;

pub mod config;
pub mod error;
pub mod instagram;
pub mod logging;
pub mod playback;
pub mod poll;
pub mod profile;
pub mod spotify;

pub use error::{Error, ErrorKind, Result};

lazy_static::lazy_static! {
    pub static ref CONFIG_PATH: PathBuf = {
        let home = home::home_dir().unwrap_or_else(|| PathBuf::from("."));
        #[cfg(windows)]
        return home.join(".biotify");
        #[cfg(not(windows))]
        return home.join(".config/biotify");
    };
}
