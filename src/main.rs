use std::process::ExitCode;

use color_eyre::Result;

use biotify::config::{Env, Mode, Settings};
use biotify::instagram::Instagram;
use biotify::logging;
use biotify::poll::{PollConfig, PollLoop};
use biotify::spotify::{Credentials, Spotify};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let settings = Settings::load_with_fallback(["biotify.yml", "biotify.yaml"])?;
    logging::init(&settings)?;

    let env = match Env::load() {
        Ok(env) => env,
        Err(err) => {
            log::error!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    match env.mode {
        Mode::Dev => Ok(dev(&env, &settings).await),
        Mode::Server => Ok(server(&env, &settings).await),
    }
}

/// Mint a refresh token for `REFRESH_TOKEN` and exit
async fn dev(env: &Env, settings: &Settings) -> ExitCode {
    let minted: biotify::Result<String> = async {
        let mut spotify = Spotify::new(Credentials::from_env(env)?, settings)?;
        spotify.authorize(env).await
    }
    .await;

    match minted {
        Ok(refresh_token) => {
            log::info!("Spotify refresh token: {refresh_token}");
            log::info!("Save it as REFRESH_TOKEN and restart with ENV=server");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("Couldn't login user: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn server(env: &Env, settings: &Settings) -> ExitCode {
    let spotify = async {
        let mut spotify = Spotify::new(Credentials::from_env(env)?, settings)?;
        spotify.login(env).await?;
        Ok::<_, biotify::Error>(spotify)
    };
    let spotify = match spotify.await {
        Ok(spotify) => {
            log::info!("Spotify server login successful");
            spotify
        }
        Err(err) => {
            log::error!("Couldn't login to spotify: {err}");
            return ExitCode::FAILURE;
        }
    };

    let instagram = async {
        let mut instagram = Instagram::new(settings)?;
        instagram.login(env).await?;
        Ok::<_, biotify::Error>(instagram)
    };
    let instagram = match instagram.await {
        Ok(instagram) => {
            log::info!("Instagram login successful");
            instagram
        }
        Err(err) => {
            log::error!("Couldn't login to instagram: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut poll = PollLoop::new(spotify, instagram, PollConfig::from(settings));
    tokio::select! {
        _ = poll.run() => ExitCode::SUCCESS,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received Ctrl-C, shutting down");
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn server_without_credentials_exits_before_polling() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            token_cache: dir.path().join("token.json"),
            session_file: dir.path().join("session.json"),
            ..Settings::default()
        };
        let env = Env::from_pairs([("ENV", "server"), ("INSTAGRAM_USERNAME", "someone")]).unwrap();

        assert_eq!(server(&env, &settings).await, ExitCode::FAILURE);
        assert!(!settings.session_file.exists());
    }
}
