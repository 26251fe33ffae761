use std::future::Future;

use crate::error::Result;

/// Biography used whenever nothing is audibly playing
pub const NOTHING_PLAYING: &str = "Currently listening to nothing";

/// Normalized view of what the music service reports as playing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub track_name: String,
    pub artist_name: String,
}

impl PlaybackState {
    pub fn playing<T: Into<String>, A: Into<String>>(track: T, artist: A) -> Self {
        Self {
            is_playing: true,
            track_name: track.into(),
            artist_name: artist.into(),
        }
    }

    pub fn paused<T: Into<String>, A: Into<String>>(track: T, artist: A) -> Self {
        Self {
            is_playing: false,
            ..Self::playing(track, artist)
        }
    }

    /// `Track by Artist`, or empty when paused
    pub fn now_playing(&self) -> String {
        if !self.is_playing {
            return String::new();
        }
        format!("{} by {}", self.track_name, self.artist_name)
    }
}

/// Biography text for a poll result. Paused and silent both map to [`NOTHING_PLAYING`].
pub fn biography(state: Option<&PlaybackState>) -> String {
    match state.map(PlaybackState::now_playing) {
        Some(song) if !song.is_empty() => format!("Currently listening to: {song}"),
        _ => NOTHING_PLAYING.to_string(),
    }
}

/// Anything that can answer "what is playing right now".
///
/// Implementations make exactly one request per call and never retry; the poll loop owns
/// retry and backoff policy.
pub trait MusicSource {
    fn current_playback(&mut self) -> impl Future<Output = Result<Option<PlaybackState>>>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn playing_track_is_rendered() {
        let state = PlaybackState::playing("Teardrop", "Massive Attack");
        assert_eq!(
            biography(Some(&state)),
            "Currently listening to: Teardrop by Massive Attack"
        );
    }

    #[test]
    fn paused_is_nothing_playing() {
        let state = PlaybackState::paused("Teardrop", "Massive Attack");
        assert_eq!(state.now_playing(), "");
        assert_eq!(biography(Some(&state)), NOTHING_PLAYING);
    }

    #[test]
    fn silence_is_nothing_playing() {
        assert_eq!(biography(None), NOTHING_PLAYING);
    }

    #[test]
    fn same_state_same_candidate() {
        let first = PlaybackState::playing("A", "B");
        let second = PlaybackState::playing("A", "B");
        assert_eq!(biography(Some(&first)), biography(Some(&second)));
    }
}
