use serde::Deserialize;

use crate::playback::PlaybackState;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimplifiedArtist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Show {
    pub name: String,
    #[serde(default)]
    pub publisher: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    Track {
        name: String,
        #[serde(default)]
        artists: Vec<SimplifiedArtist>,
    },
    Episode {
        name: String,
        show: Show,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PlayingType {
    Track,
    Episode,
    Ad,
    Unknown,
}

/// `GET /me/player/currently-playing`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CurrentlyPlaying {
    pub is_playing: bool,
    pub currently_playing_type: PlayingType,
    pub progress_ms: Option<u64>,
    pub item: Option<Item>,
}

impl CurrentlyPlaying {
    /// Reduce to what the biography needs. Ads and private sessions carry no item.
    pub fn into_playback(self) -> Option<PlaybackState> {
        let (track, artist) = match self.item? {
            Item::Track { name, artists } => {
                let artist = artists.into_iter().next().map(|a| a.name).unwrap_or_default();
                (name, artist)
            }
            Item::Episode { name, show } => (name, show.name),
        };

        Some(PlaybackState {
            is_playing: self.is_playing,
            track_name: track,
            artist_name: artist,
        })
    }
}
