use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Snapshot of the track the streaming account is currently on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub name: String,
    pub artist: String,
    pub album: String,
    /// Artwork chosen with [`select_artwork_url`]; `None` when the service
    /// provided no image.
    pub artwork_url: Option<String>,
    /// `false` when the track is loaded but paused.
    #[serde(default = "default_playing")]
    pub is_playing: bool,
}

fn default_playing() -> bool {
    true
}

impl TrackInfo {
    pub fn new(
        name: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        artwork_url: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
            album: album.into(),
            artwork_url,
            is_playing: true,
        }
    }

    pub fn paused(mut self) -> Self {
        self.is_playing = false;
        self
    }
}

/// One size of album artwork offered by the streaming service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Picks the second smallest image, or the only one when fewer than two
/// exist. Medium-sized artwork is plenty for color extraction and keeps
/// downloads small. Ties keep the order the service listed them in.
pub fn select_artwork_url(images: &[ArtworkImage]) -> Option<String> {
    let mut by_area: Vec<&ArtworkImage> = images.iter().collect();
    by_area.sort_by_key(|image| u64::from(image.width) * u64::from(image.height));

    match by_area.as_slice() {
        [] => None,
        [only] => Some(only.url.clone()),
        [_, second, ..] => Some(second.url.clone()),
    }
}

/// Read access to the "now playing" state of the streaming account.
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Returns the current track, `Ok(None)` when nothing is loaded, and an
    /// error when the service could not be queried.
    async fn current_track(&self) -> Result<Option<TrackInfo>>;

    /// Whether a track is loaded and actively playing. Query failures count
    /// as "not playing".
    async fn is_playing(&self) -> bool {
        match self.current_track().await {
            Ok(track) => track.is_some_and(|track| track.is_playing),
            Err(err) => {
                tracing::warn!(error = %err, "could not query playback state");
                false
            }
        }
    }
}
