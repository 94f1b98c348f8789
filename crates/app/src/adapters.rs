//! Development adapters for running the loop without vendor services.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use spotihue_core::{
    select_artwork_url, ArtworkFetcher, ArtworkImage, Fixture, HttpArtworkFetcher,
    LightCommand, LightController, Result, SpotihueError, TrackInfo, TrackSource,
};

/// Contents of the now-playing file. Either give `artwork_url` directly or
/// list the available `images` and let the selection policy pick one.
#[derive(Debug, Deserialize)]
struct NowPlaying {
    name: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
    #[serde(default)]
    artwork_url: Option<String>,
    #[serde(default)]
    images: Vec<ArtworkImage>,
    #[serde(default = "playing")]
    is_playing: bool,
}

fn playing() -> bool {
    true
}

impl From<NowPlaying> for TrackInfo {
    fn from(now: NowPlaying) -> Self {
        let artwork_url = now.artwork_url.or_else(|| select_artwork_url(&now.images));
        let track = TrackInfo::new(now.name, now.artist, now.album, artwork_url);
        if now.is_playing {
            track
        } else {
            track.paused()
        }
    }
}

/// Track source that re-reads a JSON file on every poll. A missing file
/// means nothing is playing.
#[derive(Debug, Clone)]
pub struct NowPlayingFile {
    path: PathBuf,
}

impl NowPlayingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TrackSource for NowPlayingFile {
    async fn current_track(&self) -> Result<Option<TrackInfo>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let now: NowPlaying = serde_json::from_str(&contents).map_err(|err| {
            SpotihueError::SourceUnavailable(format!("{}: {err}", self.path.display()))
        })?;
        Ok(Some(now.into()))
    }
}

/// Fetches `http(s)` artwork over the network and anything else from disk.
#[derive(Debug, Clone)]
pub struct LocalOrHttpArtwork {
    http: HttpArtworkFetcher,
}

impl LocalOrHttpArtwork {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpArtworkFetcher::new()?,
        })
    }
}

#[async_trait]
impl ArtworkFetcher for LocalOrHttpArtwork {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.http.fetch(url).await;
        }
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        tokio::fs::read(path)
            .await
            .map_err(|err| SpotihueError::ArtworkFetch(format!("{}: {err}", path.display())))
    }
}

/// Light controller that only logs the commands it would send.
#[derive(Debug, Clone, Default)]
pub struct LoggingLights {
    fixtures: Vec<Fixture>,
}

impl LoggingLights {
    pub fn new(names: &[String]) -> Self {
        Self {
            fixtures: names.iter().map(Fixture::color).collect(),
        }
    }
}

#[async_trait]
impl LightController for LoggingLights {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_fixtures(&self) -> Result<Vec<Fixture>> {
        Ok(self.fixtures.clone())
    }

    async fn apply(&self, fixture: &Fixture, command: LightCommand) -> Result<()> {
        match command {
            LightCommand::Color(color) => {
                tracing::info!(fixture = %fixture.name, x = color.x, y = color.y, "set color")
            }
            LightCommand::Neutral {
                brightness,
                hue,
                saturation,
            } => tracing::info!(
                fixture = %fixture.name,
                brightness,
                ?hue,
                ?saturation,
                "set neutral"
            ),
        }
        Ok(())
    }
}
