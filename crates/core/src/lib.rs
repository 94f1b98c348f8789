//! Core library for SpotiHue.
//!
//! SpotiHue keeps a set of smart lights in step with the album artwork of the
//! track currently playing on a streaming account. Each module owns one
//! piece of that pipeline: the track source and light controller adapter
//! seams, the color extractor, the shared state store with its singleton run
//! lock, and the synchronization loop tying them together behind a
//! [`Controller`].

pub mod artwork;
pub mod config;
pub mod control;
pub mod error;
pub mod extract;
pub mod lights;
pub mod lock;
pub mod setup;
pub mod store;
pub mod sync;
pub mod track;

pub use artwork::{ArtworkFetcher, HttpArtworkFetcher};
pub use config::{AppConfig, ExtractionConfig, LockConfig, SetupConfig, SyncConfig};
pub use control::{Controller, Dependencies, RunHandle, Status};
pub use error::{Result, SpotihueError};
pub use extract::{derive_light_colors, ColorExtractor, LightColor};
pub use lights::{Fixture, LightCommand, LightController};
pub use lock::{LockGuard, RunLock};
pub use store::{MemoryStore, SqliteStore, StateStore};
pub use sync::{LoopState, StopReason, SyncLoop, SyncReport};
pub use track::{select_artwork_url, ArtworkImage, TrackInfo, TrackSource};
