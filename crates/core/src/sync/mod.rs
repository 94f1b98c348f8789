//! The polling loop that keeps the lights in step with the album artwork.
//!
//! Each tick asks the track source what is playing, compares the artwork URL
//! with the one last pushed to the fixtures and only re-derives colors when
//! it changed. Ticks are strictly sequential; the only suspensions are the
//! fixed no-track backoff and the jittered pause between ticks, both of which
//! end early on cancellation.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    artwork::ArtworkFetcher,
    config::SyncConfig,
    extract::{ColorExtractor, LightColor},
    lights::LightController,
    store::{keys, StateStore},
    track::{TrackInfo, TrackSource},
    Result, SpotihueError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Idle,
    Running,
    Polling,
    /// Waiting out the backoff after a poll found nothing playing.
    NoTrackRetry,
    Syncing,
    Stopped,
}

/// Why a run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Nothing was playing and the retry budget ran out.
    NoTrack,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub reason: StopReason,
    pub ticks: u64,
    /// Ticks that pushed new colors.
    pub syncs: u64,
    /// Total no-track retries over the whole run.
    pub retries_spent: u32,
}

/// Result of a tick that found a playing track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Artwork matches what is already on the fixtures.
    Unchanged,
    /// The track has no artwork to derive colors from.
    NoArtwork,
    Synced,
}

/// Run id record refreshed every tick. Losing it means someone stopped the
/// run from the outside.
#[derive(Debug, Clone)]
struct Heartbeat {
    run_id: String,
    ttl: Duration,
}

pub struct SyncLoop {
    config: SyncConfig,
    extractor: ColorExtractor,
    tracks: Arc<dyn TrackSource>,
    artwork: Arc<dyn ArtworkFetcher>,
    lights: Arc<dyn LightController>,
    store: Arc<dyn StateStore>,
    heartbeat: Option<Heartbeat>,
    state: LoopState,
}

impl SyncLoop {
    pub fn new(
        config: SyncConfig,
        extractor: ColorExtractor,
        tracks: Arc<dyn TrackSource>,
        artwork: Arc<dyn ArtworkFetcher>,
        lights: Arc<dyn LightController>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            extractor,
            tracks,
            artwork,
            lights,
            store,
            heartbeat: None,
            state: LoopState::Idle,
        }
    }

    /// Ties the loop to the run id stored under [`keys::RUN_ID`]. The record's
    /// TTL is extended every tick; once it disappears or names another run,
    /// the loop treats it as a stop request.
    pub fn with_run_id(mut self, run_id: impl Into<String>, ttl: Duration) -> Self {
        self.heartbeat = Some(Heartbeat {
            run_id: run_id.into(),
            ttl,
        });
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Sets `fixtures` to neutral and then polls until nothing has been
    /// playing for `no_track_retries` consecutive backoffs, or until
    /// `cancel` fires.
    ///
    /// Returns an error only when the bridge is lost or keeps rejecting
    /// commands; every other failure is logged and the loop moves on.
    pub async fn run(
        &mut self,
        fixtures: &[String],
        no_track_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let result = self.run_ticks(fixtures, no_track_retries, cancel).await;
        self.transition(LoopState::Stopped);

        match &result {
            Ok(report) => tracing::info!(
                reason = ?report.reason,
                ticks = report.ticks,
                syncs = report.syncs,
                "sync loop stopped"
            ),
            Err(err) => tracing::error!(error = %err, "sync loop aborted"),
        }
        result
    }

    async fn run_ticks(
        &mut self,
        fixtures: &[String],
        no_track_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        if fixtures.is_empty() {
            return Err(SpotihueError::NoFixtures(Vec::new()));
        }

        self.transition(LoopState::Running);
        let mut report = SyncReport {
            reason: StopReason::Cancelled,
            ticks: 0,
            syncs: 0,
            retries_spent: 0,
        };
        let mut failures = FailureCounter::new(self.config.max_fixture_failures);

        if let Err(err) = self.lights.set_neutral(fixtures).await {
            failures.record(err)?;
        }

        let mut retries_in_a_row = 0;
        loop {
            if self.is_cancelled(cancel) {
                report.reason = StopReason::Cancelled;
                return Ok(report);
            }

            report.ticks += 1;
            self.transition(LoopState::Polling);

            let Some(track) = self.poll().await else {
                if retries_in_a_row >= no_track_retries {
                    tracing::info!("nothing playing and no retries left");
                    report.reason = StopReason::NoTrack;
                    return Ok(report);
                }

                retries_in_a_row += 1;
                report.retries_spent += 1;
                self.transition(LoopState::NoTrackRetry);
                tracing::info!(
                    attempt = retries_in_a_row,
                    of = no_track_retries,
                    backoff = ?self.config.no_track_backoff(),
                    "nothing playing, retrying"
                );
                if !sleep_or_cancel(self.config.no_track_backoff(), cancel).await {
                    report.reason = StopReason::Cancelled;
                    return Ok(report);
                }
                continue;
            };

            retries_in_a_row = 0;
            self.record_track(&track);

            match self.sync_track(&track, fixtures).await {
                Ok(TickOutcome::Synced) => {
                    report.syncs += 1;
                    failures.reset();
                }
                Ok(outcome) => tracing::trace!(?outcome, "nothing to push"),
                Err(err @ (SpotihueError::FixtureControl(_) | SpotihueError::BridgeLost(_))) => {
                    failures.record(err)?;
                }
                Err(err) => tracing::warn!(
                    track = %track.name,
                    error = %err,
                    "skipping tick"
                ),
            }

            if !sleep_or_cancel(self.jittered_interval(), cancel).await {
                report.reason = StopReason::Cancelled;
                return Ok(report);
            }
        }
    }

    /// Performs change detection and, when the artwork changed, the full
    /// fetch → extract → push cycle.
    ///
    /// The URL is only recorded once the fixtures accepted the colors, or
    /// when the artwork itself turned out to be unusable, so transient
    /// failures are retried on the next tick.
    pub async fn sync_track(&mut self, track: &TrackInfo, fixtures: &[String]) -> Result<TickOutcome> {
        let Some(url) = track.artwork_url.as_deref().filter(|url| !url.is_empty()) else {
            tracing::debug!(track = %track.name, "track has no artwork");
            return Ok(TickOutcome::NoArtwork);
        };

        let last = self.store.get(keys::LAST_ARTWORK_URL)?;
        if last.as_deref() == Some(url) {
            return Ok(TickOutcome::Unchanged);
        }

        self.transition(LoopState::Syncing);
        let artwork = self.artwork.fetch(url).await?;

        let colors = match self.extract(artwork).await {
            Ok(colors) => colors,
            Err(err) => {
                self.store.set(keys::LAST_ARTWORK_URL, url, None)?;
                return Err(err);
            }
        };

        self.lights.set_colors(fixtures, &colors).await?;
        self.store.set(keys::LAST_ARTWORK_URL, url, None)?;

        tracing::info!(
            track = %track.name,
            artist = %track.artist,
            colors = ?colors,
            "synced lights to artwork"
        );
        Ok(TickOutcome::Synced)
    }

    async fn poll(&self) -> Option<TrackInfo> {
        match self.tracks.current_track().await {
            Ok(Some(track)) if track.is_playing => Some(track),
            Ok(Some(track)) => {
                tracing::debug!(track = %track.name, "track is paused");
                None
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "could not query current track");
                None
            }
        }
    }

    async fn extract(&self, artwork: Vec<u8>) -> Result<Vec<LightColor>> {
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.derive_light_colors(&artwork))
            .await
            .map_err(|err| SpotihueError::msg(format!("color extraction task failed: {err}")))?
    }

    fn record_track(&self, track: &TrackInfo) {
        let stored = serde_json::to_string(track)
            .map_err(SpotihueError::from)
            .and_then(|json| self.store.set(keys::TRACK_INFORMATION, &json, None));
        if let Err(err) = stored {
            tracing::warn!(error = %err, "could not record track information");
        }
    }

    fn is_cancelled(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            tracing::info!("sync loop cancelled");
            return true;
        }

        let Some(heartbeat) = &self.heartbeat else {
            return false;
        };
        match self
            .store
            .refresh_if_same(keys::RUN_ID, &heartbeat.run_id, heartbeat.ttl)
        {
            Ok(true) => false,
            Ok(false) => {
                tracing::info!(run_id = %heartbeat.run_id, "run id withdrawn, stopping");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not refresh run id");
                false
            }
        }
    }

    fn jittered_interval(&self) -> Duration {
        let min = self.config.poll_interval_min();
        let max = self.config.poll_interval_max();
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "sync loop state");
            self.state = next;
        }
    }
}

impl std::fmt::Debug for SyncLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLoop")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

/// Consecutive fixture failures; a lost bridge or too many failures in a
/// row end the run.
struct FailureCounter {
    limit: u32,
    consecutive: u32,
}

impl FailureCounter {
    fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive: 0,
        }
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }

    fn record(&mut self, err: SpotihueError) -> Result<()> {
        if err.is_terminal() {
            return Err(err);
        }

        self.consecutive += 1;
        tracing::warn!(
            error = %err,
            consecutive = self.consecutive,
            limit = self.limit,
            "fixture control failed"
        );
        if self.consecutive >= self.limit {
            return Err(SpotihueError::BridgeLost(format!(
                "{} consecutive fixture failures, last: {err}",
                self.consecutive
            )));
        }
        Ok(())
    }
}

/// Sleeps for `duration` unless `cancel` fires first. Returns `false` when
/// cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
