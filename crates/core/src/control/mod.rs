//! Inbound control surface: start, stop and observe the sync loop.
//!
//! The run id in [`keys::RUN_ID`] is the source of truth for "running", so a
//! controller backed by a shared [`SqliteStore`](crate::store::SqliteStore)
//! can stop a loop owned by another process. Loops started by this
//! controller are additionally cancelled through their local token.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    artwork::ArtworkFetcher,
    config::AppConfig,
    extract::ColorExtractor,
    lights::{resolve_fixtures, Fixture, LightController},
    lock::{RunLock, SETUP_BRIDGE_LOCK, SYNC_LOOP_LOCK},
    setup,
    store::{keys, StateStore},
    sync::{SyncLoop, SyncReport},
    track::{TrackInfo, TrackSource},
    Result, SpotihueError,
};

/// Adapters the controller drives.
#[derive(Clone)]
pub struct Dependencies {
    pub tracks: Arc<dyn TrackSource>,
    pub artwork: Arc<dyn ArtworkFetcher>,
    pub lights: Arc<dyn LightController>,
    pub store: Arc<dyn StateStore>,
}

/// Identifies one started run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub running: bool,
    pub run_id: Option<String>,
}

struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<SyncReport>>>,
}

pub struct Controller {
    config: AppConfig,
    deps: Dependencies,
    active: Mutex<Option<ActiveRun>>,
}

impl Controller {
    /// Fails with [`SpotihueError::Config`] when `config` does not validate.
    pub fn new(config: AppConfig, deps: Dependencies) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            deps,
            active: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Spawns the sync loop for `fixtures` on the current tokio runtime.
    ///
    /// Fixture names are resolved against the bridge first; unknown or
    /// unreachable names are dropped and an empty result is an error. Fails
    /// with [`SpotihueError::AlreadyRunning`] while another run holds the
    /// loop lock.
    pub async fn start(&self, fixtures: &[String], no_track_retries: u32) -> Result<RunHandle> {
        let available = self.deps.lights.list_fixtures().await?;
        let resolved: Vec<String> = resolve_fixtures(fixtures, &available)
            .into_iter()
            .map(|fixture| fixture.name)
            .collect();
        if resolved.is_empty() {
            return Err(SpotihueError::NoFixtures(fixtures.to_vec()));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let ttl = self.config.lock.max_duration();
        let lock = RunLock::new(SYNC_LOOP_LOCK, self.deps.store.clone(), ttl);

        let guard = lock.acquire_for(&run_id)?;
        if !guard.acquired() {
            return Err(SpotihueError::AlreadyRunning(SYNC_LOOP_LOCK.to_string()));
        }
        if !self
            .deps
            .store
            .set_if_vacant_or_same(keys::RUN_ID, &run_id, ttl)?
        {
            return Err(SpotihueError::AlreadyRunning(SYNC_LOOP_LOCK.to_string()));
        }

        let cancel = CancellationToken::new();
        let mut sync = SyncLoop::new(
            self.config.sync.clone(),
            ColorExtractor::new(self.config.extraction.clone()),
            self.deps.tracks.clone(),
            self.deps.artwork.clone(),
            self.deps.lights.clone(),
            self.deps.store.clone(),
        )
        .with_run_id(run_id.clone(), ttl);

        let store = self.deps.store.clone();
        let task_run_id = run_id.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let result = sync.run(&resolved, no_track_retries, &task_cancel).await;
            release_run_id(store.as_ref(), &task_run_id);
            result
        });

        tracing::info!(run_id = %run_id, fixtures = ?fixtures, no_track_retries, "started sync run");

        *self.active()? = Some(ActiveRun {
            run_id: run_id.clone(),
            cancel,
            task: Some(task),
        });
        Ok(RunHandle { run_id })
    }

    /// Stops the run identified by `handle`. Fails with
    /// [`SpotihueError::NotRunning`] if it is not the active run.
    pub fn stop(&self, handle: &RunHandle) -> Result<()> {
        let current = self.deps.store.get(keys::RUN_ID)?;
        if current.as_deref() != Some(handle.run_id.as_str()) {
            return Err(SpotihueError::NotRunning);
        }
        self.withdraw(&handle.run_id)
    }

    /// Stops whichever run is active and returns its id.
    pub fn stop_current(&self) -> Result<RunHandle> {
        let run_id = self
            .deps
            .store
            .get(keys::RUN_ID)?
            .ok_or(SpotihueError::NotRunning)?;
        self.withdraw(&run_id)?;
        Ok(RunHandle { run_id })
    }

    pub fn status(&self) -> Result<Status> {
        let run_id = self.deps.store.get(keys::RUN_ID)?;
        Ok(Status {
            running: run_id.is_some(),
            run_id,
        })
    }

    /// Waits for a run started by this controller to finish.
    pub async fn wait(&self, handle: &RunHandle) -> Result<SyncReport> {
        let task = {
            let mut active = self.active()?;
            match active.as_mut() {
                Some(run) if run.run_id == handle.run_id => run.task.take(),
                _ => None,
            }
        };
        let task = task.ok_or(SpotihueError::NotRunning)?;

        task.await
            .map_err(|err| SpotihueError::msg(format!("sync task failed: {err}")))?
    }

    /// Track seen on the most recent tick, if any.
    pub fn current_track(&self) -> Result<Option<TrackInfo>> {
        match self.deps.store.get(keys::TRACK_INFORMATION)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn available_lights(&self) -> Result<Vec<Fixture>> {
        self.deps.lights.list_fixtures().await
    }

    /// Whether the bridge accepts a connection right now.
    pub async fn bridge_ready(&self) -> bool {
        match self.deps.lights.connect().await {
            Ok(()) => true,
            Err(err) => {
                tracing::info!(error = %err, "light bridge is not ready");
                false
            }
        }
    }

    pub async fn setup_bridge(&self) -> Result<()> {
        let lock = RunLock::new(
            SETUP_BRIDGE_LOCK,
            self.deps.store.clone(),
            self.config.lock.max_duration(),
        );
        setup::setup_bridge(self.deps.lights.as_ref(), &lock, &self.config.setup).await
    }

    fn withdraw(&self, run_id: &str) -> Result<()> {
        self.deps.store.delete(keys::RUN_ID)?;
        if let Some(run) = self.active()?.as_ref().filter(|run| run.run_id == run_id) {
            run.cancel.cancel();
        }
        tracing::info!(run_id, "stop requested");
        Ok(())
    }

    fn active(&self) -> Result<MutexGuard<'_, Option<ActiveRun>>> {
        self.active
            .lock()
            .map_err(|_| SpotihueError::msg("controller state has been poisoned"))
    }
}

/// Deletes the run id if it still names `run_id`.
fn release_run_id(store: &dyn StateStore, run_id: &str) {
    let released = store.get(keys::RUN_ID).and_then(|current| {
        if current.as_deref() == Some(run_id) {
            store.delete(keys::RUN_ID)
        } else {
            Ok(())
        }
    });
    if let Err(err) = released {
        tracing::error!(run_id, error = %err, "failed to release run id");
    }
}
