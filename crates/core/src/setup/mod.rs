use crate::{config::SetupConfig, lights::LightController, lock::RunLock, Result, SpotihueError};

/// Connects to the light bridge, retrying while the user presses the link
/// button. Only one pairing attempt runs at a time; a second caller gets
/// [`SpotihueError::AlreadyRunning`].
pub async fn setup_bridge(
    lights: &dyn LightController,
    lock: &RunLock,
    config: &SetupConfig,
) -> Result<()> {
    let token = uuid::Uuid::new_v4().to_string();
    lock.run_exclusive(&token, connect_with_retries(lights, config))
        .await
}

async fn connect_with_retries(lights: &dyn LightController, config: &SetupConfig) -> Result<()> {
    let attempts = config.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match lights.connect().await {
            Ok(()) => {
                tracing::info!(attempt, "connected to light bridge");
                return Ok(());
            }
            Err(err) if err.is_terminal() => return Err(err),
            Err(err) => {
                tracing::warn!(attempt, of = attempts, error = %err, "bridge connection failed");
                last_error = Some(err);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.backoff()).await;
        }
    }

    Err(last_error.unwrap_or_else(|| SpotihueError::msg("bridge setup made no attempts")))
}
