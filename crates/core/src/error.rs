/// Result alias that carries the custom [`SpotihueError`] type.
pub type Result<T> = std::result::Result<T, SpotihueError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SpotihueError {
    /// Free-form message for conditions that do not deserve their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed pixel data or extraction parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Artwork bytes are not a decodable image.
    #[error("failed to decode artwork: {0}")]
    Decode(#[from] image::ImageError),
    /// The track source could not be queried.
    #[error("track source unavailable: {0}")]
    SourceUnavailable(String),
    /// Album artwork could not be downloaded.
    #[error("failed to fetch artwork: {0}")]
    ArtworkFetch(String),
    /// A single fixture command failed; the next tick may succeed.
    #[error("fixture control failed: {0}")]
    FixtureControl(String),
    /// The light bridge is gone and further commands are pointless.
    #[error("lost connection to light bridge: {0}")]
    BridgeLost(String),
    /// None of the requested fixtures are available.
    #[error("no reachable fixtures among {0:?}")]
    NoFixtures(Vec<String>),
    /// Another holder owns the singleton lock for this routine.
    #[error("{0} is already running")]
    AlreadyRunning(String),
    /// A stop or wait targeted a run that is not the active one.
    #[error("sync loop is not running")]
    NotRunning,
    /// Failure reported by the SQLite state store.
    #[error("state store error: {0}")]
    Store(#[from] rusqlite::Error),
    /// Wrapper around JSON (de)serialization errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl SpotihueError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether a light controller error should end the sync loop outright.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BridgeLost(_))
    }
}

impl From<&str> for SpotihueError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SpotihueError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bridge_loss_is_terminal() {
        assert!(SpotihueError::BridgeLost("timeout".into()).is_terminal());
        assert!(!SpotihueError::FixtureControl("busy".into()).is_terminal());
        assert!(!SpotihueError::NotRunning.is_terminal());
    }

    #[test]
    fn messages_are_human_readable() {
        let err = SpotihueError::AlreadyRunning("sync_loop".into());
        assert_eq!(err.to_string(), "sync_loop is already running");

        let err = SpotihueError::NoFixtures(vec!["Desk".into()]);
        assert!(err.to_string().contains("Desk"));
    }
}
