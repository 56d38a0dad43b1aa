use thiserror::Error;

/// Failures reported by a media engine or one of its native sessions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("failed to create peer connection: {0}")]
    SessionCreation(String),

    #[error("{0}")]
    Description(String),

    #[error("failed to add track: {0}")]
    Track(String),

    #[error("failed to add ice candidate: {0}")]
    Candidate(String),

    #[error("stats unavailable: {0}")]
    Stats(String),

    #[error("dispose failed: {0}")]
    Dispose(String),
}

impl From<webrtc::Error> for EngineError {
    fn from(err: webrtc::Error) -> Self {
        EngineError::Description(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture start failed: {0}")]
    Start(String),

    #[error("capture stop failed: {0}")]
    Stop(String),

    #[error("capture format not supported: {width}x{height}@{fps}")]
    Format { width: u32, height: u32, fps: u32 },
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed signaling message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected signaling message: {0}")]
    Unexpected(String),

    #[error("gateway send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by the public client API.
///
/// Operation failures are not returned here: they are delivered as
/// [`ClientEvent::Error`](crate::events::ClientEvent::Error). These variants
/// only cover the plumbing around the worker.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to start executor: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("executor is no longer running")]
    WorkerGone,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("logger already installed")]
    Logger,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
