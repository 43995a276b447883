use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to connect to Chrome: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("No page available")]
    NoPage,

    #[error("Capture host is no longer available: {0}")]
    HostInvalidated(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Invalid DOM snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("No recording session is active")]
    NotRecording,

    #[error("No clicks were captured in this session")]
    NoData,

    #[error("Transfer {transfer_id} is incomplete: {reason}")]
    TransferIncomplete { transfer_id: u64, reason: String },

    #[error("Transfer protocol violation: {0}")]
    Protocol(String),

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Automation engine error: {0}")]
    Engine(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl RecorderError {
    /// Whether the capture context is gone and listeners should be removed.
    pub fn is_host_invalidated(&self) -> bool {
        matches!(self, RecorderError::HostInvalidated(_))
    }

    /// Short operator-facing status line.
    pub fn status_message(&self) -> String {
        match self {
            RecorderError::NoData => {
                "No clicks captured. Capture at least one click before stopping.".to_string()
            }
            RecorderError::NotRecording => "Not recording".to_string(),
            RecorderError::HostInvalidated(_) => "Browser connection lost".to_string(),
            RecorderError::Engine(msg) => format!("Engine error: {}", msg),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
