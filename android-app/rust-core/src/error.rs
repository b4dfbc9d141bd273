use thiserror::Error;

/// Errors that can occur in the sensor bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Sampler already running")]
    AlreadyRunning,
    #[error("Sampler not running")]
    NotRunning,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JNI error: {0}")]
    Jni(#[from] jni::errors::Error),
    #[error("Polling thread failed: {0}")]
    PollThread(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
