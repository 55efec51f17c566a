use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Python not installed or not found in PATH")]
    PythonNotFound,

    #[error("Python is not loaded yet")]
    NotLoaded,

    #[error("Python is already loaded")]
    AlreadyLoaded,

    #[error("Python interpreter exited unexpectedly")]
    InterpreterExited,

    #[error("{0}")]
    LoadFailed(String),

    #[error("Package manager unavailable: {0}")]
    PackageManager(String),

    #[error("Failed to install packages {packages:?}: {message}")]
    PackageInstall {
        packages: Vec<String>,
        message: String,
    },

    /// Failure raised by the Python code itself; the message is the traceback text.
    #[error("{0}")]
    Execution(String),

    #[error("Invalid image payload: {0}")]
    InvalidImage(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl WorkerError {
    /// Whether the interpreter can still serve requests after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::InterpreterExited | WorkerError::IoError(_) | WorkerError::Protocol(_)
        )
    }
}
