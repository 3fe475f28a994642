// External crates
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for wrapper-side failures that are not a launch problem.
pub const EXIT_WRAPPER_FAILURE: i32 = 1;
/// Exit code when the program exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit code when the program cannot be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Everything that can stop the wrapper before the child's own exit status
/// is known.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The installation root is missing or not a directory.
    #[error("installation root {0} does not exist or is not a directory")]
    InstallRoot(PathBuf),

    /// The log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    LogDir {
        /// Directory that was being created.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// The capture file could not be opened or rolled over.
    #[error("failed to open capture file {path}: {source}")]
    CaptureFile {
        /// Capture file path.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// The child process could not be started.
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        /// Program that was being started.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Waiting on the running child failed.
    #[error("failed waiting for child process: {0}")]
    Wait(#[source] io::Error),
}

impl LaunchError {
    /// Exit code the wrapper should terminate with for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Spawn { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => EXIT_NOT_FOUND,
                io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
                _ => EXIT_WRAPPER_FAILURE,
            },
            _ => EXIT_WRAPPER_FAILURE,
        }
    }
}
