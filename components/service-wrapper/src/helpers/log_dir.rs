// Local crates
use crate::helpers::load_config::LogMode;
use crate::launcher::errors::LaunchError;

// External crates
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tracing::instrument;

/// Make sure the log directory exists.
///
/// Succeeds silently when it is already there; fails only on a genuine
/// filesystem error such as a permission problem or a file occupying the
/// path.
#[instrument(
    name = "wrapper_log_dir",
    target = "helpers::log_dir",
    level = "debug",
    skip_all,
    fields(path = %path.display())
)]
pub async fn ensure_log_dir(path: &Path) -> Result<(), LaunchError> {
    match fs::create_dir_all(path).await {
        Ok(()) => {
            tracing::debug!("Log directory is present");
            Ok(())
        }
        Err(source) => {
            tracing::error!(error = %source, "Failed to create log directory");
            Err(LaunchError::LogDir {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Path the capture file is rolled over to.
#[must_use]
pub fn rollover_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

/// Open the capture file according to `mode`, rolling an oversized
/// previous file over to `<file>.1` first when `max_bytes` is set.
#[instrument(
    name = "wrapper_capture_file",
    target = "helpers::log_dir",
    level = "debug",
    skip_all,
    fields(path = %path.display())
)]
pub async fn open_capture_file(
    path: &Path,
    mode: LogMode,
    max_bytes: Option<u64>,
) -> Result<File, LaunchError> {
    let capture_err = |source| LaunchError::CaptureFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(limit) = max_bytes {
        if let Ok(meta) = fs::metadata(path).await {
            if meta.len() > limit {
                let rolled = rollover_path(path);
                tracing::info!(
                    size = meta.len(),
                    limit,
                    rolled_to = %rolled.display(),
                    "Capture file over size limit, rolling over"
                );
                fs::rename(path, &rolled).await.map_err(capture_err)?;
            }
        }
    }

    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        LogMode::Append => options.append(true),
        LogMode::Truncate => options.write(true).truncate(true),
    };

    options.open(path).await.map_err(capture_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn creating_twice_is_fine() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("log");

        ensure_log_dir(&dir).await.unwrap();
        ensure_log_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn a_file_in_the_way_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("log");
        std::fs::write(&dir, b"not a directory").unwrap();

        let err = ensure_log_dir(&dir).await.unwrap_err();
        assert!(matches!(err, LaunchError::LogDir { .. }));
    }

    #[tokio::test]
    async fn append_keeps_previous_output() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("out.log");
        std::fs::write(&path, b"first\n").unwrap();

        let mut file = open_capture_file(&path, LogMode::Append, None).await.unwrap();
        file.write_all(b"second\n").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn truncate_starts_empty() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("out.log");
        std::fs::write(&path, b"stale output\n").unwrap();

        let mut file = open_capture_file(&path, LogMode::Truncate, None).await.unwrap();
        file.write_all(b"fresh\n").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[tokio::test]
    async fn oversized_file_is_rolled_over() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("out.log");
        std::fs::write(&path, b"0123456789").unwrap();

        let file = open_capture_file(&path, LogMode::Append, Some(4)).await.unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), b"");
        assert_eq!(std::fs::read(rollover_path(&path)).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn small_file_is_not_rolled_over() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("out.log");
        std::fs::write(&path, b"abc").unwrap();

        drop(open_capture_file(&path, LogMode::Append, Some(1024)).await.unwrap());

        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert!(!rollover_path(&path).exists());
    }
}
