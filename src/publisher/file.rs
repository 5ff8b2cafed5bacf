use crate::error::PublishError;
use crate::publisher::Publisher;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Writes the artifact to a `.prom` file by atomic replacement
///
/// The text goes to a temporary file next to the target which is then renamed
/// over it, so the textfile collector only ever reads complete files.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    target: PathBuf,
}

impl FilePublisher {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Create the target directory
    ///
    /// Called once at startup; failure here is fatal for the exporter.
    pub fn prepare(&self) -> Result<(), PublishError> {
        fs::create_dir_all(self.directory())?;
        Ok(())
    }

    /// Directory holding the target; a bare file name means the working directory
    fn directory(&self) -> &Path {
        match self.target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

impl Publisher for FilePublisher {
    fn publish(&self, artifact: &str) -> Result<(), PublishError> {
        let dir = self.directory();

        let mut temp = tempfile::Builder::new()
            .prefix(".hwmetrics-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        temp.write_all(artifact.as_bytes())?;
        temp.as_file().sync_all()?;
        make_world_readable(&temp)?;

        temp.persist(&self.target)
            .map_err(|e| PublishError::Persist {
                target: self.target.display().to_string(),
                source: e.error,
            })?;
        Ok(())
    }

    fn destination(&self) -> String {
        self.target.display().to_string()
    }
}

#[cfg(unix)]
fn make_world_readable(file: &NamedTempFile) -> Result<(), PublishError> {
    use std::os::unix::fs::PermissionsExt;
    // Temp files start out 0600; the collector usually runs as another user
    fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_world_readable(_file: &NamedTempFile) -> Result<(), PublishError> {
    Ok(())
}
