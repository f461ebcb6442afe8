use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{StorageBackend, StorageError, StorageResult};

/// Backend storing one file per key under a directory.
///
/// Writes land in a temporary file that is renamed over the target, so a
/// reader never sees a partially written envelope.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open a backend rooted at `dir`, creating the directory if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the stored values.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let allowed = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
        if allowed {
            Ok(self.dir.join(key))
        } else {
            Err(StorageError::InvalidKey {
                key: key.to_string(),
            })
        }
    }
}

fn io_error(key: &str) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        key: key.to_string(),
        source,
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(key)(err)),
        }
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let staging = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));
        let result = fs::File::create(&staging)
            .and_then(|mut file| {
                file.write_all(value.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&staging, &path));
        if result.is_err() {
            let _ = fs::remove_file(&staging);
        }
        result.map_err(io_error(key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(key)(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        FileBackend::open(dir.path())?.write("quire.session.user", "envelope")?;

        let reopened = FileBackend::open(dir.path())?;
        assert_eq!(
            reopened.read("quire.session.user")?.as_deref(),
            Some("envelope")
        );
        assert!(reopened.delete("quire.session.user")?);
        assert!(!reopened.delete("quire.session.user")?);
        assert_eq!(reopened.read("quire.session.user")?, None);
        Ok(())
    }

    #[test]
    fn no_staging_files_are_left_behind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileBackend::open(dir.path().join("nested"))?;
        backend.write("k", "one")?;
        backend.write("k", "two")?;
        let names: Vec<_> = fs::read_dir(backend.dir())?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k".to_string()]);
        Ok(())
    }

    #[test]
    fn path_like_keys_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileBackend::open(dir.path())?;
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                backend.write(key, "v"),
                Err(StorageError::InvalidKey { .. })
            ));
        }
        Ok(())
    }
}
