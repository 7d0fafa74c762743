use super::{split_path, Error, FileSystem, Timestamp};
use chrono::DateTime;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// FileSystem rooted at a local directory.
///
/// Timestamps are file mtimes; the sentinel minimum for missing paths is the
/// Unix epoch.
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, Error> {
        let mut out = self.root.clone();
        out.extend(split_path(path)?);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &str) -> Result<bool, Error> {
        Ok(tokio::fs::try_exists(self.resolve(path)?).await?)
    }

    async fn read(&self, path: &str) -> Result<bytes::Bytes, Error> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(data) => Ok(data.into()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, path: &str, data: bytes::Bytes) -> Result<(), Error> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, &data).await?;
        tracing::debug!(path = %resolved.display(), bytes = data.len(), "wrote local file");
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), Error> {
        Ok(tokio::fs::create_dir_all(self.resolve(path)?).await?)
    }

    async fn last_update_time(&self, path: &str) -> Result<Timestamp, Error> {
        match tokio::fs::metadata(self.resolve(path)?).await {
            Ok(meta) => Ok(meta.modified()?.into()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(DateTime::UNIX_EPOCH),
            Err(err) => Err(err.into()),
        }
    }

    async fn listdir(&self, path: &str, include_hidden: bool) -> Result<BTreeSet<String>, Error> {
        let mut entries = tokio::fs::read_dir(self.resolve(path)?).await?;
        let mut names = BTreeSet::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if include_hidden || !name.starts_with('.') {
                names.insert(name);
            }
        }
        Ok(names)
    }

    fn full_path(&self, path: &str) -> String {
        let mut out = self.root.clone();
        out.extend(path.split('/').filter(|p| !p.is_empty() && *p != "."));
        out.to_string_lossy().into_owned()
    }

    fn uri(&self, path: &str) -> String {
        match url::Url::from_file_path(self.full_path(path)) {
            Ok(url) => url.to_string(),
            Err(()) => format!("file://{}", self.full_path(path)),
        }
    }
}
