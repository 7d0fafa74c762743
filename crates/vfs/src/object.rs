use super::{split_path, Error, FileSystem, Timestamp};
use chrono::{TimeZone, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::{path::Path as StorePath, ObjectStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// FileSystem rooted at an object-store bucket and key prefix.
///
/// Object stores have no directories: `mkdir` is a no-op and parent
/// "directories" of written keys always exist. Timestamps are the store's
/// last-modified times; the sentinel minimum for missing keys is year-1 UTC,
/// which predates any timestamp a real store can report.
pub struct ObjectFileSystem {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: Vec<String>,
}

impl ObjectFileSystem {
    /// Build from an `s3://bucket/prefix` URI and a context kwargs bag.
    /// Recognized kwargs: `region`, `endpoint`, `allow_http`, `anonymous`,
    /// `access_key_id`, `secret_access_key`.
    pub fn from_uri(
        uri: &url::Url,
        kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, Error> {
        let Some(bucket) = uri.host_str().filter(|host| !host.is_empty()) else {
            return Err(Error::UnsupportedUri(uri.to_string()));
        };
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        for (key, value) in kwargs {
            match (key.as_str(), value) {
                ("region", serde_json::Value::String(s)) => {
                    builder = builder.with_region(s);
                }
                ("endpoint", serde_json::Value::String(s)) => {
                    builder = builder.with_endpoint(s);
                }
                ("allow_http", serde_json::Value::Bool(b)) => {
                    builder = builder.with_allow_http(*b);
                }
                ("anonymous", serde_json::Value::Bool(b)) => {
                    builder = builder.with_skip_signature(*b);
                }
                ("access_key_id", serde_json::Value::String(s)) => {
                    builder = builder.with_access_key_id(s);
                }
                ("secret_access_key", serde_json::Value::String(s)) => {
                    builder = builder.with_secret_access_key(s);
                }
                (key, value) => {
                    tracing::warn!(key, ?value, "ignoring unrecognized file-system kwarg");
                }
            }
        }

        Ok(Self {
            store: Arc::new(builder.build()?),
            bucket: bucket.to_string(),
            prefix: split_path(uri.path())?
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    fn location(&self, path: &str) -> Result<StorePath, Error> {
        let parts = split_path(path)?;
        Ok(StorePath::from_iter(
            self.prefix.iter().map(String::as_str).chain(parts),
        ))
    }
}

fn sentinel_min() -> Timestamp {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .expect("year-1 UTC is unambiguous")
}

#[async_trait::async_trait]
impl FileSystem for ObjectFileSystem {
    async fn exists(&self, path: &str) -> Result<bool, Error> {
        match self.store.head(&self.location(path)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<bytes::Bytes, Error> {
        match self.store.get(&self.location(path)?).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotFound(path.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, path: &str, data: bytes::Bytes) -> Result<(), Error> {
        let location = self.location(path)?;
        self.store.put(&location, data.into()).await?;
        tracing::debug!(%location, "wrote object");
        Ok(())
    }

    async fn mkdir(&self, _path: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn last_update_time(&self, path: &str) -> Result<Timestamp, Error> {
        match self.store.head(&self.location(path)?).await {
            Ok(meta) => Ok(meta.last_modified),
            Err(object_store::Error::NotFound { .. }) => Ok(sentinel_min()),
            Err(err) => Err(err.into()),
        }
    }

    async fn listdir(&self, path: &str, include_hidden: bool) -> Result<BTreeSet<String>, Error> {
        let location = self.location(path)?;
        let listing = self.store.list_with_delimiter(Some(&location)).await?;

        let objects = listing
            .objects
            .iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string));
        let prefixes = listing
            .common_prefixes
            .iter()
            .filter_map(|prefix| prefix.parts().last().map(|part| part.as_ref().to_string()));

        Ok(objects
            .chain(prefixes)
            .filter(|name| include_hidden || !name.starts_with('.'))
            .collect())
    }

    fn full_path(&self, path: &str) -> String {
        let mut parts = vec![self.bucket.as_str()];
        parts.extend(self.prefix.iter().map(String::as_str));
        parts.extend(path.split('/').filter(|p| !p.is_empty() && *p != "."));
        parts.join("/")
    }

    fn uri(&self, path: &str) -> String {
        format!("s3://{}", self.full_path(path))
    }
}
