use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use url::Url;
use crate::core::{Result, UploadError};

/// Path prefix the host web view uses to expose local files over http.
pub const WEB_FILE_PREFIX: &str = "/_capacitor_file_";

const BLOB_SCHEME: &str = "idb://";

/// Classified file reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    /// Ordinary filesystem path
    Path(PathBuf),
    /// Application-managed blob, `idb://<database>/<store>/<key>`
    Blob {
        database: String,
        store: String,
        key: String,
    },
}

impl FileRef {
    pub fn parse(raw: &str) -> Result<FileRef> {
        if raw.trim().is_empty() {
            return Err(UploadError::file_unreadable(raw, "empty file path"));
        }

        if let Some(rest) = raw.strip_prefix(BLOB_SCHEME) {
            let mut parts = rest.splitn(3, '/');
            return match (parts.next(), parts.next(), parts.next()) {
                (Some(database), Some(store), Some(key))
                    if !database.is_empty() && !store.is_empty() && !key.is_empty() =>
                {
                    Ok(FileRef::Blob {
                        database: database.to_string(),
                        store: store.to_string(),
                        key: key.to_string(),
                    })
                }
                _ => Err(UploadError::file_unreadable(raw, "invalid blob store path format")),
            };
        }

        if raw.starts_with("file://") {
            let path = Url::parse(raw)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| UploadError::file_unreadable(raw, "invalid file url"))?;
            return Ok(FileRef::Path(path));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw).map_err(|err| UploadError::file_unreadable(raw, err))?;
            let local = url
                .path()
                .strip_prefix(WEB_FILE_PREFIX)
                .ok_or_else(|| UploadError::file_unreadable(raw, "remote files are not supported"))?;

            // Round-trip through a file url to percent-decode the path
            let mut file_url = Url::parse("file:///").map_err(|err| UploadError::file_unreadable(raw, err))?;
            file_url.set_path(local);
            let path = file_url
                .to_file_path()
                .map_err(|_| UploadError::file_unreadable(raw, "invalid local file path"))?;
            return Ok(FileRef::Path(path));
        }

        Ok(FileRef::Path(PathBuf::from(raw)))
    }
}

/// Readable bytes behind a file reference
#[derive(Debug, Clone)]
pub enum ByteSource {
    File {
        path: PathBuf,
        name: String,
        len: u64,
    },
    Memory {
        name: String,
        bytes: Bytes,
    },
}

impl ByteSource {
    /// Name used as the multipart filename and for MIME detection.
    pub fn name(&self) -> &str {
        match self {
            ByteSource::File { name, .. } => name,
            ByteSource::Memory { name, .. } => name,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            ByteSource::File { len, .. } => *len,
            ByteSource::Memory { bytes, .. } => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Application-managed blob storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, database: &str, store: &str, key: &str) -> Result<Option<Bytes>>;
}

/// In-process blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String, String), Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, database: &str, store: &str, key: &str, bytes: impl Into<Bytes>) {
        self.blobs.write().await.insert(
            (database.to_string(), store.to_string(), key.to_string()),
            bytes.into(),
        );
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, database: &str, store: &str, key: &str) -> Result<Option<Bytes>> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .get(&(database.to_string(), store.to_string(), key.to_string()))
            .cloned())
    }
}

#[derive(Default, Clone)]
pub struct PathResolver {
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob_store(mut self, blob_store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    pub async fn resolve(&self, raw: &str) -> Result<ByteSource> {
        match FileRef::parse(raw)? {
            FileRef::Path(path) => Self::resolve_file(raw, path).await,
            FileRef::Blob { database, store, key } => {
                let blob_store = self
                    .blob_store
                    .as_ref()
                    .ok_or_else(|| UploadError::file_unreadable(raw, "no blob store configured"))?;

                let bytes = blob_store
                    .get(&database, &store, &key)
                    .await?
                    .ok_or_else(|| {
                        UploadError::file_unreadable(
                            raw,
                            format!("key '{}' not found in store '{}' of database '{}'", key, store, database),
                        )
                    })?;

                let name = key.rsplit('/').next().unwrap_or(&key).to_string();
                Ok(ByteSource::Memory { name, bytes })
            }
        }
    }

    async fn resolve_file(raw: &str, path: PathBuf) -> Result<ByteSource> {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| UploadError::file_unreadable(raw, err))?;
        if !metadata.is_file() {
            return Err(UploadError::file_unreadable(raw, "not a file"));
        }

        // Fail now rather than on the first attempt
        tokio::fs::File::open(&path)
            .await
            .map_err(|err| UploadError::file_unreadable(raw, err))?;

        Ok(ByteSource::File {
            name: file_name(&path),
            len: metadata.len(),
            path,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "file".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_path() {
        assert_eq!(
            FileRef::parse("/data/user/0/photo.jpg").unwrap(),
            FileRef::Path(PathBuf::from("/data/user/0/photo.jpg"))
        );
    }

    #[test]
    fn test_parse_file_url() {
        assert_eq!(
            FileRef::parse("file:///tmp/my%20video.mp4").unwrap(),
            FileRef::Path(PathBuf::from("/tmp/my video.mp4"))
        );
    }

    #[test]
    fn test_parse_web_accessible_url() {
        assert_eq!(
            FileRef::parse("http://localhost/_capacitor_file_/storage/emulated/0/clip.mp4").unwrap(),
            FileRef::Path(PathBuf::from("/storage/emulated/0/clip.mp4"))
        );
        assert!(FileRef::parse("https://example.com/clip.mp4").is_err());
    }

    #[test]
    fn test_parse_blob_path() {
        assert_eq!(
            FileRef::parse("idb://media/videos/2024/clip.webm").unwrap(),
            FileRef::Blob {
                database: "media".to_string(),
                store: "videos".to_string(),
                key: "2024/clip.webm".to_string(),
            }
        );
        assert!(matches!(
            FileRef::parse("idb://media/videos"),
            Err(UploadError::FileUnreadable { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        tokio::fs::write(&path, b"jpeg bytes").await.unwrap();

        let source = PathResolver::new().resolve(path.to_str().unwrap()).await.unwrap();
        assert_eq!(source.name(), "photo.jpg");
        assert_eq!(source.len(), 10);
    }

    #[tokio::test]
    async fn test_resolve_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        let result = PathResolver::new().resolve(path.to_str().unwrap()).await;
        assert!(matches!(result, Err(UploadError::FileUnreadable { .. })));
    }

    #[tokio::test]
    async fn test_resolve_directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let result = PathResolver::new().resolve(dir.path().to_str().unwrap()).await;
        assert!(matches!(result, Err(UploadError::FileUnreadable { .. })));
    }

    #[tokio::test]
    async fn test_resolve_blob() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.insert("media", "videos", "clip.webm", &b"webm"[..]).await;
        let resolver = PathResolver::new().with_blob_store(blobs);

        let source = resolver.resolve("idb://media/videos/clip.webm").await.unwrap();
        assert_eq!(source.name(), "clip.webm");
        assert_eq!(source.len(), 4);

        let missing = resolver.resolve("idb://media/videos/other.webm").await;
        assert!(matches!(missing, Err(UploadError::FileUnreadable { .. })));
    }

    #[tokio::test]
    async fn test_resolve_blob_without_store() {
        let result = PathResolver::new().resolve("idb://media/videos/clip.webm").await;
        assert!(matches!(result, Err(UploadError::FileUnreadable { .. })));
    }
}
