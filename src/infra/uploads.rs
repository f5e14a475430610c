//! Filesystem storage for post images under the configured media root.

use std::error::Error as StdError;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{StreamExt, pin_mut, stream};
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

const POSTS_PREFIX: &str = "posts";

#[derive(Debug, Error)]
pub enum MediaStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("uploaded file stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("uploaded file is empty")]
    EmptyPayload,
    #[error("uploaded file size exceeds supported range")]
    SizeOverflow,
}

/// Result of storing an image payload.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: i64,
}

/// Filesystem-backed media storage rooted at `media.root`.
#[derive(Debug)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store the provided payload and return metadata describing the stored image.
    ///
    /// The payload is streamed to disk to avoid buffering large files in memory.
    pub async fn store_stream<S>(
        &self,
        original_name: &str,
        stream: S,
    ) -> Result<StoredImage, MediaStorageError>
    where
        S: futures::Stream<Item = Result<Bytes, MediaStorageError>>,
    {
        let stored_path = build_stored_path(original_name);
        let absolute = self.resolve(&stored_path)?;

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        let mut hasher = Sha256::new();
        let mut total_bytes: u64 = 0;
        let mut saw_payload = false;

        pin_mut!(stream);
        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&absolute).await;
                    return Err(err);
                }
            };

            if chunk.is_empty() {
                continue;
            }

            saw_payload = true;
            total_bytes = total_bytes
                .checked_add(chunk.len() as u64)
                .ok_or(MediaStorageError::SizeOverflow)?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }

        file.flush().await?;

        if !saw_payload {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(MediaStorageError::EmptyPayload);
        }

        let checksum = hex::encode(hasher.finalize());
        let size_bytes = i64::try_from(total_bytes).map_err(|_| MediaStorageError::SizeOverflow)?;

        Ok(StoredImage {
            stored_path,
            checksum,
            size_bytes,
        })
    }

    /// Store a fully-buffered payload.
    pub async fn store(
        &self,
        original_name: &str,
        data: Bytes,
    ) -> Result<StoredImage, MediaStorageError> {
        let stream = stream::once(async move { Ok::<_, MediaStorageError>(data) });
        self.store_stream(original_name, stream).await
    }

    /// Read a stored payload back into memory.
    pub async fn read(&self, stored_path: &str) -> Result<Bytes, MediaStorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Remove a stored payload. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), MediaStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MediaStorageError::Io(err)),
        }
    }

    /// Resolve the absolute filesystem path for a stored payload.
    fn resolve(&self, stored_path: &str) -> Result<PathBuf, MediaStorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(MediaStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn build_stored_path(original_name: &str) -> String {
    let identifier = Uuid::new_v4().simple().to_string()[..8].to_string();
    let filename = sanitize_filename(original_name);
    format!("{POSTS_PREFIX}/{identifier}-{filename}")
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("image");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "image".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().to_path_buf()).unwrap();

        let stored = storage
            .store("Holiday Snap.PNG", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert!(stored.stored_path.starts_with("posts/"));
        assert!(stored.stored_path.ends_with("-holiday-snap.png"));
        assert_eq!(stored.size_bytes, 7);

        let data = storage.read(&stored.stored_path).await.unwrap();
        assert_eq!(&data[..], b"payload");
    }

    #[tokio::test]
    async fn rejects_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().to_path_buf()).unwrap();
        let err = storage.store("a.png", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, MediaStorageError::EmptyPayload));
    }

    #[tokio::test]
    async fn refuses_traversal_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            storage.read("../outside.txt").await.unwrap_err(),
            MediaStorageError::InvalidPath
        ));
        assert!(matches!(
            storage.read("/etc/passwd").await.unwrap_err(),
            MediaStorageError::InvalidPath
        ));
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("My Cat.JPEG"), "my-cat.jpeg");
        assert_eq!(sanitize_filename("???"), "image");
        assert_eq!(sanitize_filename("noext"), "noext");
    }
}
