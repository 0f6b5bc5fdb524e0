use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::AppError;

/// Profile picture storage boundary. Implementations take the uploaded
/// bytes and hand back the stored filename; scaling for display is the
/// serving side's concern.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, body: Bytes, content_type: &str) -> Result<String, AppError>;
}

/// Writes uploads to a local directory under a random name.
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, body: Bytes, content_type: &str) -> Result<String, AppError> {
        let ext = ext_from_mime(content_type).ok_or_else(|| {
            AppError::validation("picture", "only jpg and png images are accepted")
        })?;
        let name = format!("{}.{}", Uuid::new_v4().simple(), ext);

        tokio::fs::create_dir_all(&self.root)
            .await
            .context("create image directory")?;
        tokio::fs::write(self.root.join(&name), &body)
            .await
            .context("write profile image")?;
        Ok(name)
    }
}

fn ext_from_mime(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_jpg_and_png_are_accepted() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), None);
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn stores_under_a_fresh_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalImageStore::new(dir.path());

        let a = store
            .store(Bytes::from_static(b"fake-png-bytes"), "image/png")
            .await
            .expect("store should succeed");
        let b = store
            .store(Bytes::from_static(b"fake-png-bytes"), "image/png")
            .await
            .expect("store should succeed");

        assert_ne!(a, b);
        assert!(a.ends_with(".png"));
        let written = std::fs::read(dir.path().join(&a)).expect("file exists");
        assert_eq!(written, b"fake-png-bytes");
    }

    #[tokio::test]
    async fn rejects_unsupported_content_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalImageStore::new(dir.path());
        let err = store
            .store(Bytes::from_static(b"gif"), "image/gif")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
