//! Static assets served from a configured directory, outside the job lifecycle.

use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use mime_guess::Mime;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("no assets directory is configured")]
    NotConfigured,
    #[error("asset path segment `{segment}` is not a plain file name")]
    InvalidPath { segment: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AssetError {
    /// Missing, unconfigured and rejected lookups all look the same to clients.
    pub fn is_not_found(&self) -> bool {
        match self {
            AssetError::NotConfigured | AssetError::InvalidPath { .. } => true,
            AssetError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

pub struct Asset {
    bytes: Vec<u8>,
    mime: Mime,
}

impl Asset {
    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    root: Option<PathBuf>,
}

impl AssetStore {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Read `{root}/{segments...}`. Each segment must be a single plain path component.
    pub async fn read(&self, segments: &[&str]) -> Result<Asset, AssetError> {
        let path = self.resolve(segments)?;
        let metadata = fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(AssetError::Io(std::io::ErrorKind::NotFound.into()));
        }

        let bytes = fs::read(&path).await?;
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        Ok(Asset { bytes, mime })
    }

    fn resolve(&self, segments: &[&str]) -> Result<PathBuf, AssetError> {
        let root = self.root.as_ref().ok_or(AssetError::NotConfigured)?;
        let mut path = root.clone();
        for segment in segments {
            if !is_plain_segment(segment) {
                return Err(AssetError::InvalidPath {
                    segment: segment.to_string(),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }
}

fn is_plain_segment(segment: &str) -> bool {
    if segment.is_empty() || segment.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == segment
    )
}

impl IntoResponse for Asset {
    fn into_response(self) -> Response {
        let len = self.bytes.len();
        let mut response = Response::new(Body::from(self.bytes));
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(self.mime.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
            headers.insert(header::CONTENT_LENGTH, value);
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=300"),
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn reads_nested_assets_with_guessed_mime() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("example.com/badge")).unwrap();
        std::fs::write(dir.path().join("example.com/badge/ok.svg"), b"<svg/>").unwrap();
        let store = AssetStore::new(Some(dir.path().to_path_buf()));

        let asset = store.read(&["example.com", "badge", "ok.svg"]).await.unwrap();

        assert_eq!(asset.bytes(), b"<svg/>");
        assert_eq!(asset.mime().essence_str(), "image/svg+xml");
    }

    #[tokio::test]
    async fn traversal_segments_are_refused() {
        let dir = TempDir::new().unwrap();
        let store = AssetStore::new(Some(dir.path().join("assets")));

        for segments in [
            vec!["..", "secret"],
            vec!["example.com", "../../etc/passwd"],
            vec!["example.com", ""],
            vec!["a\\b", "c"],
        ] {
            let err = store.read(&segments).await.err().unwrap();
            assert!(matches!(err, AssetError::InvalidPath { .. }), "{segments:?}");
            assert!(err.is_not_found());
        }
    }

    #[tokio::test]
    async fn directories_and_unconfigured_roots_are_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("example.com/badge")).unwrap();
        let store = AssetStore::new(Some(dir.path().to_path_buf()));

        let err = store.read(&["example.com", "badge"]).await.err().unwrap();
        assert!(err.is_not_found());

        let err = AssetStore::default().read(&["x", "y"]).await.err().unwrap();
        assert!(matches!(err, AssetError::NotConfigured));
    }
}
