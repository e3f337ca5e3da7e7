//! Screenshot evidence produced by a run

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::io::Reader as ImageReader;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{E2eError, E2eResult};

/// A screenshot file written by a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: u64,
    pub width: u32,
    pub height: u32,

    /// SHA-256 of the file contents, hex encoded
    pub sha256: String,

    /// Captured because the scenario failed
    #[serde(default)]
    pub debug: bool,
}

impl Artifact {
    /// Read a screenshot back and record its size, dimensions and hash
    pub fn inspect(path: &Path, debug: bool) -> E2eResult<Self> {
        if !path.is_file() {
            return Err(E2eError::Evidence(format!(
                "screenshot not found: {}",
                path.display()
            )));
        }

        let data = std::fs::read(path)?;
        if data.is_empty() {
            return Err(E2eError::Evidence(format!(
                "screenshot is empty: {}",
                path.display()
            )));
        }

        let (width, height) = ImageReader::new(Cursor::new(&data))
            .with_guessed_format()?
            .into_dimensions()?;

        Ok(Self {
            path: path.to_path_buf(),
            bytes: data.len() as u64,
            width,
            height,
            sha256: hash_bytes(&data),
            debug,
        })
    }
}

/// Hash bytes using SHA256
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("characters_interactive.png");
        image::RgbaImage::from_pixel(4, 3, image::Rgba([20, 40, 60, 255]))
            .save(&path)
            .unwrap();

        let artifact = Artifact::inspect(&path, false).unwrap();
        assert_eq!((artifact.width, artifact.height), (4, 3));
        assert_eq!(artifact.bytes, std::fs::metadata(&path).unwrap().len());
        assert_eq!(artifact.sha256.len(), 64);
        assert_eq!(artifact.sha256, hash_bytes(&std::fs::read(&path).unwrap()));
        assert!(!artifact.debug);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Artifact::inspect(&dir.path().join("nope.png"), true).unwrap_err();
        assert!(matches!(err, E2eError::Evidence(_)));
    }

    #[test]
    fn test_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(Artifact::inspect(&path, false).is_err());
    }

    #[test]
    fn test_hash_bytes_known_value() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
