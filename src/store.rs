//! File stores for unsigned documents, signed documents and specimens.
//!
//! Documents are addressed by opaque ids: uploads are saved as
//! `<id>.pdf` in the unsigned store and signed outputs as
//! `signed_<id>.pdf` in the signed store. Specimen images are keyed by
//! the SHA-1 hex digest of the profile identity and always stored as PNG.

use crate::config::SignerConfig;
use crate::error::{Error, Result};
use sha1::{Digest, Sha1};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Directories backing the stores.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    unsigned_dir: PathBuf,
    signed_dir: PathBuf,
    specimen_dir: PathBuf,
}

impl DocumentStore {
    /// Store over the given directories.
    pub fn new(unsigned_dir: impl Into<PathBuf>, signed_dir: impl Into<PathBuf>, specimen_dir: impl Into<PathBuf>) -> Self {
        Self {
            unsigned_dir: unsigned_dir.into(),
            signed_dir: signed_dir.into(),
            specimen_dir: specimen_dir.into(),
        }
    }

    /// Store over the configured directories.
    pub fn from_config(config: &SignerConfig) -> Self {
        Self::new(&config.unsigned_dir, &config.signed_dir, &config.specimen_dir)
    }

    /// Reject names that could leave the store directory.
    pub fn check_file_name(name: &str) -> Result<()> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(Error::InvalidRequest(format!("invalid file name {:?}", name)));
        }
        Ok(())
    }

    /// Document id of a request `src` (`<id>` or `<id>.pdf`).
    pub fn document_id(src: &str) -> Result<String> {
        let src = src.trim();
        let id = src.strip_suffix(".pdf").unwrap_or(src);
        Self::check_file_name(id)?;
        Ok(id.to_string())
    }

    /// Path of an unsigned document.
    pub fn unsigned_path(&self, id: &str) -> PathBuf {
        self.unsigned_dir.join(format!("{}.pdf", id))
    }

    /// File name of the signed output for `id`.
    pub fn signed_name(id: &str) -> String {
        format!("signed_{}.pdf", id)
    }

    /// Path of the signed output for `id`.
    pub fn signed_path(&self, id: &str) -> PathBuf {
        self.signed_dir.join(Self::signed_name(id))
    }

    /// Read an unsigned document.
    pub async fn load_unsigned(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.unsigned_path(id);
        read_or(&path, || Error::DocumentNotFound(format!("{}.pdf", id))).await
    }

    /// Save an upload under a fresh id.
    pub async fn save_unsigned(&self, data: &[u8]) -> Result<String> {
        crate::document::parse_header(data).map_err(|_| Error::InvalidRequest("upload is not a PDF".to_string()))?;
        let id = uuid::Uuid::new_v4().to_string();
        write_atomic(&self.unsigned_path(&id), data).await?;
        log::info!("stored upload {} ({} bytes)", id, data.len());
        Ok(id)
    }

    /// Write the signed output for `id`, replacing any previous one.
    ///
    /// The bytes go to a temporary file that is renamed into place, so a
    /// failed write never leaves a partial output.
    pub async fn write_signed(&self, id: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.signed_path(id);
        write_atomic(&path, data).await?;
        Ok(path)
    }

    /// Read the signed output for `id`.
    pub async fn load_signed(&self, id: &str) -> Result<Vec<u8>> {
        let id = Self::document_id(id.strip_prefix("signed_").unwrap_or(id))?;
        let path = self.signed_path(&id);
        read_or(&path, || Error::SignedDocumentNotFound(Self::signed_name(&id))).await
    }

    /// Specimen key of a profile identity.
    pub fn specimen_key(profile_name: &str) -> String {
        Sha1::digest(profile_name.as_bytes())
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Path of a profile's specimen.
    pub fn specimen_path(&self, profile_name: &str) -> PathBuf {
        self.specimen_dir.join(format!("{}.png", Self::specimen_key(profile_name)))
    }

    /// Store a profile's specimen image, converted to PNG. Returns the file name.
    pub async fn save_specimen(&self, profile_name: &str, image: &[u8]) -> Result<String> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| Error::InvalidRequest(format!("specimen is not a supported image: {}", e)))?;
        let mut png = Cursor::new(Vec::new());
        decoded.write_to(&mut png, image::ImageOutputFormat::Png)?;
        let path = self.specimen_path(profile_name);
        write_atomic(&path, png.get_ref()).await?;
        Ok(path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default())
    }

    /// Read a profile's specimen.
    pub async fn load_specimen(&self, profile_name: &str) -> Result<Vec<u8>> {
        let path = self.specimen_path(profile_name);
        read_or(&path, || Error::SpecimenNotFound(format!("{}.png", Self::specimen_key(profile_name)))).await
    }

    /// Read a specimen file by name.
    pub async fn load_specimen_file(&self, name: &str) -> Result<Vec<u8>> {
        Self::check_file_name(name)?;
        read_or(&self.specimen_dir.join(name), || Error::SpecimenNotFound(name.to_string())).await
    }
}

async fn read_or(path: &Path, missing: impl FnOnce() -> Error) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(missing()),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("{} has no parent directory", path.display())))?;
    tokio::fs::create_dir_all(dir).await?;
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> DocumentStore {
        DocumentStore::new(dir.join("UNSIGNED"), dir.join("SIGNED"), dir.join("SPECIMEN"))
    }

    #[test]
    fn test_document_id() {
        assert_eq!(DocumentStore::document_id("abc.pdf").unwrap(), "abc");
        assert_eq!(DocumentStore::document_id("abc").unwrap(), "abc");
        assert!(DocumentStore::document_id("a/b.pdf").is_err());
        assert!(DocumentStore::document_id("..").is_err());
        assert!(DocumentStore::document_id(".pdf").is_err());
        assert_eq!(DocumentStore::signed_name("abc"), "signed_abc.pdf");
    }

    #[test]
    fn test_specimen_key_is_sha1_hex() {
        assert_eq!(
            DocumentStore::specimen_key("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[tokio::test]
    async fn test_missing_files_map_to_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.load_unsigned("nope").await.unwrap_err().code(), "82");
        assert_eq!(store.load_signed("nope").await.unwrap_err().code(), "85");
        assert_eq!(store.load_specimen("jane").await.unwrap_err().code(), "84");
        assert_eq!(store.load_specimen_file("x.png").await.unwrap_err().code(), "84");
    }

    #[tokio::test]
    async fn test_upload_and_signed_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.save_unsigned(b"%PDF-1.4\n%%EOF\n").await.unwrap();
        assert_eq!(store.load_unsigned(&id).await.unwrap(), b"%PDF-1.4\n%%EOF\n");
        assert!(store.save_unsigned(b"GIF89a").await.is_err());

        let path = store.write_signed(&id, b"signed").await.unwrap();
        assert!(path.ends_with(format!("signed_{}.pdf", id)));
        assert_eq!(store.load_signed(&format!("signed_{}.pdf", id)).await.unwrap(), b"signed");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("SIGNED")).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_specimen_saved_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 0]));
        let mut jpeg = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut jpeg, image::ImageOutputFormat::Jpeg(90))
            .unwrap();

        let name = store.save_specimen("jane@example.com", jpeg.get_ref()).await.unwrap();
        assert!(name.ends_with(".png"));
        let stored = store.load_specimen("jane@example.com").await.unwrap();
        assert!(stored.starts_with(b"\x89PNG"));
        assert_eq!(store.load_specimen_file(&name).await.unwrap(), stored);
    }
}
