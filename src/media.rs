//! Media file management for Courier.
//!
//! Commands reference their audio recording and photo attachments by
//! relative filename; this module owns full-path resolution and deletion.
//! Recordings live under `<data>/Recordings/`, photos under `<data>/Photos/`
//! with derived thumbnails in `<data>/Photos/thumbs/`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::queue::RemovedMedia;

/// Path-addressable storage for command media files.
#[derive(Debug, Clone)]
pub struct MediaStore {
    recordings_dir: PathBuf,
    photos_dir: PathBuf,
}

impl MediaStore {
    /// Creates a media store rooted at the data directory.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            recordings_dir: data_dir.join("Recordings"),
            photos_dir: data_dir.join("Photos"),
        }
    }

    /// Full path of an audio recording.
    pub fn recording_path(&self, name: &str) -> PathBuf {
        self.recordings_dir.join(name)
    }

    /// Full path of a photo attachment.
    pub fn photo_path(&self, name: &str) -> PathBuf {
        self.photos_dir.join(name)
    }

    /// Full path of a photo's derived thumbnail.
    pub fn thumbnail_path(&self, name: &str) -> PathBuf {
        self.photos_dir.join("thumbs").join(name)
    }

    /// Ensures the media directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.recordings_dir)?;
        fs::create_dir_all(self.photos_dir.join("thumbs"))?;
        Ok(())
    }

    /// Deletes every file a removed command referenced: the audio recording
    /// (if any), each photo, and each photo's thumbnail.
    ///
    /// Called only after the store deletion has succeeded, so a crash here
    /// orphans files rather than leaving the database pointing at nothing.
    /// Files that are already absent count as deleted. Returns the number
    /// of files actually removed.
    pub fn delete_media(&self, media: &RemovedMedia) -> u64 {
        let mut deleted = 0u64;

        if let Some(ref audio) = media.audio_path {
            if remove_if_present(&self.recording_path(audio)) {
                deleted += 1;
            }
        }

        for photo in &media.photo_paths {
            if remove_if_present(&self.photo_path(photo)) {
                deleted += 1;
            }
            if remove_if_present(&self.thumbnail_path(photo)) {
                deleted += 1;
            }
        }

        if deleted > 0 {
            tracing::info!("Deleted {} media file(s)", deleted);
        }
        deleted
    }
}

/// Removes a file, treating "already absent" as success.
fn remove_if_present(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Failed to delete media file {:?}: {}", path, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn media_store() -> (TempDir, MediaStore) {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path());
        store.ensure_dirs().unwrap();
        (dir, store)
    }

    #[test]
    fn test_deletes_audio_photos_and_thumbnails() {
        let (_dir, store) = media_store();

        fs::write(store.recording_path("a.m4a"), b"audio").unwrap();
        for name in ["p1.jpg", "p2.jpg"] {
            fs::write(store.photo_path(name), b"photo").unwrap();
            fs::write(store.thumbnail_path(name), b"thumb").unwrap();
        }

        let media = RemovedMedia {
            audio_path: Some("a.m4a".to_string()),
            photo_paths: vec!["p1.jpg".to_string(), "p2.jpg".to_string()],
        };

        assert_eq!(store.delete_media(&media), 5);
        assert!(!store.recording_path("a.m4a").exists());
        assert!(!store.photo_path("p1.jpg").exists());
        assert!(!store.thumbnail_path("p2.jpg").exists());
    }

    #[test]
    fn test_absent_files_do_not_raise() {
        let (_dir, store) = media_store();

        let media = RemovedMedia {
            audio_path: Some("missing.m4a".to_string()),
            photo_paths: vec!["missing.jpg".to_string()],
        };

        // Deleting twice over already-gone files is a quiet no-op
        assert_eq!(store.delete_media(&media), 0);
        assert_eq!(store.delete_media(&media), 0);
    }

    #[test]
    fn test_photo_without_thumbnail_still_deleted() {
        let (_dir, store) = media_store();
        fs::write(store.photo_path("p.jpg"), b"photo").unwrap();

        let media = RemovedMedia {
            audio_path: None,
            photo_paths: vec!["p.jpg".to_string()],
        };

        assert_eq!(store.delete_media(&media), 1);
        assert!(!store.photo_path("p.jpg").exists());
    }
}
