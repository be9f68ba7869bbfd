//! # File Management Module
//!
//! Questo modulo gestisce tutte le operazioni sui file e la discovery di media.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva di file media in directory
//! - Determinazione formato file (immagine vs video)
//! - Sostituzione sicura dell'originale con backup e rollback
//! - Spazio libero su disco (via `sysinfo`) per il controllo pre-encoding
//! - Formattazione human-readable delle dimensioni
//!
//! ## Formati supportati:
//! - **Immagini**: JPG, JPEG, PNG, WebP
//! - **Video**: MP4, MKV, MOV, AVI, M4V, WebM
//!
//! ## Esempio:
//! ```rust,ignore
//! let files = FileManager::find_media_files(Path::new("/path/to/media"))?;
//! for file in files {
//!     if FileManager::is_video(&file) {
//!         // compress video
//!     }
//! }
//! ```

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use sysinfo::Disks;
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "m4v", "webm"];

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Get information about a file (size and modification time)
    pub async fn get_file_info(path: &Path) -> Result<(u64, u64)> {
        let metadata = fs::metadata(path).await?;
        let size = metadata.len();
        let modified = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        Ok((size, modified))
    }

    /// Find all supported media files under a file or directory, in a stable order
    pub fn find_media_files(root: &Path) -> Result<Vec<PathBuf>> {
        if root.is_file() {
            return Ok(if Self::is_supported_format(root) {
                vec![root.to_path_buf()]
            } else {
                Vec::new()
            });
        }

        let mut files = Vec::new();

        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if Self::is_supported_format(path) {
                files.push(path.to_path_buf());
            }
        }

        Ok(files)
    }

    fn extension_lower(path: &Path) -> Option<String> {
        path.extension().map(|ext| ext.to_string_lossy().to_lowercase())
    }

    /// Check if a file format is supported
    pub fn is_supported_format(path: &Path) -> bool {
        Self::is_image(path) || Self::is_video(path)
    }

    /// Check if a file is an image
    pub fn is_image(path: &Path) -> bool {
        Self::extension_lower(path)
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Check if a file is a video
    pub fn is_video(path: &Path) -> bool {
        Self::extension_lower(path)
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Safely replace a file with its compressed version
    ///
    /// When the compressed file has a different extension the original is
    /// removed after the new file is in place. Returns the final path. An
    /// existing file at that path is never overwritten.
    pub async fn replace_file(original: &Path, compressed: &Path) -> Result<PathBuf> {
        let target = match compressed.extension() {
            Some(ext) => original.with_extension(ext),
            None => original.to_path_buf(),
        };
        if target != original && target.exists() {
            return Err(anyhow!("refusing to overwrite existing {}", target.display()));
        }

        // Create backup first
        let backup_path = original.with_extension(format!(
            "{}.backup",
            original.extension().unwrap_or_default().to_string_lossy()
        ));
        fs::copy(original, &backup_path).await?;

        match Self::move_file(compressed, &target).await {
            Ok(()) => {
                if target != original {
                    Self::discard_replaced(original, &target).await;
                }
                let _ = fs::remove_file(&backup_path).await;
                Ok(target)
            }
            Err(e) => {
                // Failure - restore from backup
                let _ = fs::copy(&backup_path, original).await;
                let _ = fs::remove_file(&backup_path).await;
                Err(e)
            }
        }
    }

    /// Removes the original once its replacement is in place. A failure only
    /// leaves both files on disk, so it is logged and not returned.
    async fn discard_replaced(original: &Path, target: &Path) {
        if let Err(e) = fs::remove_file(original).await {
            warn!(
                "Compressed file placed at {} but {} could not be removed: {}",
                target.display(),
                original.display(),
                e
            );
        }
    }

    /// Move a file, falling back to copy + delete across filesystems
    pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::rename(from, to).await.is_err() {
            fs::copy(from, to).await?;
            fs::remove_file(from).await?;
        }
        Ok(())
    }

    /// Remove a file if present; returns whether something was deleted
    pub async fn remove_if_exists(path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Free bytes on the disk holding `path` (the longest matching mount point wins)
    pub fn available_space(path: &Path) -> Option<u64> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}
