//! # Path Resolution Module
//!
//! Centralizza il calcolo della destinazione di un candidato accettato:
//! - modalità output directory: rispecchia la struttura relativa alla base di input
//! - modalità in-place: accanto all'originale, con l'estensione del codec

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Computes where accepted candidates end up
pub struct PathResolver;

impl PathResolver {
    /// Destination for `input` once compressed to a file with `extension`
    pub fn get_output_path(
        input_path: &Path,
        input_base_dir: &Path,
        output_dir: Option<&Path>,
        extension: &str,
    ) -> Result<PathBuf> {
        let file_stem = input_path
            .file_stem()
            .ok_or_else(|| anyhow!("Invalid file name: {}", input_path.display()))?
            .to_string_lossy();
        let filename = format!("{}.{}", file_stem, extension);

        match output_dir {
            Some(output_dir) => Self::resolve_output_directory_path(input_path, input_base_dir, output_dir, filename),
            None => Ok(input_path.with_file_name(filename)),
        }
    }

    fn resolve_output_directory_path(
        input_path: &Path,
        input_base_dir: &Path,
        output_dir: &Path,
        filename: String,
    ) -> Result<PathBuf> {
        let canonical_base = input_base_dir
            .canonicalize()
            .map_err(|e| anyhow!("Failed to canonicalize base dir {}: {}", input_base_dir.display(), e))?;
        let canonical_input = input_path
            .canonicalize()
            .unwrap_or_else(|_| input_path.to_path_buf());

        let relative_dir = match canonical_input.strip_prefix(&canonical_base) {
            Ok(rel) => rel.parent().unwrap_or(Path::new("")).to_path_buf(),
            Err(e) => {
                debug!("Strip prefix failed for {}: {}", input_path.display(), e);
                PathBuf::new()
            }
        };

        let result = output_dir.join(relative_dir).join(filename);
        debug!("Resolved output path: {} -> {}", input_path.display(), result.display());
        Ok(result)
    }

    /// Directory that relative destinations are computed from
    pub fn input_base_dir(root: &Path) -> PathBuf {
        if root.is_file() {
            match root.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            }
        } else {
            root.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_place_destination_changes_extension() {
        let out = PathResolver::get_output_path(Path::new("/m/a/photo.png"), Path::new("/m"), None, "webp").unwrap();
        assert_eq!(out, PathBuf::from("/m/a/photo.webp"));
    }

    #[test]
    fn test_output_directory_mirrors_structure() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::create_dir_all(input.path().join("season1")).unwrap();
        let file = input.path().join("season1/ep1.avi");
        std::fs::write(&file, b"x").unwrap();

        let dest = PathResolver::get_output_path(&file, input.path(), Some(output.path()), "mkv").unwrap();
        assert_eq!(dest, output.path().join("season1/ep1.mkv"));
    }

    #[test]
    fn test_input_base_dir_of_single_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(PathResolver::input_base_dir(&file), dir.path());
        assert_eq!(PathResolver::input_base_dir(dir.path()), dir.path());
    }
}
