use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn get_abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn compute_file_hash(path: &Path) -> Option<blake3::Hash> {
    fs::read(path).ok().map(|bytes| blake3::hash(&bytes))
}

pub fn contains_ascii_characters(str: &str) -> bool {
    str.chars().any(|c| c.is_ascii_alphanumeric())
}

/// Write `contents` to `path`, creating parent directories as needed.
/// Skips the write when the file already holds identical bytes, so repeated
/// generation of an unchanged program leaves timestamps alone.
/// Returns true when the file was (re)written.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if let Some(existing) = compute_file_hash(path)
        && existing == blake3::hash(contents.as_bytes())
    {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_if_changed_skips_identical_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("a.txt");

        assert!(write_if_changed(&path, "hello").unwrap());
        assert!(!write_if_changed(&path, "hello").unwrap());
        assert!(write_if_changed(&path, "hello!").unwrap());
        assert_eq!(read_file(&path).unwrap(), "hello!");
    }
}
