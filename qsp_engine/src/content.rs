use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("no game directory has been set")]
    NoGameDir,
    #[error("content {0} not found")]
    NotFound(String),
}

/// Resolves game-relative resource paths (sounds, images, saves) against
/// the current game directory.
#[derive(Debug, Default)]
pub struct ContentResolver {
    game_dir: RwLock<Option<PathBuf>>,
}

impl ContentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_game_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        log::debug!("[qsp_engine::content] game directory set to {}", dir.display());
        *self.game_dir.write().unwrap_or_else(PoisonError::into_inner) = Some(dir);
    }

    pub fn game_dir(&self) -> Option<PathBuf> {
        self.game_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Finds `rel_path` below the game directory, matching each component
    /// case-insensitively.
    pub fn resolve(&self, rel_path: &str) -> Result<PathBuf, ContentError> {
        let dir = self.game_dir().ok_or(ContentError::NoGameDir)?;
        let normalized = normalize_content_path(rel_path);
        find_file_recursively(&dir, &normalized)
            .ok_or_else(|| ContentError::NotFound(normalized.clone()))
    }

    pub fn find(&self, rel_path: &str) -> Option<PathBuf> {
        match self.resolve(rel_path) {
            Ok(path) => Some(path),
            Err(err) => {
                log::debug!("[qsp_engine::content] {err}");
                None
            }
        }
    }
}

/// Turns every `\` into `/` and drops a leading `./`.
pub fn normalize_content_path(path: &str) -> String {
    let forward = path.replace('\\', "/");
    match forward.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => forward,
    }
}

pub fn find_file_recursively(root: &Path, rel_path: &str) -> Option<PathBuf> {
    let trimmed = rel_path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let direct = root.join(trimmed);
    if direct.is_file() {
        return Some(direct);
    }
    let wanted = trimmed.to_lowercase();
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .and_then(|rel| rel.to_str())
                .map(|rel| rel.replace('\\', "/").to_lowercase() == wanted)
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn normalizes_legacy_paths() {
        assert_eq!(normalize_content_path("./music\\intro.mp3"), "music/intro.mp3");
        assert_eq!(normalize_content_path("img/a.png"), "img/a.png");
    }

    #[test]
    fn resolves_case_insensitively() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("Music")).expect("mkdir");
        fs::write(dir.path().join("Music").join("Intro.MP3"), b"id3").expect("write");

        let resolver = ContentResolver::new();
        resolver.set_game_dir(dir.path());
        let found = resolver.find(".\\music\\intro.mp3").expect("resolved");
        assert!(found.ends_with("Music/Intro.MP3"));
        assert!(resolver.find("music/missing.mp3").is_none());
    }

    #[test]
    fn resolve_without_game_dir_fails() {
        let resolver = ContentResolver::new();
        assert!(matches!(resolver.resolve("a.png"), Err(ContentError::NoGameDir)));
    }
}
