//! Executable resolution for process targets.

use std::path::{Path, PathBuf};

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute or containing a separator) that exist.
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_from_path() {
        let found = resolve_executable_path("sh").await.unwrap();
        assert!(found.is_absolute());
    }

    #[tokio::test]
    async fn test_explicit_path_must_exist() {
        assert!(resolve_executable_path("/bin/sh").await.is_some());
        assert!(resolve_executable_path("./no-such-server").await.is_none());
        assert!(resolve_executable_path("").await.is_none());
    }
}
