//! Mapping of repository identifiers to downloaded directories.

use crate::error::JobError;
use std::path::PathBuf;
use tracing::warn;

/// Locates the directory of a downloaded repository.
///
/// Directories are produced by an upstream stage; the resolver only checks
/// that one exists and never creates or deletes anything.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    root: PathBuf,
}

impl ArtifactResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of `repo_id` under the root, if it is an existing directory.
    pub fn resolve(&self, repo_id: &str) -> Result<PathBuf, JobError> {
        let repo_path = self.root.join(repo_id);

        if !repo_path.is_dir() {
            warn!("Repository download dir not found: '{}'", repo_path.display());
            return Err(JobError::ArtifactNotFound(repo_path));
        }

        Ok(repo_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("abc123")).unwrap();

        let resolver = ArtifactResolver::new(temp_dir.path());
        let path = resolver.resolve("abc123").unwrap();

        assert_eq!(path, temp_dir.path().join("abc123"));
    }

    #[test]
    fn test_resolve_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = ArtifactResolver::new(temp_dir.path());

        let err = resolver.resolve("missing").unwrap_err();
        assert!(matches!(err, JobError::ArtifactNotFound(ref p) if p.ends_with("missing")));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_resolve_plain_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("abc123"), "not a directory").unwrap();

        let resolver = ArtifactResolver::new(temp_dir.path());
        assert!(resolver.resolve("abc123").is_err());
        // The file is left untouched.
        assert!(temp_dir.path().join("abc123").is_file());
    }
}
