// Repository detection and target discovery

use crate::constants::{DEFAULT_REPO_NAME, GIT_DIR};
use std::path::{Path, PathBuf};

/// A directory known to hold a git repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RepositoryTarget {
    pub path: PathBuf,
    /// Name shown in console output and emails, e.g. `www/shop`.
    pub logical_name: String,
}

impl RepositoryTarget {
    pub fn new(path: impl Into<PathBuf>, logical_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            logical_name: logical_name.into(),
        }
    }
}

/// How a target directory was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// The directory is itself a repository and is updated as one unit.
    SingleRepo(RepositoryTarget),
    /// The directory holds repositories.
    Contains(Vec<RepositoryTarget>),
}

impl Discovery {
    #[must_use]
    pub fn targets(&self) -> &[RepositoryTarget] {
        match self {
            Discovery::SingleRepo(target) => std::slice::from_ref(target),
            Discovery::Contains(targets) => targets,
        }
    }
}

pub fn is_git_repo(path: &Path) -> bool {
    path.join(GIT_DIR).is_dir()
}

/// A readable directory. Unreadable paths are treated as invalid.
pub fn is_valid_directory(path: &Path) -> bool {
    path.is_dir() && std::fs::read_dir(path).is_ok()
}

pub fn dir_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_REPO_NAME)
}

/// Immediate subdirectories of `path` that are repositories, sorted by path.
pub fn find_git_repos(path: &Path) -> Vec<PathBuf> {
    let mut repos: Vec<PathBuf> = std::fs::read_dir(path)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && is_git_repo(p))
        .collect();
    repos.sort();
    repos
}

/// Works out which repositories to update for one requested directory.
///
/// A directory that is itself a repository is never scanned for nested ones.
/// Otherwise either the configured repository names are looked up inside it,
/// or with `recurse_all` every child repository is taken.
pub fn targets_for_directory(
    dir: &Path,
    recurse_all: bool,
    configured: &[String],
) -> anyhow::Result<Discovery> {
    if !is_valid_directory(dir) {
        anyhow::bail!("directory '{}' is not a valid directory", dir.display());
    }

    let name = dir_name(dir);

    if is_git_repo(dir) {
        return Ok(Discovery::SingleRepo(RepositoryTarget::new(dir, name)));
    }

    let targets = if recurse_all {
        find_git_repos(dir)
            .into_iter()
            .map(|path| {
                let logical = format!("{}/{}", name, dir_name(&path));
                RepositoryTarget::new(path, logical)
            })
            .collect()
    } else {
        configured
            .iter()
            .map(|repo| RepositoryTarget::new(dir.join(repo), repo.as_str()))
            .filter(|target| is_git_repo(&target.path))
            .collect()
    };

    Ok(Discovery::Contains(targets))
}
