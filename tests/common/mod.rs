//! Test infrastructure for gpull integration tests.
#![allow(dead_code)]

use anyhow::Result;
use gpull::git::run_git;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary git repository for testing.
/// Automatically cleaned up when dropped.
pub struct TestRepo {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl TestRepo {
    /// Creates a new test repository with an initial commit on the master branch.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().to_path_buf();

        run_git(&path, &["init", "-b", "master"])?;
        configure_identity(&path)?;

        std::fs::write(path.join("README.md"), "# Test Repo\n")?;
        run_git(&path, &["add", "README.md"])?;
        run_git(&path, &["commit", "-m", "Initial commit"])?;

        Ok(Self {
            _temp_dir: temp_dir,
            path,
        })
    }

    /// Creates a test repository with a bare `origin`.
    /// Returns the repo and the remote TempDir (must be kept alive).
    pub fn with_remote() -> Result<(Self, TempDir)> {
        let remote_dir = TempDir::new()?;
        run_git(remote_dir.path(), &["init", "--bare", "-b", "master"])?;

        let local = Self::new()?;
        run_git(
            &local.path,
            &["remote", "add", "origin", &remote_dir.path().to_string_lossy()],
        )?;
        run_git(&local.path, &["push", "-u", "origin", "master"])?;

        Ok((local, remote_dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_branch(&self) -> Result<String> {
        Ok(run_git(&self.path, &["rev-parse", "--abbrev-ref", "HEAD"])?)
    }

    pub fn write(&self, file: &str, content: &str) -> Result<()> {
        std::fs::write(self.path.join(file), content)?;
        Ok(())
    }
}

/// A second working copy of `remote`, used to push upstream changes.
pub struct Collaborator {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl Collaborator {
    pub fn clone_of(remote: &Path) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("work");
        run_git(
            temp_dir.path(),
            &["clone", &remote.to_string_lossy(), &path.to_string_lossy()],
        )?;
        configure_identity(&path)?;
        Ok(Self {
            _temp_dir: temp_dir,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commits `content` to `file` on the current branch and pushes it.
    pub fn push_change(&self, file: &str, content: &str) -> Result<()> {
        std::fs::write(self.path.join(file), content)?;
        run_git(&self.path, &["add", file])?;
        run_git(&self.path, &["commit", "-m", &format!("Update {}", file)])?;
        run_git(&self.path, &["push", "origin", "HEAD"])?;
        Ok(())
    }

    pub fn checkout_new(&self, branch: &str) -> Result<()> {
        run_git(&self.path, &["checkout", "-b", branch])?;
        Ok(())
    }
}

pub fn configure_identity(path: &Path) -> Result<()> {
    run_git(path, &["config", "user.email", "test@example.com"])?;
    run_git(path, &["config", "user.name", "Test User"])?;
    run_git(path, &["config", "pull.rebase", "false"])?;
    Ok(())
}

/// A directory of bare repositories, addressed like a git server:
/// `<root>/<name>.git`.
pub struct GitServer {
    root: TempDir,
}

impl GitServer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            root: TempDir::new()?,
        })
    }

    pub fn url(&self) -> String {
        self.root.path().to_string_lossy().into_owned()
    }

    pub fn bare_path(&self, name: &str) -> PathBuf {
        self.root.path().join(format!("{}.git", name))
    }

    /// Creates `<name>.git` with `master`, plus `develop` one commit ahead.
    pub fn add_repository(&self, name: &str) -> Result<Collaborator> {
        let bare = self.bare_path(name);
        std::fs::create_dir_all(&bare)?;
        run_git(&bare, &["init", "--bare", "-b", "master"])?;

        let seed = Collaborator::clone_of(&bare)?;
        seed.push_change("README.md", "# seed\n")?;
        seed.checkout_new("develop")?;
        seed.push_change("feature.txt", "new feature\n")?;
        Ok(seed)
    }

    pub fn rev(&self, name: &str, branch: &str) -> Result<String> {
        Ok(run_git(&self.bare_path(name), &["rev-parse", branch])?)
    }
}
