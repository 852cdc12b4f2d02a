//! Git command wrappers.
//!
//! This module provides a thin wrapper around git CLI commands, handling command
//! execution, optional `sudo -u` impersonation and error formatting. Callers go
//! through the [`GitRunner`] trait so the update and merge logic can be driven by
//! a scripted runner in tests.

use crate::config::Config;
use colored::Colorize;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Recovery logic matches on git's English messages; never block on a credential prompt.
const GIT_ENV: [(&str, &str); 2] = [("LC_ALL", "C"), ("GIT_TERMINAL_PROMPT", "0")];

/// Callback invoked before every git command, used for verbose tracing.
pub type GitLogger = fn(&Path, &[&str]);

pub fn verbose_logger(repo: &Path, args: &[&str]) {
    eprintln!(
        "{}",
        format!("    $ git {}  ({})", args.join(" "), repo.display()).dimmed()
    );
}

pub fn no_op_logger(_repo: &Path, _args: &[&str]) {}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit. `output` holds stdout and stderr combined.
    #[error("`{command}` failed: {output}")]
    Failed { command: String, output: String },

    #[error("invalid branch name: {0:?}")]
    InvalidBranch(String),
}

impl GitError {
    /// Combined output of a failed command, empty for other variants.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            GitError::Failed { output, .. } => output,
            _ => "",
        }
    }

    /// Pull failed because the branch has no upstream configured.
    #[must_use]
    pub fn is_missing_upstream(&self) -> bool {
        let output = self.output();
        output.contains("You asked me to pull without telling me which branch")
            || output.contains("Please specify which branch you want to merge with")
            || output.contains("There is no tracking information for the current branch")
    }

    /// Pull refused to overwrite uncommitted changes.
    #[must_use]
    pub fn is_local_changes_conflict(&self) -> bool {
        self.output()
            .contains("Your local changes to the following files would be overwritten")
    }
}

/// Runs git in a repository and returns its combined, trimmed output.
pub trait GitRunner {
    fn run(&self, repo: &Path, args: &[&str]) -> Result<String, GitError>;
}

/// Runs the system `git`, optionally as another OS user through `sudo -u`.
#[derive(Debug, Clone)]
pub struct SystemGit {
    run_as: Option<String>,
    logger: GitLogger,
}

impl SystemGit {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            run_as: None,
            logger: config.git_logger(),
        }
    }

    /// Run every command as `user` via `sudo -u`.
    #[must_use]
    pub fn run_as(mut self, user: Option<String>) -> Self {
        self.run_as = user.filter(|u| !u.is_empty());
        self
    }
}

impl GitRunner for SystemGit {
    fn run(&self, repo: &Path, args: &[&str]) -> Result<String, GitError> {
        (self.logger)(repo, args);
        execute(self.command(repo, args), args)
    }
}

impl SystemGit {
    /// sudo resets the environment, so the git settings are passed through `env`.
    fn command(&self, repo: &Path, args: &[&str]) -> Command {
        let mut command = match &self.run_as {
            Some(user) => {
                let mut sudo = Command::new("sudo");
                sudo.args(["-u", user, "env"]);
                sudo.args(GIT_ENV.iter().map(|(key, value)| format!("{}={}", key, value)));
                sudo.arg("git");
                sudo
            }
            None => Command::new("git"),
        };
        command.current_dir(repo).args(args);
        command
    }
}

/// Runs plain `git` in `repo` without logging or impersonation.
pub fn run_git(repo: &Path, args: &[&str]) -> Result<String, GitError> {
    let mut command = Command::new("git");
    command.current_dir(repo).args(args);
    execute(command, args)
}

fn execute(mut command: Command, args: &[&str]) -> Result<String, GitError> {
    let command_line = format!("git {}", args.join(" "));
    let output = command
        .envs(GIT_ENV)
        .output()
        .map_err(|source| GitError::Spawn {
            command: command_line.clone(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !combined.trim().is_empty() {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    let combined = combined.trim().to_string();

    if output.status.success() {
        tracing::trace!(command = %command_line, "git succeeded");
        Ok(combined)
    } else {
        tracing::debug!(command = %command_line, status = ?output.status.code(), "git failed");
        Err(GitError::Failed {
            command: command_line,
            output: combined,
        })
    }
}

fn validate_branch_name(branch: &str) -> Result<(), GitError> {
    if branch.is_empty()
        || branch.starts_with('-')
        || branch.contains('\0')
        || branch.contains('\n')
        || branch.contains(char::is_whitespace)
    {
        return Err(GitError::InvalidBranch(branch.to_string()));
    }
    Ok(())
}

pub fn get_current_branch(git: &dyn GitRunner, repo: &Path) -> Result<String, GitError> {
    git.run(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Reports what a fetch would do without touching any refs.
pub fn dry_fetch(git: &dyn GitRunner, repo: &Path) -> Result<String, GitError> {
    git.run(repo, &["fetch", "--dry-run"])
}

pub fn fetch(git: &dyn GitRunner, repo: &Path) -> Result<String, GitError> {
    git.run(repo, &["fetch"])
}

/// Local and remote-tracking branch names from `git branch -a`, without markers.
pub fn list_all_branches(git: &dyn GitRunner, repo: &Path) -> Result<Vec<String>, GitError> {
    let output = git.run(repo, &["branch", "-a"])?;
    Ok(output
        .lines()
        .map(|line| line.trim_start_matches(['*', '+']).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Whether `remotes/origin/<branch>` appears in `git branch -a`.
pub fn has_remote_branch(
    git: &dyn GitRunner,
    repo: &Path,
    remote: &str,
    branch: &str,
) -> Result<bool, GitError> {
    let wanted = format!("remotes/{}/{}", remote, branch);
    Ok(list_all_branches(git, repo)?
        .iter()
        .any(|line| line == &wanted))
}

pub fn checkout(
    git: &dyn GitRunner,
    repo: &Path,
    branch: &str,
    force: bool,
) -> Result<String, GitError> {
    validate_branch_name(branch)?;
    if force {
        git.run(repo, &["checkout", "--force", branch])
    } else {
        git.run(repo, &["checkout", branch])
    }
}

/// Human readable age of the last commit, e.g. "3 days ago".
pub fn last_commit_age(git: &dyn GitRunner, repo: &Path) -> Result<String, GitError> {
    git.run(repo, &["log", "-n", "1", "--pretty=%ar"])
}

/// `git status -uno`, used to spot a fetch that happened without a pull.
pub fn status_tracked(git: &dyn GitRunner, repo: &Path) -> Result<String, GitError> {
    git.run(repo, &["status", "-uno"])
}

pub fn has_uncommitted_changes(git: &dyn GitRunner, repo: &Path) -> Result<bool, GitError> {
    git.run(repo, &["status", "--porcelain"])
        .map(|output| !output.is_empty())
}

pub fn reset_hard(git: &dyn GitRunner, repo: &Path) -> Result<String, GitError> {
    git.run(repo, &["reset", "--hard", "HEAD"])
}

pub fn pull(git: &dyn GitRunner, repo: &Path) -> Result<String, GitError> {
    git.run(repo, &["pull"])
}

pub fn set_upstream(
    git: &dyn GitRunner,
    repo: &Path,
    remote: &str,
    branch: &str,
) -> Result<String, GitError> {
    validate_branch_name(branch)?;
    let upstream = format!("{}/{}", remote, branch);
    git.run(repo, &["branch", "--set-upstream-to", &upstream, branch])
}

/// Clones `url` into `dest`, running git from `parent`.
pub fn clone(
    git: &dyn GitRunner,
    parent: &Path,
    url: &str,
    dest: &Path,
) -> Result<String, GitError> {
    let dest = dest.to_string_lossy();
    git.run(parent, &["clone", url, dest.as_ref()])
}

pub fn merge(git: &dyn GitRunner, repo: &Path, branch: &str) -> Result<String, GitError> {
    validate_branch_name(branch)?;
    git.run(repo, &["merge", branch])
}

pub fn push(
    git: &dyn GitRunner,
    repo: &Path,
    remote: &str,
    branch: &str,
) -> Result<String, GitError> {
    validate_branch_name(branch)?;
    git.run(repo, &["push", remote, branch])
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGit;
    use super::*;

    #[test]
    fn test_validate_branch_name_rejects_option_like_and_blank_names() {
        assert!(validate_branch_name("feature/x").is_ok());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("--upload-pack=evil").is_err());
        assert!(validate_branch_name("a b").is_err());
        assert!(validate_branch_name("a\nb").is_err());
    }

    #[test]
    fn test_has_remote_branch_matches_whole_lines_only() {
        let git = ScriptedGit::new().ok(
            "branch -a",
            "* master\n  remotes/origin/HEAD -> origin/master\n  remotes/origin/feature-x",
        );
        assert!(!has_remote_branch(&git, Path::new("/r"), "origin", "feature").unwrap());

        let git = ScriptedGit::new().ok("branch -a", "* master\n  remotes/origin/feature");
        assert!(has_remote_branch(&git, Path::new("/r"), "origin", "feature").unwrap());
    }

    #[test]
    fn test_error_classification() {
        let upstream = GitError::Failed {
            command: "git pull".into(),
            output: "There is no tracking information for the current branch.\nPlease specify which branch you want to merge with.".into(),
        };
        assert!(upstream.is_missing_upstream());
        assert!(!upstream.is_local_changes_conflict());

        let dirty = GitError::Failed {
            command: "git pull".into(),
            output: "error: Your local changes to the following files would be overwritten by merge:".into(),
        };
        assert!(dirty.is_local_changes_conflict());
        assert!(!dirty.is_missing_upstream());

        assert_eq!(GitError::InvalidBranch("x y".into()).output(), "");
    }

    fn program_and_args(command: &Command) -> Vec<String> {
        std::iter::once(command.get_program())
            .chain(command.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_impersonated_git_keeps_locale_and_prompt_settings_through_sudo() {
        let git = SystemGit::new(&Config::default()).run_as(Some("www-data".into()));

        let command = git.command(Path::new("/srv/www/shop"), &["pull"]);

        assert_eq!(
            program_and_args(&command),
            vec!["sudo", "-u", "www-data", "env", "LC_ALL=C", "GIT_TERMINAL_PROMPT=0", "git", "pull"]
        );
        assert_eq!(command.get_current_dir(), Some(Path::new("/srv/www/shop")));
    }

    #[test]
    fn test_plain_git_runs_without_sudo() {
        let git = SystemGit::new(&Config::default()).run_as(Some(String::new()));

        let command = git.command(Path::new("/r"), &["status", "--porcelain"]);

        assert_eq!(program_and_args(&command), vec!["git", "status", "--porcelain"]);
    }

    #[test]
    fn test_failed_command_keeps_command_line_and_output() {
        let tmp = tempfile::TempDir::new().unwrap();

        let err = run_git(tmp.path(), &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_err();

        match err {
            GitError::Failed { command, output } => {
                assert_eq!(command, "git rev-parse --abbrev-ref HEAD");
                assert!(output.contains("not a git repository"), "{}", output);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_checkout_uses_force_flag_only_when_requested() {
        let git = ScriptedGit::new();
        checkout(&git, Path::new("/r"), "develop", true).unwrap();
        checkout(&git, Path::new("/r"), "develop", false).unwrap();
        assert_eq!(
            git.calls(),
            vec!["checkout --force develop", "checkout develop"]
        );
    }
}
