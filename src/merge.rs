//! Merge one branch into another across every configured repository.
//!
//! Each repository is cloned into the working directory on first use, then
//! hard-reset, both branches are pulled, the source is merged into the
//! destination and the result pushed. The first failing command aborts the
//! whole run.

use crate::config::Verbosity;
use crate::constants::ORIGIN;
use crate::git::{self, GitError, GitRunner};
use crate::output::{self, Severity, Spinner};
use colored::Colorize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("cannot create working directory {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `output` holds everything the repository printed before the failure.
    #[error("merging {repository} failed: {source}")]
    Git {
        repository: String,
        output: String,
        #[source]
        source: GitError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoMerge {
    Merged { repository: String, output: String },
    Skipped { repository: String },
}

/// Severity of one line of merge output.
#[must_use]
pub fn classify_line(line: &str) -> Severity {
    if line.starts_with("error") || line.starts_with("CONFLICT") {
        Severity::Error
    } else {
        Severity::Success
    }
}

pub struct MergeAll<'a> {
    git: &'a dyn GitRunner,
    git_server: &'a str,
    working_dir: &'a Path,
    repositories: &'a [String],
    verbosity: Verbosity,
}

impl<'a> MergeAll<'a> {
    pub fn new(
        git: &'a dyn GitRunner,
        git_server: &'a str,
        working_dir: &'a Path,
        repositories: &'a [String],
        verbosity: Verbosity,
    ) -> Self {
        Self {
            git,
            git_server,
            working_dir,
            repositories,
            verbosity,
        }
    }

    /// Merges `from` into `to` in every repository. Two-way first merges `to`
    /// back into `from`, then runs the primary pass.
    pub fn run(&self, from: &str, to: &str, one_way: bool) -> Result<Vec<RepoMerge>, MergeError> {
        std::fs::create_dir_all(self.working_dir).map_err(|source| MergeError::WorkingDir {
            path: self.working_dir.to_path_buf(),
            source,
        })?;

        let mut reports = Vec::new();
        if !one_way {
            reports.extend(self.pass(to, from)?);
        }
        reports.extend(self.pass(from, to)?);
        Ok(reports)
    }

    fn pass(&self, from: &str, to: &str) -> Result<Vec<RepoMerge>, MergeError> {
        output::out(
            1,
            Severity::Note.paint(&format!("Pulling from {} and merging into {}", from, to)).to_string(),
        );

        let mut reports = Vec::with_capacity(self.repositories.len());
        for repository in self.repositories {
            match self.merge_repository(repository, from, to) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    if let MergeError::Git { output, source, .. } = &e {
                        output::out(2, "Error: ".red().to_string());
                        if !output.is_empty() {
                            output::out(2, output.red().to_string());
                        }
                        output::out(2, source.to_string().red().to_string());
                    }
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }

    fn merge_repository(&self, repository: &str, from: &str, to: &str) -> Result<RepoMerge, MergeError> {
        output::out(
            1,
            Severity::Note.paint(&format!("------- REPO: {} -------", repository)).to_string(),
        );

        let path = self.working_dir.join(repository);
        let mut transcript = Vec::new();

        let fail = |transcript: &[String], source: GitError| MergeError::Git {
            repository: repository.to_string(),
            output: transcript.join("\n"),
            source,
        };

        if !path.exists() {
            let url = format!("{}/{}.git", self.git_server, repository);
            let spinner = Spinner::start(format!("Cloning {}...", url), self.verbosity);
            match git::clone(self.git, self.working_dir, &url, &path) {
                Ok(out) if out.contains("Access denied") => {
                    spinner.clear();
                    return Ok(self.skipped(repository));
                }
                Ok(out) => {
                    spinner.clear();
                    transcript.push(out);
                }
                Err(e) if e.output().contains("Access denied") => {
                    spinner.clear();
                    return Ok(self.skipped(repository));
                }
                Err(e) => {
                    spinner.finish_failed(repository);
                    return Err(fail(&transcript, e));
                }
            }
        }

        let steps: [&dyn Fn() -> Result<String, GitError>; 7] = [
            &|| git::reset_hard(self.git, &path),
            &|| git::checkout(self.git, &path, from, true),
            &|| git::pull(self.git, &path),
            &|| git::checkout(self.git, &path, to, true),
            &|| git::pull(self.git, &path),
            &|| git::merge(self.git, &path, from),
            &|| git::push(self.git, &path, ORIGIN, to),
        ];
        for step in steps {
            match step() {
                Ok(out) => transcript.push(out),
                Err(e) => return Err(fail(&transcript, e)),
            }
        }

        transcript.retain(|s| !s.is_empty());
        let output = transcript.join("\n");
        for line in output.lines() {
            output::out(2, classify_line(line).paint(line).to_string());
        }

        Ok(RepoMerge::Merged {
            repository: repository.to_string(),
            output,
        })
    }

    fn skipped(&self, repository: &str) -> RepoMerge {
        output::out(2, Severity::Warning.paint("skipped").to_string());
        tracing::info!(repository, "Clone access denied; skipping");
        RepoMerge::Skipped {
            repository: repository.to_string(),
        }
    }
}
