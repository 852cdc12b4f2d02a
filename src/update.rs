//! Per-repository pull logic.
//!
//! Each repository goes through the same sequence: inspect the current branch,
//! dry-run a fetch, optionally switch to a requested branch, decide whether a
//! pull is needed at all, guard against a dirty tree, then pull with at most one
//! scripted recovery. Every git failure ends only the repository it happened in.

use crate::constants::ORIGIN;
use crate::git::{self, GitError, GitRunner};
use crate::output::Severity;
use crate::repo::{self, Discovery, RepositoryTarget};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const NEVER_COMMITTED: &str = "never";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStep {
    Started,
    DetectingBranch,
    DryFetch,
    SwitchingBranch,
    CheckingChanges,
    Resetting,
    Pulling,
    RepairingUpstream,
    Completed,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateStep::Started => "starting",
            UpdateStep::DetectingBranch => "detecting current branch",
            UpdateStep::DryFetch => "checking remote for changes",
            UpdateStep::SwitchingBranch => "switching branch",
            UpdateStep::CheckingChanges => "checking working tree",
            UpdateStep::Resetting => "resetting local changes",
            UpdateStep::Pulling => "pulling",
            UpdateStep::RepairingUpstream => "setting upstream branch",
            UpdateStep::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// What the operator asked every repository to converge on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub branch: Option<String>,
    /// Discard local modifications on checkout and pull.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchChange {
    pub repository: String,
    pub from: String,
    pub to: String,
}

/// Remediation applied before the single pull retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    SetUpstream,
    ResetLocalChanges,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// Age of the last commit before pulling, e.g. "2 hours ago".
    pub last_commit: String,
    pub already_up_to_date: bool,
    pub output: String,
    pub recovery: Option<Recovery>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub step: UpdateStep,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No `.git` directory; nothing to do.
    NotARepository,
    NoChanges { last_commit: String },
    Pulled(PullReport),
    Failed(UpdateFailure),
}

impl UpdateOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, UpdateOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct UpdateResult {
    pub target: RepositoryTarget,
    pub outcome: UpdateOutcome,
    pub branch_change: Option<BranchChange>,
    pub duration: Duration,
}

/// Hooks for presenting update progress. Everything but `on_step` and
/// `on_complete` is optional.
pub trait UpdateCallbacks {
    fn on_directory(&self, _dir: &Path, _discovery: &Discovery) {}
    fn on_invalid_directory(&self, _dir: &Path, _error: &anyhow::Error) {}
    fn on_update_start(&self, _target: &RepositoryTarget) {}
    fn on_step(&self, step: &UpdateStep);
    fn on_message(&self, _severity: Severity, _message: &str) {}
    fn on_complete(&self, result: &UpdateResult);
}

/// Callbacks that ignore everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallbacks;

impl UpdateCallbacks for NoOpCallbacks {
    fn on_step(&self, _step: &UpdateStep) {}
    fn on_complete(&self, _result: &UpdateResult) {}
}

/// Accumulated results of one local pull run.
#[derive(Debug, Default)]
pub struct LocalRun {
    pub results: Vec<UpdateResult>,
    pub branch_changes: Vec<BranchChange>,
    pub invalid_dirs: Vec<PathBuf>,
}

impl LocalRun {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_failure()).count()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures() == 0 && self.invalid_dirs.is_empty()
    }
}

/// Updates every repository found under `dirs`, in order.
pub fn update_directories(
    dirs: &[PathBuf],
    recurse_all: bool,
    configured_repos: &[String],
    options: &UpdateOptions,
    git: &dyn GitRunner,
    callbacks: &dyn UpdateCallbacks,
) -> LocalRun {
    let mut run = LocalRun::default();

    for dir in dirs {
        let discovery = match repo::targets_for_directory(dir, recurse_all, configured_repos) {
            Ok(discovery) => discovery,
            Err(e) => {
                callbacks.on_invalid_directory(dir, &e);
                run.invalid_dirs.push(dir.clone());
                continue;
            }
        };
        callbacks.on_directory(dir, &discovery);

        for target in discovery.targets() {
            let result = update(target, options, git, callbacks);
            if let Some(change) = &result.branch_change {
                run.branch_changes.push(change.clone());
            }
            run.results.push(result);
        }
    }

    run
}

/// Brings one repository up to date. Never panics or propagates: every failure
/// is captured in the returned outcome.
pub fn update(
    target: &RepositoryTarget,
    options: &UpdateOptions,
    git: &dyn GitRunner,
    callbacks: &dyn UpdateCallbacks,
) -> UpdateResult {
    let start = Instant::now();
    callbacks.on_update_start(target);

    let mut branch_change = None;
    let outcome = if repo::is_git_repo(&target.path) {
        let mut updater = Updater {
            target,
            options,
            git,
            callbacks,
            branch_change: &mut branch_change,
        };
        updater.run().unwrap_or_else(UpdateOutcome::Failed)
    } else {
        UpdateOutcome::NotARepository
    };

    let result = UpdateResult {
        target: target.clone(),
        outcome,
        branch_change,
        duration: start.elapsed(),
    };
    callbacks.on_complete(&result);
    result
}

struct Updater<'a> {
    target: &'a RepositoryTarget,
    options: &'a UpdateOptions,
    git: &'a dyn GitRunner,
    callbacks: &'a dyn UpdateCallbacks,
    branch_change: &'a mut Option<BranchChange>,
}

impl Updater<'_> {
    fn path(&self) -> &Path {
        &self.target.path
    }

    fn step(&self, step: UpdateStep) {
        self.callbacks.on_step(&step);
    }

    fn say(&self, severity: Severity, message: impl AsRef<str>) {
        let message = message.as_ref();
        if !message.is_empty() {
            self.callbacks.on_message(severity, message);
        }
    }

    fn fail(&self, step: UpdateStep, headline: &str, error: &GitError) -> UpdateFailure {
        let detail = match error.output() {
            "" => error.to_string(),
            output => output.to_string(),
        };
        self.say(Severity::Error, format!("{}\n{}", headline, detail));
        UpdateFailure {
            step,
            error: format!("{}: {}", headline, detail),
        }
    }

    fn run(&mut self) -> Result<UpdateOutcome, UpdateFailure> {
        self.step(UpdateStep::Started);

        self.step(UpdateStep::DetectingBranch);
        let mut current = match git::get_current_branch(self.git, self.path()) {
            Ok(branch) if !branch.is_empty() => Some(branch),
            Ok(_) => None,
            Err(e) => {
                self.say(Severity::Warning, format!("warning: {}", e.output()));
                None
            }
        };

        self.step(UpdateStep::DryFetch);
        let dry_fetch = git::dry_fetch(self.git, self.path()).map_err(|e| {
            self.fail(
                UpdateStep::DryFetch,
                "cannot fetch; do you have a remote repository configured correctly?",
                &e,
            )
        })?;

        if let (Some(wanted), Some(branch)) = (self.options.branch.clone(), current.clone()) {
            if wanted != branch {
                self.switch_branch(&branch, &wanted)?;
                if self.branch_change.is_some() {
                    current = Some(wanted);
                }
            }
        }

        let last_commit = git::last_commit_age(self.git, self.path())
            .ok()
            .filter(|age| !age.is_empty())
            .unwrap_or_else(|| NEVER_COMMITTED.to_string());

        self.step(UpdateStep::CheckingChanges);
        if dry_fetch.is_empty() {
            // A fetch may have happened earlier without a pull.
            let status = git::status_tracked(self.git, self.path()).map_err(|e| {
                self.fail(UpdateStep::CheckingChanges, "could not read status", &e)
            })?;
            if !status.contains("Your branch is behind") {
                self.say(
                    Severity::Note,
                    format!("No new changes. Last commit was {}.", last_commit),
                );
                return Ok(UpdateOutcome::NoChanges { last_commit });
            }
        }

        self.say(Severity::Info, "There are new changes upstream...");

        let dirty = git::has_uncommitted_changes(self.git, self.path()).map_err(|e| {
            self.fail(UpdateStep::CheckingChanges, "could not read status", &e)
        })?;
        if dirty {
            self.say(
                Severity::Warning,
                "Warning: you have uncommitted changes in this repository!",
            );
            if self.options.force {
                self.say(
                    Severity::Error,
                    "Since force is enabled, I will now reset your branch:",
                );
                self.reset()?;
            }
        }

        self.pull_with_recovery(current.as_deref(), last_commit)
    }

    fn switch_branch(&mut self, from: &str, to: &str) -> Result<(), UpdateFailure> {
        self.step(UpdateStep::SwitchingBranch);
        self.say(
            Severity::Warning,
            format!("branch to switch from: {}\nbranch to switch to: {}", from, to),
        );

        let fetched = git::fetch(self.git, self.path())
            .map_err(|e| self.fail(UpdateStep::SwitchingBranch, "Could not fetch:", &e))?;
        self.say(Severity::Warning, &fetched);

        let exists = git::has_remote_branch(self.git, self.path(), ORIGIN, to).map_err(|e| {
            self.fail(UpdateStep::SwitchingBranch, "Could not list branches:", &e)
        })?;
        if !exists {
            self.say(
                Severity::Error,
                format!("branch {} does not exist. skipping checkout.", to),
            );
            return Ok(());
        }

        self.say(
            Severity::Success,
            format!("Attempting to switch branch from {} to {}", from, to),
        );
        let output = git::checkout(self.git, self.path(), to, self.options.force).map_err(|e| {
            self.fail(UpdateStep::SwitchingBranch, "Could not check out branch:", &e)
        })?;
        self.say(Severity::Warning, &output);

        *self.branch_change = Some(BranchChange {
            repository: self.target.logical_name.clone(),
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    fn reset(&self) -> Result<(), UpdateFailure> {
        self.step(UpdateStep::Resetting);
        let output = git::reset_hard(self.git, self.path())
            .map_err(|e| self.fail(UpdateStep::Resetting, "Could not reset:", &e))?;
        self.say(Severity::Success, &output);
        Ok(())
    }

    fn pull_with_recovery(
        &self,
        current: Option<&str>,
        last_commit: String,
    ) -> Result<UpdateOutcome, UpdateFailure> {
        self.step(UpdateStep::Pulling);
        self.say(Severity::Success, "Pulling changes...");

        let (output, recovery) = match git::pull(self.git, self.path()) {
            Ok(output) => (output, None),
            Err(first) => {
                let recovery = self.recover(&first, current)?;
                self.step(UpdateStep::Pulling);
                let output = git::pull(self.git, self.path())
                    .map_err(|e| self.fail(UpdateStep::Pulling, "Pull failed after retry:", &e))?;
                (output, Some(recovery))
            }
        };

        let already_up_to_date =
            output.contains("Already up to date") || output.contains("Already up-to-date");
        if already_up_to_date {
            self.say(
                Severity::Info,
                "No new changes in your branch. However, upstream the following changes happened:",
            );
        } else {
            self.say(
                Severity::Info,
                format!("New changes pulled (previous commit was {}):", last_commit),
            );
        }
        self.say(Severity::Note, &output);

        self.step(UpdateStep::Completed);
        Ok(UpdateOutcome::Pulled(PullReport {
            last_commit,
            already_up_to_date,
            output,
            recovery,
        }))
    }

    /// Applies the one remediation that matches `error`, if any.
    fn recover(&self, error: &GitError, current: Option<&str>) -> Result<Recovery, UpdateFailure> {
        if error.is_missing_upstream() {
            let Some(branch) = current else {
                return Err(self.fail(
                    UpdateStep::RepairingUpstream,
                    "No upstream configured and the current branch is unknown:",
                    error,
                ));
            };
            self.step(UpdateStep::RepairingUpstream);
            let output = git::set_upstream(self.git, self.path(), ORIGIN, branch).map_err(|e| {
                self.fail(UpdateStep::RepairingUpstream, "Could not set upstream:", &e)
            })?;
            self.say(Severity::Success, &output);
            return Ok(Recovery::SetUpstream);
        }

        if self.options.force && error.is_local_changes_conflict() {
            self.reset()?;
            return Ok(Recovery::ResetLocalChanges);
        }

        Err(self.fail(UpdateStep::Pulling, "Pull failed:", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::ScriptedGit;
    use std::cell::RefCell;
    use tempfile::TempDir;

    const BEHIND: &str = "On branch master\nYour branch is behind 'origin/master' by 1 commit, and can be fast-forwarded.";
    const UP_TO_DATE: &str = "On branch master\nYour branch is up to date with 'origin/master'.";
    const FETCHED: &str = "From /srv/remote\n   1a2b3c4..5d6e7f8  master     -> origin/master";
    const NO_TRACKING: &str = "There is no tracking information for the current branch.\nPlease specify which branch you want to merge with.";

    #[derive(Default)]
    struct Recorder {
        steps: RefCell<Vec<UpdateStep>>,
        messages: RefCell<Vec<(Severity, String)>>,
    }

    impl UpdateCallbacks for Recorder {
        fn on_step(&self, step: &UpdateStep) {
            self.steps.borrow_mut().push(step.clone());
        }

        fn on_message(&self, severity: Severity, message: &str) {
            self.messages
                .borrow_mut()
                .push((severity, message.to_string()));
        }

        fn on_complete(&self, _result: &UpdateResult) {}
    }

    impl Recorder {
        fn saw(&self, needle: &str) -> bool {
            self.messages.borrow().iter().any(|(_, m)| m.contains(needle))
        }
    }

    fn target(tmp: &TempDir, name: &str) -> RepositoryTarget {
        let path = tmp.path().join(name);
        std::fs::create_dir_all(path.join(".git")).unwrap();
        RepositoryTarget::new(path, name)
    }

    fn run(git: &ScriptedGit, options: &UpdateOptions) -> (UpdateResult, Recorder) {
        let tmp = TempDir::new().unwrap();
        let recorder = Recorder::default();
        let result = update(&target(&tmp, "shop"), options, git, &recorder);
        (result, recorder)
    }

    fn ran_any(git: &ScriptedGit, prefixes: &[&str]) -> bool {
        git.calls()
            .iter()
            .any(|c| prefixes.iter().any(|p| c.starts_with(p)))
    }

    #[test]
    fn test_no_upstream_changes_reports_no_changes_and_touches_nothing() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("fetch --dry-run", "")
            .ok("log -n 1 --pretty=%ar", "3 days ago")
            .ok("status -uno", UP_TO_DATE);

        let (result, recorder) = run(&git, &UpdateOptions::default());

        assert_eq!(
            result.outcome,
            UpdateOutcome::NoChanges {
                last_commit: "3 days ago".into()
            }
        );
        assert!(!ran_any(&git, &["checkout", "reset", "pull"]));
        assert!(result.branch_change.is_none());
        assert!(recorder.saw("No new changes. Last commit was 3 days ago."));
    }

    #[test]
    fn test_behind_status_triggers_pull_even_when_dry_fetch_is_empty() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("fetch --dry-run", "")
            .ok("status -uno", BEHIND)
            .ok("pull", "Updating 1a2b3c4..5d6e7f8\nFast-forward");

        let (result, _) = run(&git, &UpdateOptions::default());

        match result.outcome {
            UpdateOutcome::Pulled(report) => {
                assert!(!report.already_up_to_date);
                assert_eq!(report.recovery, None);
            }
            other => panic!("expected pull, got {:?}", other),
        }
        assert_eq!(git.count("pull"), 1);
    }

    #[test]
    fn test_switches_to_requested_branch_and_records_change() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("fetch --dry-run", "")
            .ok("branch -a", "* master\n  remotes/origin/develop\n  remotes/origin/master")
            .ok("checkout develop", "Switched to branch 'develop'")
            .ok("status -uno", BEHIND)
            .ok("pull", "Fast-forward");
        let options = UpdateOptions {
            branch: Some("develop".into()),
            force: false,
        };

        let (result, _) = run(&git, &options);

        assert_eq!(
            result.branch_change,
            Some(BranchChange {
                repository: "shop".into(),
                from: "master".into(),
                to: "develop".into(),
            })
        );
        assert!(matches!(result.outcome, UpdateOutcome::Pulled(_)));

        let calls = git.calls();
        let checkout = calls.iter().position(|c| c == "checkout develop").unwrap();
        let status = calls.iter().position(|c| c == "status -uno").unwrap();
        assert!(checkout < status, "pull necessity is evaluated after the switch");
        assert!(calls.iter().any(|c| c == "fetch"));
    }

    #[test]
    fn test_force_uses_forced_checkout() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("branch -a", "  remotes/origin/develop")
            .ok("status -uno", UP_TO_DATE);
        let options = UpdateOptions {
            branch: Some("develop".into()),
            force: true,
        };

        let (result, _) = run(&git, &options);

        assert!(git.calls().contains(&"checkout --force develop".to_string()));
        assert!(result.branch_change.is_some());
    }

    #[test]
    fn test_missing_remote_branch_skips_checkout() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("branch -a", "* master\n  remotes/origin/master")
            .ok("status -uno", UP_TO_DATE);
        let options = UpdateOptions {
            branch: Some("release".into()),
            force: false,
        };

        let (result, recorder) = run(&git, &options);

        assert!(!ran_any(&git, &["checkout"]));
        assert!(result.branch_change.is_none());
        assert!(recorder.saw("branch release does not exist. skipping checkout."));
        assert!(matches!(result.outcome, UpdateOutcome::NoChanges { .. }));
    }

    #[test]
    fn test_failed_plain_checkout_ends_update_without_forcing() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("branch -a", "  remotes/origin/develop")
            .fail(
                "checkout develop",
                "error: Your local changes to the following files would be overwritten by checkout",
            );
        let options = UpdateOptions {
            branch: Some("develop".into()),
            force: false,
        };

        let (result, _) = run(&git, &options);

        match result.outcome {
            UpdateOutcome::Failed(failure) => assert_eq!(failure.step, UpdateStep::SwitchingBranch),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!ran_any(&git, &["checkout --force", "pull", "reset"]));
        assert!(result.branch_change.is_none());
    }

    #[test]
    fn test_already_on_requested_branch_skips_enforcement() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "develop")
            .ok("status -uno", UP_TO_DATE);
        let options = UpdateOptions {
            branch: Some("develop".into()),
            force: false,
        };

        let (result, _) = run(&git, &options);

        assert!(!ran_any(&git, &["branch -a", "checkout"]));
        assert!(result.branch_change.is_none());
    }

    #[test]
    fn test_unknown_branch_is_a_warning_and_disables_enforcement() {
        let git = ScriptedGit::new()
            .fail("rev-parse --abbrev-ref HEAD", "fatal: ambiguous argument 'HEAD'")
            .ok("status -uno", UP_TO_DATE);
        let options = UpdateOptions {
            branch: Some("develop".into()),
            force: false,
        };

        let (result, recorder) = run(&git, &options);

        assert!(matches!(result.outcome, UpdateOutcome::NoChanges { .. }));
        assert!(!ran_any(&git, &["checkout"]));
        assert!(
            recorder
                .messages
                .borrow()
                .iter()
                .any(|(s, m)| *s == Severity::Warning && m.contains("ambiguous argument"))
        );
    }

    #[test]
    fn test_dry_fetch_failure_aborts_repository() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .fail("fetch --dry-run", "fatal: 'origin' does not appear to be a git repository");

        let (result, recorder) = run(&git, &UpdateOptions::default());

        match result.outcome {
            UpdateOutcome::Failed(failure) => {
                assert_eq!(failure.step, UpdateStep::DryFetch);
                assert!(failure.error.contains("does not appear to be a git repository"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(git.calls().len(), 2);
        assert!(recorder.saw("cannot fetch"));
    }

    #[test]
    fn test_missing_upstream_sets_upstream_and_retries_once() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "feature")
            .ok("fetch --dry-run", FETCHED)
            .fail("pull", NO_TRACKING)
            .ok("pull", "Fast-forward");

        let (result, _) = run(&git, &UpdateOptions::default());

        match result.outcome {
            UpdateOutcome::Pulled(report) => assert_eq!(report.recovery, Some(Recovery::SetUpstream)),
            other => panic!("expected pull, got {:?}", other),
        }
        assert_eq!(git.count("pull"), 2);
        assert_eq!(
            git.count("branch --set-upstream-to origin/feature feature"),
            1
        );
    }

    #[test]
    fn test_missing_upstream_retry_failure_is_not_retried_again() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "feature")
            .ok("fetch --dry-run", FETCHED)
            .fail("pull", NO_TRACKING)
            .fail("pull", NO_TRACKING)
            .ok("pull", "never reached");

        let (result, _) = run(&git, &UpdateOptions::default());

        match result.outcome {
            UpdateOutcome::Failed(failure) => assert_eq!(failure.step, UpdateStep::Pulling),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(git.count("pull"), 2);
    }

    #[test]
    fn test_missing_upstream_with_unknown_branch_fails_without_retry() {
        let git = ScriptedGit::new()
            .fail("rev-parse --abbrev-ref HEAD", "fatal")
            .ok("fetch --dry-run", FETCHED)
            .fail("pull", NO_TRACKING);

        let (result, _) = run(&git, &UpdateOptions::default());

        assert!(result.outcome.is_failure());
        assert_eq!(git.count("pull"), 1);
        assert!(!ran_any(&git, &["branch --set-upstream-to"]));
    }

    #[test]
    fn test_force_resets_and_retries_when_local_changes_block_pull() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("fetch --dry-run", FETCHED)
            .fail(
                "pull",
                "error: Your local changes to the following files would be overwritten by merge:\n\tREADME.md",
            )
            .ok("pull", "Fast-forward");
        let options = UpdateOptions {
            branch: None,
            force: true,
        };

        let (result, _) = run(&git, &options);

        match result.outcome {
            UpdateOutcome::Pulled(report) => {
                assert_eq!(report.recovery, Some(Recovery::ResetLocalChanges))
            }
            other => panic!("expected pull, got {:?}", other),
        }
        assert_eq!(git.count("reset --hard HEAD"), 1);
    }

    #[test]
    fn test_local_changes_without_force_fail_after_single_pull() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("fetch --dry-run", FETCHED)
            .ok("status --porcelain", " M README.md")
            .fail(
                "pull",
                "error: Your local changes to the following files would be overwritten by merge:",
            );

        let (result, recorder) = run(&git, &UpdateOptions::default());

        assert!(result.outcome.is_failure());
        assert_eq!(git.count("pull"), 1);
        assert!(!ran_any(&git, &["reset"]));
        assert!(recorder.saw("uncommitted changes"));
    }

    #[test]
    fn test_dirty_tree_is_reset_before_pull_when_forced() {
        let git = ScriptedGit::new()
            .ok("rev-parse --abbrev-ref HEAD", "master")
            .ok("fetch --dry-run", FETCHED)
            .ok("status --porcelain", " M README.md")
            .ok("pull", "Already up to date.");
        let options = UpdateOptions {
            branch: None,
            force: true,
        };

        let (result, _) = run(&git, &options);

        let calls = git.calls();
        let reset = calls.iter().position(|c| c == "reset --hard HEAD").unwrap();
        let pull = calls.iter().position(|c| c == "pull").unwrap();
        assert!(reset < pull);
        match result.outcome {
            UpdateOutcome::Pulled(report) => assert!(report.already_up_to_date),
            other => panic!("expected pull, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_git_dir_is_not_applicable() {
        let tmp = TempDir::new().unwrap();
        let git = ScriptedGit::new();
        let target = RepositoryTarget::new(tmp.path(), "plain");

        let result = update(&target, &UpdateOptions::default(), &git, &Recorder::default());

        assert_eq!(result.outcome, UpdateOutcome::NotARepository);
        assert!(git.calls().is_empty());
    }

    #[test]
    fn test_failure_in_one_repository_does_not_stop_the_next() {
        let tmp = TempDir::new().unwrap();
        target(&tmp, "alpha");
        target(&tmp, "beta");
        let git = ScriptedGit::new()
            .fail("fetch --dry-run", "fatal: unreachable")
            .ok("fetch --dry-run", "")
            .ok("status -uno", UP_TO_DATE);

        let run = update_directories(
            &[tmp.path().to_path_buf(), tmp.path().join("missing")],
            true,
            &[],
            &UpdateOptions::default(),
            &git,
            &Recorder::default(),
        );

        assert_eq!(run.results.len(), 2);
        assert!(run.results[0].outcome.is_failure());
        assert!(matches!(run.results[1].outcome, UpdateOutcome::NoChanges { .. }));
        assert_eq!(run.failures(), 1);
        assert_eq!(run.invalid_dirs, vec![tmp.path().join("missing")]);
        assert!(!run.is_success());
    }
}
