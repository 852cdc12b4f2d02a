//! Remote fan-out: run the local pull on one machine or many.
//!
//! With no servers requested the updater runs in-process. Otherwise each
//! resolved host gets one SSH session, reused for every command sent to it,
//! and the `gpull-local` command line built from [`PullOptions`] runs there.
//! Sessions live in a [`SessionPool`] owned by the caller and are all closed
//! once the host list is done.

use crate::alias::ResolvedHost;
use crate::cache::SettingsCache;
use crate::config::{Config, Verbosity};
use crate::constants::{ASKPASS_SECRET_VAR, CONTROL_PERSIST_SECS};
use crate::git::SystemGit;
use crate::output::{self, ConsoleCallbacks, Severity, Spinner};
use crate::update::{self, LocalRun, UpdateOptions};
use anyhow::Context;
use colored::Colorize;
use secrecy::{ExposeSecret, SecretString};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Options forwarded to `gpull-local`, locally or on a remote host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOptions {
    pub paths: Vec<String>,
    pub branch: Option<String>,
    pub force: bool,
    pub recurse_all: bool,
    /// OS user git runs as.
    pub git_user: Option<String>,
    /// Recipient of the branch-change email.
    pub email: Option<String>,
    /// Operator name shown in the email.
    pub operator: Option<String>,
    /// Settings file for `gpull-local` to read instead of its defaults.
    pub config: Option<String>,
}

impl PullOptions {
    #[must_use]
    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            branch: self.branch.clone(),
            force: self.force,
        }
    }

    /// Bare names are taken relative to `default_dir`; no paths means
    /// `default_dir` itself.
    #[must_use]
    pub fn with_paths_under(mut self, default_dir: &Path) -> Self {
        if self.paths.is_empty() {
            self.paths = vec![default_dir.to_string_lossy().into_owned()];
        } else {
            self.paths = self
                .paths
                .into_iter()
                .map(|p| {
                    if p.contains('/') {
                        p
                    } else {
                        default_dir.join(&p).to_string_lossy().into_owned()
                    }
                })
                .collect();
        }
        self
    }

    /// Directories to update on this machine, absolute.
    #[must_use]
    pub fn local_dirs(&self, config: &Config) -> Vec<PathBuf> {
        if self.paths.is_empty() {
            return vec![config.default_dir()];
        }
        self.paths
            .iter()
            .map(|p| std::path::absolute(p).unwrap_or_else(|_| PathBuf::from(p)))
            .collect()
    }

    /// The `gpull-local` argument vector. Values use `--flag=value` so none can
    /// be mistaken for a flag.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push(format!("--config={}", config));
        }
        if let Some(user) = &self.git_user {
            args.push(format!("--user={}", user));
        }
        if let Some(email) = &self.email {
            args.push(format!("--email={}", email));
        }
        if let Some(name) = &self.operator {
            args.push(format!("--name={}", name));
        }
        for path in &self.paths {
            args.push(format!("--path={}", path));
        }
        if let Some(branch) = &self.branch {
            args.push(format!("--branch={}", branch));
        }
        if self.force {
            args.push("--force".to_string());
        }
        if self.recurse_all {
            args.push("--all".to_string());
        }
        args
    }

    /// Shell command line running `program` with these options. `program` is
    /// trusted configuration and is not quoted; every option value is.
    #[must_use]
    pub fn to_command_line(&self, program: &str) -> String {
        std::iter::once(program.to_string())
            .chain(self.to_args().iter().map(|a| shell_escape(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quotes `s` for a POSIX shell unless it is made only of safe characters.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '=' | ',' | '@' | '+')
    }) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Wraps `command` for remote execution: combined output, and sudo reading
/// the password from stdin when one is supplied.
#[must_use]
pub fn remote_invocation(command: &str, sudo: bool) -> String {
    if sudo {
        format!("sudo -S -p '' {} 2>&1", command)
    } else {
        format!("{} 2>&1", command)
    }
}

/// SSH login name and optional password for sudo.
pub struct Credentials {
    pub ssh_user: String,
    pub password: Option<SecretString>,
}

impl Credentials {
    /// An explicit user is cached for next time; otherwise the cached user,
    /// then `$USER`. Cache failures are logged and never fatal.
    pub fn resolve_user(explicit: Option<&str>, cache: Option<&SettingsCache>) -> String {
        if let Some(user) = explicit.filter(|u| !u.is_empty()) {
            if let Some(cache) = cache {
                if let Err(e) = cache.save_ssh_user(user) {
                    tracing::warn!(error = %e, "Could not cache SSH user");
                }
            }
            return user.to_string();
        }

        if let Some(cache) = cache {
            match cache.ssh_user() {
                Ok(Some(user)) => return user,
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Could not read cached SSH user"),
            }
        }

        std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "root".to_string())
    }
}

/// One live, authenticated connection to a host.
pub trait Session {
    /// Runs `command`, feeding `stdin` to it when given, and hands every output
    /// line to `on_line`. Returns the remote exit code.
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&str>,
        on_line: &mut dyn FnMut(&str),
    ) -> anyhow::Result<i32>;

    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait Connector {
    fn connect(&self, host: &str, user: &str) -> anyhow::Result<Box<dyn Session>>;
}

/// Sessions keyed by host URL; at most one per host. Dropping the pool closes
/// whatever is still open.
pub struct SessionPool<C: Connector> {
    connector: C,
    sessions: BTreeMap<String, Box<dyn Session>>,
}

impl<C: Connector> SessionPool<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            sessions: BTreeMap::new(),
        }
    }

    pub fn get_or_connect(&mut self, host: &str, user: &str) -> anyhow::Result<&mut Box<dyn Session>> {
        match self.sessions.entry(host.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let session = self.connector.connect(host, user)?;
                tracing::debug!(host, user, "SSH session opened");
                Ok(entry.insert(session))
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn close_all(&mut self) {
        for (host, mut session) in std::mem::take(&mut self.sessions) {
            match session.close() {
                Ok(()) => tracing::debug!(host = %host, "SSH session closed"),
                Err(e) => tracing::warn!(host = %host, error = %e, "Failed to close SSH session"),
            }
        }
    }
}

impl<C: Connector> Drop for SessionPool<C> {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Opens sessions with the system `ssh` as OpenSSH control masters, so later
/// commands reuse the authenticated connection.
///
/// With a password, the master authenticates through an `SSH_ASKPASS` helper
/// that reads the secret from its environment; it never touches the command
/// line or the disk.
pub struct OpenSshConnector {
    program: PathBuf,
    socket_dir: TempDir,
    timeout: Duration,
    password: Option<SecretString>,
    askpass: Option<PathBuf>,
    next_id: Cell<usize>,
}

impl OpenSshConnector {
    pub fn new(timeout: Duration, password: Option<SecretString>) -> anyhow::Result<Self> {
        let socket_dir = tempfile::Builder::new()
            .prefix("gpull-ssh")
            .tempdir()
            .context("Failed to create SSH control socket directory")?;

        let askpass = match &password {
            Some(_) => Some(write_askpass_helper(socket_dir.path())?),
            None => None,
        };

        Ok(Self {
            program: PathBuf::from("ssh"),
            socket_dir,
            timeout,
            password,
            askpass,
            next_id: Cell::new(0),
        })
    }

    /// Uses `program` instead of `ssh` from `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

fn write_askpass_helper(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join("askpass.sh");
    std::fs::write(&path, format!("#!/bin/sh\nprintf '%s\\n' \"${}\"\n", ASKPASS_SECRET_VAR))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to make {} executable", path.display()))?;
    Ok(path)
}

impl Connector for OpenSshConnector {
    fn connect(&self, host: &str, user: &str) -> anyhow::Result<Box<dyn Session>> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let master = ControlMaster {
            program: self.program.clone(),
            control_path: self.socket_dir.path().join(format!("{}.sock", id)),
            destination: format!("{}@{}", user, host),
        };

        // Runs in the foreground until authenticated. The detached master must
        // not hold our stdout open.
        let mut ssh = master.command();
        ssh.args(["-M", "-N", "-f"])
            .arg("-o")
            .arg(format!("ControlPersist={}", CONTROL_PERSIST_SECS))
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.timeout.as_secs().max(1)))
            .arg(&master.destination)
            .stdout(Stdio::null());
        if let (Some(password), Some(askpass)) = (&self.password, &self.askpass) {
            ssh.env("SSH_ASKPASS", askpass)
                .env("SSH_ASKPASS_REQUIRE", "force")
                .env(ASKPASS_SECRET_VAR, password.expose_secret());
        }

        let status = ssh.status().context("Failed to run ssh")?;
        if !status.success() {
            anyhow::bail!("ssh exited with {}", status);
        }

        live_masters().push(master.clone());
        Ok(Box::new(OpenSshSession { master }))
    }
}

/// A detached `ssh -M` process, addressed through its control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ControlMaster {
    program: PathBuf,
    control_path: PathBuf,
    destination: String,
}

impl ControlMaster {
    fn command(&self) -> Command {
        let mut ssh = Command::new(&self.program);
        ssh.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()));
        ssh
    }

    fn exit(&self) -> anyhow::Result<()> {
        let output = self
            .command()
            .args(["-O", "exit"])
            .arg(&self.destination)
            .output()
            .context("Failed to run ssh -O exit")?;
        if !output.status.success() {
            anyhow::bail!(
                "ssh -O exit failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Masters still running, for shutdown paths that skip destructors.
static LIVE_MASTERS: Mutex<Vec<ControlMaster>> = Mutex::new(Vec::new());

fn live_masters() -> MutexGuard<'static, Vec<ControlMaster>> {
    LIVE_MASTERS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stops every control master this process started and removes their socket
/// directories. Used when the process exits without unwinding.
pub fn close_live_masters() {
    let masters = std::mem::take(&mut *live_masters());
    let mut dirs: Vec<PathBuf> = Vec::new();
    for master in masters {
        if let Err(e) = master.exit() {
            tracing::warn!(destination = %master.destination, error = %e, "Failed to stop SSH master");
        }
        if let Some(dir) = master.control_path.parent() {
            if !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_path_buf());
            }
        }
    }
    for dir in dirs {
        let _ = std::fs::remove_dir_all(dir);
    }
}

struct OpenSshSession {
    master: ControlMaster,
}

impl Session for OpenSshSession {
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&str>,
        on_line: &mut dyn FnMut(&str),
    ) -> anyhow::Result<i32> {
        let mut child = self
            .master
            .command()
            .arg(&self.master.destination)
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("Failed to spawn ssh")?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            writeln!(pipe, "{}", input).context("Failed to write to remote stdin")?;
        }

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                on_line(&line.context("Failed to read remote output")?);
            }
        }

        let status = child.wait().context("Failed to wait for ssh")?;
        Ok(status.code().unwrap_or(-1))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        live_masters().retain(|m| m != &self.master);
        self.master.exit()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    /// The remote command ran; a non-zero code means it reported failures.
    Completed { exit_code: i32 },
    Unreachable(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct HostReport {
    pub host: ResolvedHost,
    pub outcome: HostOutcome,
}

#[derive(Debug, Default)]
pub struct FanOutSummary {
    pub reports: Vec<HostReport>,
}

impl FanOutSummary {
    fn urls(&self, keep: impl Fn(&HostOutcome) -> bool) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| keep(&r.outcome))
            .map(|r| r.host.url.as_str())
            .collect()
    }

    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.urls(|o| *o == HostOutcome::Completed { exit_code: 0 })
    }

    /// Hosts reached whose remote run reported failures or broke off.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.urls(|o| {
            matches!(o, HostOutcome::Failed(_))
                || matches!(o, HostOutcome::Completed { exit_code } if *exit_code != 0)
        })
    }

    #[must_use]
    pub fn unreachable(&self) -> Vec<&str> {
        self.urls(|o| matches!(o, HostOutcome::Unreachable(_)))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.succeeded().len() == self.reports.len()
    }

    pub fn print(&self, verbosity: Verbosity) {
        let failed = self.failed();
        let unreachable = self.unreachable();
        if verbosity != Verbosity::Quiet {
            for url in &failed {
                println!("  {} {}", "FAIL".red().bold(), url);
            }
            for url in &unreachable {
                println!("  {} {}", "UNREACHABLE".red().bold(), url);
            }
        }
        println!(
            "{}: {} succeeded, {} failed, {} unreachable",
            "Hosts".white().bold(),
            self.succeeded().len(),
            failed.len(),
            unreachable.len()
        );
    }
}

/// Where a pull runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Local,
    Remote(Vec<ResolvedHost>),
}

pub enum PullReport {
    Local(LocalRun),
    Remote(FanOutSummary),
}

impl PullReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            PullReport::Local(run) => run.is_success(),
            PullReport::Remote(summary) => summary.is_success(),
        }
    }
}

/// Runs the pull on every host with a fresh session pool.
pub fn pull_remote<C: Connector>(
    config: &Config,
    hosts: &[ResolvedHost],
    options: &PullOptions,
    credentials: &Credentials,
    connector: C,
) -> FanOutSummary {
    let mut pool = SessionPool::new(connector);
    let summary = fan_out(
        &mut pool,
        hosts,
        options,
        config.remote_command(),
        credentials,
        config.verbosity,
    );
    summary.print(config.verbosity);
    summary
}

/// Updates directories on this machine, in-process.
pub fn run_local(config: &Config, options: &PullOptions) -> LocalRun {
    let git = SystemGit::new(config).run_as(options.git_user.clone());
    let callbacks = ConsoleCallbacks::new(config.verbosity);
    let dirs = options.local_dirs(config);

    let start = Instant::now();
    let run = update::update_directories(
        &dirs,
        options.recurse_all,
        &config.repositories,
        &options.update_options(),
        &git,
        &callbacks,
    );
    output::print_summary(&run, start.elapsed(), config.verbosity);
    run
}

/// Runs the pull on every host in order, then closes all sessions. A host
/// that cannot be reached is reported and skipped.
pub fn fan_out<C: Connector>(
    pool: &mut SessionPool<C>,
    hosts: &[ResolvedHost],
    options: &PullOptions,
    program: &str,
    credentials: &Credentials,
    verbosity: Verbosity,
) -> FanOutSummary {
    let mut summary = FanOutSummary::default();

    for host in hosts {
        let user = host.ssh_user.as_deref().unwrap_or(&credentials.ssh_user);
        let outcome = run_on_host(pool, host, user, options, program, credentials, verbosity);
        summary.reports.push(HostReport {
            host: host.clone(),
            outcome,
        });
    }

    pool.close_all();
    summary
}

fn run_on_host<C: Connector>(
    pool: &mut SessionPool<C>,
    host: &ResolvedHost,
    user: &str,
    options: &PullOptions,
    program: &str,
    credentials: &Credentials,
    verbosity: Verbosity,
) -> HostOutcome {
    let spinner = Spinner::start(format!("Connecting to {}@{}...", user, host.url), verbosity);
    let session = match pool.get_or_connect(&host.url, user) {
        Ok(session) => {
            spinner.clear();
            session
        }
        Err(e) => {
            spinner.finish_failed(&host.url);
            output::out(
                0,
                Severity::Error.paint(&format!("SSH connection to {} failed: {:#}", host.url, e)).to_string(),
            );
            return HostOutcome::Unreachable(format!("{:#}", e));
        }
    };

    let host_options = PullOptions {
        git_user: Some(host.git_user.clone()),
        ..options.clone()
    };
    let password = credentials.password.as_ref().map(|p| p.expose_secret());
    let command = remote_invocation(&host_options.to_command_line(program), password.is_some());
    tracing::debug!(host = %host.url, command = %command, "Running remote pull");

    output::out(0, format!("running git updates on {}", host.url).green().to_string());

    let mut print_line = |line: &str| {
        if !line.contains("[sudo] password for") {
            output::out(1, line);
        }
    };
    match session.exec(&command, password, &mut print_line) {
        Ok(exit_code) => HostOutcome::Completed { exit_code },
        Err(e) => {
            output::out(
                0,
                Severity::Error.paint(&format!("Remote command on {} failed: {:#}", host.url, e)).to_string(),
            );
            HostOutcome::Failed(format!("{:#}", e))
        }
    }
}
