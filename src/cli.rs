//! Command-line surfaces of the three binaries and the flows behind them.

use crate::alias;
use crate::cache::SettingsCache;
use crate::config::{Config, Verbosity};
use crate::constants;
use crate::git::SystemGit;
use crate::merge::MergeAll;
use crate::notify;
use crate::output::{self, Severity};
use crate::remote::{self, Credentials, OpenSshConnector, PullOptions, PullReport, Targets};
use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, CommandFactory, FromArgMatches, Parser};
use dialoguer::Password;
use dialoguer::theme::ColorfulTheme;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;

/// Options shared by `gpull` and `gpull-local`.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct PullArgs {
    /// Directories to update: a repository, or a directory of repositories
    #[arg(short, long, num_args = 1..)]
    pub path: Vec<String>,

    /// Switch each repository to this branch if it exists on origin
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Discard local changes when switching branches
    #[arg(short, long)]
    pub force: bool,

    /// Update every repository directly under each directory
    #[arg(short, long)]
    pub all: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputArgs {
    /// Suppress non-essential output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Show every git command and diagnostics
    #[arg(short, long)]
    pub verbose: bool,

    /// Settings file (default: ~/.config/gpull/settings.yaml, then /etc/gpull/settings.yaml)
    #[arg(short, long, env = "GPULL_CONFIG")]
    pub config: Option<PathBuf>,
}

impl OutputArgs {
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }

    pub fn load_config(&self) -> anyhow::Result<Config> {
        Ok(Config::load_or_default_path(self.config.as_deref())?.with_verbosity(self.verbosity()))
    }
}

/// Pull multiple git repositories at once on this machine.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "gpull-local", version, about)]
pub struct LocalArgs {
    #[command(flatten)]
    pub pull: PullArgs,

    /// OS user to run git commands as
    #[arg(short, long)]
    pub user: Option<String>,

    /// Email this address if a branch got switched
    #[arg(short, long)]
    pub email: Option<String>,

    /// Name shown in the branch change email
    #[arg(short, long)]
    pub name: Option<String>,
}

impl LocalArgs {
    #[must_use]
    pub fn pull_options(&self) -> PullOptions {
        PullOptions {
            paths: self.pull.path.clone(),
            branch: self.pull.branch.clone(),
            force: self.pull.force,
            recurse_all: self.pull.all,
            git_user: self.user.clone(),
            email: self.email.clone(),
            operator: self.name.clone(),
            config: self
                .pull
                .output
                .config
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
        }
    }
}

/// Pull multiple git repositories at once, on multiple servers.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "gpull", version, about)]
pub struct RemoteArgs {
    #[command(flatten)]
    pub pull: PullArgs,

    /// Server or group aliases to update; omit to update this machine
    #[arg(short, long, num_args = 0..)]
    pub servers: Option<Vec<String>>,

    /// SSH user (remembered for next time)
    #[arg(short = 'u', long)]
    pub remote_user: Option<String>,

    /// Program to run on each server (default: RemoteCommand, or gpull-local)
    #[arg(short, long)]
    pub remote_command: Option<String>,
}

impl RemoteArgs {
    /// Parses the process arguments, listing known aliases in `--help`.
    pub fn parse_with_aliases() -> Self {
        let mut command = Self::command();
        if let Some(help) = alias_help() {
            command = command.after_help(help);
        }
        let matches = command.get_matches();
        Self::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }

    #[must_use]
    pub fn pull_options(&self) -> PullOptions {
        PullOptions {
            paths: self.pull.path.clone(),
            branch: self.pull.branch.clone(),
            force: self.pull.force,
            recurse_all: self.pull.all,
            ..PullOptions::default()
        }
    }
}

/// Merge one branch into another across all configured repositories.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "git-merge-all", version, about)]
pub struct MergeArgs {
    /// Branch to merge from
    #[arg(short, long)]
    pub branch: String,

    /// Branch to merge into
    #[arg(short, long)]
    pub to_branch: String,

    /// Merge one way only; `false` also merges the target back first
    #[arg(short, long, action = ArgAction::Set, default_value = "true", value_parser = BoolishValueParser::new())]
    pub one_way: bool,

    /// Directory holding the working clones (default: MergeDir)
    #[arg(short, long)]
    pub working_dir: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Help text listing every alias from the settings file, if it can be read.
fn alias_help() -> Option<String> {
    let path = match std::env::var_os("GPULL_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => Config::search_path().ok()?,
    };
    let config = Config::load(&path).ok()?;
    let groups = alias::group_aliases(&config);
    let names = alias::all_alias_names(&config, &groups);
    if names.is_empty() {
        return None;
    }
    Some(format!("Available server aliases: {}", names.join(", ")))
}

/// `gpull-local`: update repositories here, then email branch changes.
pub fn run_local(args: LocalArgs) -> anyhow::Result<bool> {
    let verbosity = args.pull.output.verbosity();
    let config = args.pull.output.load_config()?;

    output::print_banner("gpull-local", "pull git repositories locally", verbosity);

    let options = args.pull_options();
    let run = remote::run_local(&config, &options);

    if let Some(recipient) = options.email.as_deref().filter(|e| !e.is_empty()) {
        notify::notify_branch_changes(
            &config.email_settings,
            recipient,
            options.operator.as_deref(),
            &run.branch_changes,
        );
    }

    Ok(run.is_success())
}

/// `gpull`: update this machine, or every host behind the requested aliases.
pub fn run_remote(args: RemoteArgs) -> anyhow::Result<bool> {
    let verbosity = args.pull.output.verbosity();
    let mut config = args.pull.output.load_config()?;
    if let Some(command) = &args.remote_command {
        config.remote_command = Some(command.clone());
    }

    output::print_banner("gpull", "remotely pull git repos", verbosity);

    let options = args.pull_options().with_paths_under(&config.default_dir());
    let targets = match &args.servers {
        None => Targets::Local,
        Some(requested) => {
            let groups = alias::group_aliases(&config);
            Targets::Remote(alias::resolve(&config, &groups, requested))
        }
    };

    let report = match targets {
        Targets::Local => PullReport::Local(remote::run_local(&config, &options)),
        Targets::Remote(hosts) => {
            if hosts.is_empty() {
                output::out(0, Severity::Warning.paint("No servers matched the given aliases").to_string());
                return Ok(false);
            }

            let cache = match SettingsCache::open(&SettingsCache::default_path()) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    tracing::warn!(error = %e, "Settings cache unavailable");
                    None
                }
            };
            let ssh_user = Credentials::resolve_user(args.remote_user.as_deref(), cache.as_ref());
            let credentials = Credentials {
                password: prompt_password()?,
                ssh_user,
            };

            let email_to = &config.email_settings.email_to;
            let options = PullOptions {
                email: (!email_to.is_empty()).then(|| email_to.clone()),
                operator: Some(credentials.ssh_user.clone()),
                config: config.remote_config.clone(),
                ..options
            };

            let ssh_password = credentials
                .password
                .as_ref()
                .map(|p| SecretString::from(p.expose_secret().to_string()));
            let connector = OpenSshConnector::new(constants::ssh_connect_timeout(), ssh_password)?;
            PullReport::Remote(remote::pull_remote(&config, &hosts, &options, &credentials, connector))
        }
    };

    Ok(report.is_success())
}

/// Prompts for the password used to log in to the servers and for sudo there.
/// Empty means none: SSH falls back to keys and sudo runs without `-S`.
fn prompt_password() -> anyhow::Result<Option<SecretString>> {
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Your ssh password")
        .allow_empty_password(true)
        .interact()
        .context("Failed to read password")?;
    Ok((!password.is_empty()).then(|| SecretString::from(password)))
}

/// `git-merge-all`: merge `--branch` into `--to-branch` everywhere.
pub fn run_merge(args: MergeArgs) -> anyhow::Result<bool> {
    let verbosity = args.output.verbosity();
    let config = args.output.load_config()?;

    output::print_banner("git-merge-all", "merge branches across repositories", verbosity);

    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => config.merge_dir()?.to_path_buf(),
    };
    let git_server = config.git_server()?;
    let git = SystemGit::new(&config);

    let merged = MergeAll::new(&git, git_server, &working_dir, &config.repositories, verbosity)
        .run(&args.branch, &args.to_branch, args.one_way);

    match merged {
        Ok(_) => Ok(true),
        Err(e) => {
            output::out(0, Severity::Error.paint(&format!("Aborting: {}", e)).to_string());
            Ok(false)
        }
    }
}
