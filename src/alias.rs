//! Server and group alias resolution.
//!
//! Server aliases come straight from the settings file. Group aliases are
//! derived from them: every environment gets `<env>-all`, and every
//! environment/group pair gets `<env>-<group>`.

use crate::config::Config;
use std::collections::{BTreeMap, BTreeSet};

/// A synthetic alias naming several server aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAlias {
    pub name: String,
    /// Member server alias names, sorted.
    pub members: Vec<String>,
}

/// One concrete host to operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    /// Server alias the host came from.
    pub alias: String,
    pub url: String,
    /// Per-server SSH login, preferred over the operator's remote user.
    pub ssh_user: Option<String>,
    /// OS user git runs as on the host.
    pub git_user: String,
}

/// Derives group aliases from the server table and the configured
/// `Environments` / `ServerGroups` lists. Configured names with no matching
/// servers produce empty groups.
pub fn group_aliases(config: &Config) -> BTreeMap<String, GroupAlias> {
    let mut environments: BTreeSet<&str> = config.environments.iter().map(String::as_str).collect();
    let mut groups: BTreeSet<&str> = config.server_groups.iter().map(String::as_str).collect();
    for server in config.servers.values() {
        environments.insert(server.environment.as_str());
        if !server.group.is_empty() {
            groups.insert(server.group.as_str());
        }
    }

    let mut aliases = BTreeMap::new();
    for env in &environments {
        let name = format!("{}-all", env);
        let members = config
            .servers
            .iter()
            .filter(|(_, s)| s.environment == *env)
            .map(|(name, _)| name.clone())
            .collect();
        aliases.insert(name.clone(), GroupAlias { name, members });

        for group in &groups {
            let name = format!("{}-{}", env, group);
            let members = config
                .servers
                .iter()
                .filter(|(_, s)| s.environment == *env && s.group == *group)
                .map(|(name, _)| name.clone())
                .collect();
            // A group literally named "all" must not replace `<env>-all`.
            aliases
                .entry(name.clone())
                .or_insert(GroupAlias { name, members });
        }
    }
    aliases
}

/// Every alias the operator can name, sorted, for `--help`.
pub fn all_alias_names(config: &Config, groups: &BTreeMap<String, GroupAlias>) -> Vec<String> {
    let mut names: Vec<String> = config
        .servers
        .keys()
        .chain(groups.keys())
        .cloned()
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Expands the requested identifiers into hosts, in request order.
///
/// Unknown identifiers are skipped silently, and nothing is de-duplicated: a
/// host reachable through two requested aliases is visited twice.
pub fn resolve(
    config: &Config,
    groups: &BTreeMap<String, GroupAlias>,
    requested: &[String],
) -> Vec<ResolvedHost> {
    let mut hosts = Vec::new();

    for id in requested {
        if config.servers.contains_key(id) {
            push_server(config, id, &mut hosts);
        } else if let Some(group) = groups.get(id) {
            for member in &group.members {
                push_server(config, member, &mut hosts);
            }
        } else {
            tracing::debug!(alias = %id, "Ignoring unknown server alias");
        }
    }

    hosts
}

fn push_server(config: &Config, alias: &str, hosts: &mut Vec<ResolvedHost>) {
    let Some(server) = config.servers.get(alias) else {
        return;
    };
    for url in &server.urls {
        hosts.push(ResolvedHost {
            alias: alias.to_string(),
            url: url.clone(),
            ssh_user: server.ssh_user.clone(),
            git_user: server.git_user().to_string(),
        });
    }
}
