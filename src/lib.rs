//! Pull and merge git repositories in bulk, locally or across servers.
//!
//! This crate backs three binaries:
//! - `gpull-local` updates every repository under some directories on this machine
//! - `gpull` does the same on many servers at once by running `gpull-local` over SSH
//! - `git-merge-all` merges one branch into another in every configured repository

pub mod alias;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod git;
pub mod interrupt;
pub mod logging;
pub mod merge;
pub mod notify;
pub mod output;
pub mod remote;
pub mod repo;
pub mod update;
