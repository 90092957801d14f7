// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::adapters::accounts::DEFAULT_ACCOUNTS_ENV;
use crate::app::types::{DEFAULT_DOMAIN_SUFFIX, DEFAULT_SSH_PORT, ProvisionSettings};

const APP_DIR_NAME: &str = "keeper";
const CONFIG_FILE_NAME: &str = "keeper.toml";
const CONFIG_ENV_VAR: &str = "KEEPER_CONFIG_PATH";
const DEFAULT_KEEPALIVE_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    domain_suffix: Option<String>,
    ssh_port: Option<u16>,
    accounts_env: Option<String>,
    known_hosts_path: Option<String>,
    connect_timeout_secs: Option<u64>,
    step_timeout_secs: Option<u64>,
    keepalive_secs: Option<u64>,
    verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub domain_suffix: String,
    pub ssh_port: u16,
    pub accounts_env: String,
    /// `None` means the user's default `~/.ssh/known_hosts`.
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout_secs: Option<u64>,
    pub step_timeout_secs: Option<u64>,
    pub keepalive_secs: u64,
    pub verbose: bool,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

impl Config {
    pub fn provision_settings(&self) -> ProvisionSettings {
        ProvisionSettings {
            domain_suffix: self.domain_suffix.clone(),
            ssh_port: self.ssh_port,
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub domain_suffix: ConfigValue<String>,
    pub ssh_port: ConfigValue<u16>,
    pub accounts_env: ConfigValue<String>,
    pub known_hosts_path: ConfigValue<Option<PathBuf>>,
    pub connect_timeout_secs: ConfigValue<Option<u64>>,
    pub step_timeout_secs: ConfigValue<Option<u64>>,
    pub keepalive_secs: ConfigValue<u64>,
    pub verbose: ConfigValue<bool>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub domain_suffix: Option<String>,
    pub ssh_port: Option<u16>,
    pub accounts_env: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout_secs: Option<u64>,
    pub step_timeout_secs: Option<u64>,
    pub verbose: Option<bool>,
}

fn pick<T>(over: Option<T>, file: Option<T>, default: T) -> (T, ConfigSource) {
    match over {
        Some(value) => (value, ConfigSource::Override),
        None => match file {
            Some(value) => (value, ConfigSource::ConfigFile),
            None => (default, ConfigSource::Default),
        },
    }
}

fn pick_optional<T>(over: Option<T>, file: Option<T>) -> (Option<T>, ConfigSource) {
    match (over, file) {
        (Some(value), _) => (Some(value), ConfigSource::Override),
        (None, Some(value)) => (Some(value), ConfigSource::ConfigFile),
        (None, None) => (None, ConfigSource::Default),
    }
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };

    let (domain_suffix, domain_suffix_source) = pick(
        overrides.domain_suffix,
        file_config.domain_suffix,
        DEFAULT_DOMAIN_SUFFIX.to_string(),
    );
    let domain_suffix = domain_suffix.trim().trim_matches('.').to_string();
    if domain_suffix.is_empty() {
        anyhow::bail!("domain_suffix must not be empty");
    }

    let (ssh_port, ssh_port_source) =
        pick(overrides.ssh_port, file_config.ssh_port, DEFAULT_SSH_PORT);
    if ssh_port == 0 {
        anyhow::bail!("ssh_port must be between 1 and 65535");
    }

    let (accounts_env, accounts_env_source) = pick(
        overrides.accounts_env,
        file_config.accounts_env,
        DEFAULT_ACCOUNTS_ENV.to_string(),
    );
    if accounts_env.trim().is_empty() {
        anyhow::bail!("accounts_env must not be empty");
    }

    let (known_hosts_path, known_hosts_source) = match overrides.known_hosts_path {
        Some(path) => (Some(expand_path(path)), ConfigSource::Override),
        None => match file_config.known_hosts_path {
            Some(raw) => (
                Some(resolve_path(
                    &raw,
                    config_path.as_deref().and_then(|path| path.parent()),
                )),
                ConfigSource::ConfigFile,
            ),
            None => (None, ConfigSource::Default),
        },
    };

    let (connect_timeout_secs, connect_timeout_source) = pick_optional(
        overrides.connect_timeout_secs,
        file_config.connect_timeout_secs,
    );
    let (step_timeout_secs, step_timeout_source) =
        pick_optional(overrides.step_timeout_secs, file_config.step_timeout_secs);
    if connect_timeout_secs == Some(0) || step_timeout_secs == Some(0) {
        anyhow::bail!("timeouts must be at least one second; omit them to wait indefinitely");
    }

    let (keepalive_secs, keepalive_source) =
        pick(None, file_config.keepalive_secs, DEFAULT_KEEPALIVE_SECS);
    let (verbose, verbose_source) = pick(overrides.verbose, file_config.verbose, false);

    let config = Config {
        domain_suffix,
        ssh_port,
        accounts_env,
        known_hosts_path,
        connect_timeout_secs,
        step_timeout_secs,
        keepalive_secs,
        verbose,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        domain_suffix: ConfigValue {
            value: config.domain_suffix.clone(),
            source: domain_suffix_source,
        },
        ssh_port: ConfigValue {
            value: config.ssh_port,
            source: ssh_port_source,
        },
        accounts_env: ConfigValue {
            value: config.accounts_env.clone(),
            source: accounts_env_source,
        },
        known_hosts_path: ConfigValue {
            value: config.known_hosts_path.clone(),
            source: known_hosts_source,
        },
        connect_timeout_secs: ConfigValue {
            value: config.connect_timeout_secs,
            source: connect_timeout_source,
        },
        step_timeout_secs: ConfigValue {
            value: config.step_timeout_secs,
            source: step_timeout_source,
        },
        keepalive_secs: ConfigValue {
            value: config.keepalive_secs,
            source: keepalive_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
    };

    Ok(LoadResult { config, report })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

pub fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
