// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "keeper",
    version,
    about = "Installs keep-alive crontab entries on a list of SSH hosts",
    long_about = None,
    after_help = "Each account is provisioned on {username}.{domain_suffix}: the crontab is reset, \
hourly and @reboot entries running the account's command are installed, a daily `kill -9 -1` \
watchdog is added, and the command is run once in the foreground.\n\
\n\
Accounts are read as YAML (`accounts:` list of username/password/command/tip) from the \
environment variable named by --accounts-env (default CONFIG), or from --accounts-file.\n\
\n\
Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < KEEPER_CONFIG_PATH < command-line flags.\n\
Exit codes: 0 when every account was attempted, 130 when interrupted, 1 with --strict when any account failed."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, keeper uses KEEPER_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Read the accounts YAML from this file instead of the environment."
    )]
    pub accounts_file: Option<PathBuf>,
    #[arg(
        long,
        value_name = "NAME",
        help = "Environment variable holding the accounts YAML. Overrides `accounts_env` from the config file."
    )]
    pub accounts_env: Option<String>,
    #[arg(
        long,
        value_name = "DOMAIN",
        help = "Domain appended to each username to form the host name. Overrides `domain_suffix` from the config file."
    )]
    pub domain_suffix: Option<String>,
    #[arg(
        long,
        value_name = "PORT",
        help = "SSH port on every host. Overrides `ssh_port` from the config file."
    )]
    pub ssh_port: Option<u16>,
    #[arg(
        long = "known-hosts",
        value_name = "PATH",
        help = "known_hosts file used for trust-on-first-use. Overrides `known_hosts_path` from the config file."
    )]
    pub known_hosts_path: Option<PathBuf>,
    #[arg(
        long,
        value_name = "SECS",
        help = "Give up connecting and authenticating after this long. Overrides `connect_timeout_secs` from the config file."
    )]
    pub connect_timeout_secs: Option<u64>,
    #[arg(
        long,
        value_name = "SECS",
        help = "Give up on any single step after this long. Overrides `step_timeout_secs` from the config file."
    )]
    pub step_timeout_secs: Option<u64>,
    #[arg(
        long,
        action = clap::ArgAction::SetTrue,
        help = "Validate the accounts and print the masked plan without connecting anywhere."
    )]
    pub dry_run: bool,
    #[arg(
        long,
        action = clap::ArgAction::SetTrue,
        help = "Exit with status 1 when any account failed to connect or failed a step."
    )]
    pub strict: bool,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging and include logs from dependencies. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

fn parsed_from(matches: &clap::ArgMatches) -> Result<ParsedOpts, clap::Error> {
    let verbose_override = matches.get_flag("verbose").then_some(true);
    let opts = Opts::from_arg_matches(matches)?;
    Ok(ParsedOpts {
        opts,
        verbose_override,
    })
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    parsed_from(&matches).unwrap_or_else(|err| err.exit())
}
