// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use crate::adapters::accounts::{self, AccountSource};
use crate::app::services::{crontab, mask};
use crate::app::types::{AccountEntry, ProvisionSettings};

mod adapters;
mod app;
mod config;
mod logging;

const EXIT_INTERRUPTED: u8 = 130;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            log::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            log::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            log::info!("config path: (none)");
        }
    }
    log::info!(
        "config domain_suffix: {} (source={})",
        report.domain_suffix.value,
        report.domain_suffix.source.as_str()
    );
    log::info!(
        "config ssh_port: {} (source={})",
        report.ssh_port.value,
        report.ssh_port.source.as_str()
    );
    log::info!(
        "config accounts_env: {} (source={})",
        report.accounts_env.value,
        report.accounts_env.source.as_str()
    );
    log::info!(
        "config known_hosts_path: {} (source={})",
        report
            .known_hosts_path
            .value
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "~/.ssh/known_hosts".to_string()),
        report.known_hosts_path.source.as_str()
    );
    log::info!(
        "config connect_timeout_secs: {} (source={})",
        describe_secs(report.connect_timeout_secs.value),
        report.connect_timeout_secs.source.as_str()
    );
    log::info!(
        "config step_timeout_secs: {} (source={})",
        describe_secs(report.step_timeout_secs.value),
        report.step_timeout_secs.source.as_str()
    );
    log::info!(
        "config keepalive_secs: {} (source={})",
        report.keepalive_secs.value,
        report.keepalive_secs.source.as_str()
    );
    log::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

fn describe_secs(value: Option<u64>) -> String {
    value
        .map(|secs| secs.to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn print_plan(entries: &[AccountEntry], settings: &ProvisionSettings) {
    let total = entries.len();
    for (idx, entry) in entries.iter().enumerate() {
        let position = idx + 1;
        match entry {
            AccountEntry::Malformed { index, reason } => {
                println!("[{position}/{total}] entry #{}: skip (malformed_record: {reason})", index + 1);
            }
            AccountEntry::Record(record) => {
                let display = mask::display_name(&record.username, &record.tip);
                if let Err(reason) = record.eligibility() {
                    println!("[{position}/{total}] {display}: skip ({reason})");
                    continue;
                }
                println!(
                    "[{position}/{total}] {display} -> {}:{}",
                    mask::mask(&settings.host_for(&record.username)),
                    settings.ssh_port
                );
                for (step, command) in crontab::plan(&record.command) {
                    println!("    {}. {}: {}", step.index(), step.label(), command);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let verbose_override = parsed.verbose_override;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            domain_suffix: opts.domain_suffix,
            ssh_port: opts.ssh_port,
            accounts_env: opts.accounts_env,
            known_hosts_path: opts.known_hosts_path,
            connect_timeout_secs: opts.connect_timeout_secs,
            step_timeout_secs: opts.step_timeout_secs,
            verbose: verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let source = match opts.accounts_file {
        Some(path) => AccountSource::File(config::expand_path(path)),
        None => AccountSource::Env(config.accounts_env.clone()),
    };
    let entries = accounts::load_accounts(&source)
        .with_context(|| format!("failed to load accounts from {}", source.describe()))?;
    if entries.is_empty() {
        anyhow::bail!("no accounts found in {}", source.describe());
    }
    log::info!("loaded {} account entries from {}", entries.len(), source.describe());

    let settings = config.provision_settings();
    if opts.dry_run {
        print_plan(&entries, &settings);
        return Ok(ExitCode::SUCCESS);
    }

    let ssh_adapter = Arc::new(adapters::ssh::SshAdapter::new(adapters::ssh::SshOptions {
        keepalive_secs: config.keepalive_secs,
        known_hosts_path: config.known_hosts_path.clone(),
    }));
    let reporter = Arc::new(adapters::report::LogReporter::new());
    let usecases = app::usecases::UseCases::new(ssh_adapter, reporter, settings);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::warn!("interrupt received; stopping after closing the current session");
                let _ = cancel_tx.send(true);
            }
            Err(err) => log::warn!("failed to listen for interrupt: {err}"),
        }
    });

    let batch = usecases.run_batch(entries, cancel_rx).await;
    if batch.interrupted {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    if opts.strict && batch.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
