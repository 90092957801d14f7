// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_COMMAND: &str = "ls";
pub const DEFAULT_DOMAIN_SUFFIX: &str = "serv00.net";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// One account to provision, as read from the accounts document.
///
/// Text fields are already trimmed; `command` is never empty.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub username: String,
    pub password: SecretString,
    pub command: String,
    pub tip: String,
}

impl AccountRecord {
    pub fn new(username: &str, password: &str, command: Option<&str>, tip: Option<&str>) -> Self {
        let command = command
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_COMMAND);
        Self {
            username: username.trim().to_string(),
            password: SecretString::from(password.trim().to_string()),
            command: command.to_string(),
            tip: tip.map(str::trim).unwrap_or_default().to_string(),
        }
    }

    /// Checks the fields that must be present before any network call.
    pub fn eligibility(&self) -> Result<(), SkipReason> {
        if self.username.is_empty() {
            return Err(SkipReason::MissingUsername);
        }
        if self.password.expose_secret().is_empty() {
            return Err(SkipReason::MissingPassword);
        }
        Ok(())
    }
}

/// Entry of the accounts document after parsing.
#[derive(Clone, Debug)]
pub enum AccountEntry {
    Record(AccountRecord),
    Malformed { index: usize, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    MissingUsername,
    MissingPassword,
    MalformedRecord(String),
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::MissingUsername => "missing_username",
            SkipReason::MissingPassword => "missing_password",
            SkipReason::MalformedRecord(_) => "malformed_record",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MalformedRecord(detail) => write!(f, "{}: {}", self.code(), detail),
            other => f.write_str(other.code()),
        }
    }
}

/// The fixed provisioning sequence. Order matters: later steps append to the
/// table left behind by earlier ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionStep {
    ClearTable,
    Hourly,
    OnReboot,
    Watchdog,
    RunNow,
}

impl ProvisionStep {
    pub const ALL: [ProvisionStep; 5] = [
        ProvisionStep::ClearTable,
        ProvisionStep::Hourly,
        ProvisionStep::OnReboot,
        ProvisionStep::Watchdog,
        ProvisionStep::RunNow,
    ];

    /// 1-based position in the sequence.
    pub fn index(self) -> usize {
        match self {
            ProvisionStep::ClearTable => 1,
            ProvisionStep::Hourly => 2,
            ProvisionStep::OnReboot => 3,
            ProvisionStep::Watchdog => 4,
            ProvisionStep::RunNow => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProvisionStep::ClearTable => "clear crontab",
            ProvisionStep::Hourly => "hourly entry",
            ProvisionStep::OnReboot => "reboot entry",
            ProvisionStep::Watchdog => "watchdog entry",
            ProvisionStep::RunNow => "run command",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Skipped(SkipReason),
    ConnectFailed(String),
    StepFailed { step: usize, cause: String },
    Completed,
    Interrupted,
}

impl ProvisioningOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProvisioningOutcome::ConnectFailed(_) | ProvisioningOutcome::StepFailed { .. }
        )
    }
}

impl fmt::Display for ProvisioningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            ProvisioningOutcome::ConnectFailed(cause) => write!(f, "connect failed: {cause}"),
            ProvisioningOutcome::StepFailed { step, cause } => {
                write!(f, "step {step}/{} failed: {cause}", ProvisionStep::ALL.len())
            }
            ProvisioningOutcome::Completed => f.write_str("completed"),
            ProvisioningOutcome::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Run-wide settings shared by every account session.
#[derive(Clone, Debug)]
pub struct ProvisionSettings {
    pub domain_suffix: String,
    pub ssh_port: u16,
    pub connect_timeout: Option<Duration>,
    pub step_timeout: Option<Duration>,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            connect_timeout: None,
            step_timeout: None,
        }
    }
}

impl ProvisionSettings {
    pub fn host_for(&self, username: &str) -> String {
        format!("{}.{}", username, self.domain_suffix)
    }
}

/// Connection parameters for one account. Dropped once the account is done.
#[derive(Clone, Debug)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

#[derive(Clone, Debug)]
pub struct AccountReport {
    pub display: String,
    pub outcome: ProvisioningOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub connect_failed: usize,
    pub step_failed: usize,
    pub interrupted: usize,
    pub not_attempted: usize,
}

#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub accounts: Vec<AccountReport>,
    pub total: usize,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.total,
            not_attempted: self.total.saturating_sub(self.accounts.len()),
            ..Default::default()
        };
        for account in &self.accounts {
            match account.outcome {
                ProvisioningOutcome::Skipped(_) => summary.skipped += 1,
                ProvisioningOutcome::ConnectFailed(_) => summary.connect_failed += 1,
                ProvisioningOutcome::StepFailed { .. } => summary.step_failed += 1,
                ProvisioningOutcome::Completed => summary.completed += 1,
                ProvisioningOutcome::Interrupted => summary.interrupted += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.accounts.iter().any(|a| a.outcome.is_failure())
    }
}
