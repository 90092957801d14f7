// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::services::shell::sh_escape;
use crate::app::types::ProvisionStep;

const HOURLY_SCHEDULE: &str = "0 * * * *";
const REBOOT_SCHEDULE: &str = "@reboot";
const MIDNIGHT_SCHEDULE: &str = "0 0 * * *";
const KILL_ALL: &str = "kill -9 -1";

/// Replaces the whole table with an empty one.
const CLEAR_TABLE: &str = "echo '' | crontab -";

/// Appends one entry, keeping whatever the table holds (a missing table reads
/// as empty).
fn append_entry(entry: &str) -> String {
    format!(
        "(crontab -l 2>/dev/null; echo {}) | crontab -",
        sh_escape(entry)
    )
}

/// Remote command text for `step`, with `command` embedded verbatim.
pub fn step_command(step: ProvisionStep, command: &str) -> String {
    match step {
        ProvisionStep::ClearTable => CLEAR_TABLE.to_string(),
        ProvisionStep::Hourly => append_entry(&format!("{HOURLY_SCHEDULE} {command}")),
        ProvisionStep::OnReboot => append_entry(&format!("{REBOOT_SCHEDULE} {command}")),
        ProvisionStep::Watchdog => {
            append_entry(&format!("{MIDNIGHT_SCHEDULE} {KILL_ALL} && {command}"))
        }
        ProvisionStep::RunNow => command.to_string(),
    }
}

pub fn plan(command: &str) -> Vec<(ProvisionStep, String)> {
    ProvisionStep::ALL
        .iter()
        .map(|step| (*step, step_command(*step, command)))
        .collect()
}
