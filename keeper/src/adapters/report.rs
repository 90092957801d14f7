// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use log::Level;

use crate::app::ports::ProvisionReporter;
use crate::app::types::{BatchSummary, ProvisioningOutcome};

/// Reporter that writes progress through the `log` facade.
#[derive(Clone, Default)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

fn outcome_level(outcome: &ProvisioningOutcome) -> Level {
    match outcome {
        ProvisioningOutcome::Completed => Level::Info,
        ProvisioningOutcome::Skipped(_) | ProvisioningOutcome::Interrupted => Level::Warn,
        ProvisioningOutcome::ConnectFailed(_) | ProvisioningOutcome::StepFailed { .. } => {
            Level::Error
        }
    }
}

impl ProvisionReporter for LogReporter {
    fn batch_started(&self, total: usize) {
        log::info!("starting provisioning run for {total} account(s)");
    }

    fn account_started(&self, position: usize, total: usize, display: &str) {
        log::info!("[{position}/{total}] processing {display}");
    }

    fn account_finished(&self, display: &str, outcome: &ProvisioningOutcome) {
        log::log!(outcome_level(outcome), "{display}: {outcome}");
    }

    fn batch_finished(&self, summary: &BatchSummary, interrupted: bool) {
        let BatchSummary {
            total,
            completed,
            skipped,
            connect_failed,
            step_failed,
            interrupted: interrupted_accounts,
            not_attempted,
        } = summary;
        let line = format!(
            "total={total} completed={completed} skipped={skipped} connect_failed={connect_failed} \
             step_failed={step_failed} interrupted={interrupted_accounts} not_attempted={not_attempted}"
        );
        if interrupted {
            log::warn!("run interrupted: {line}");
        } else {
            log::info!("run finished: {line}");
        }
    }
}
