// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::{BatchSummary, ProvisioningOutcome};

/// Progress sink for a provisioning run.
/// Every `display` value is already masked.
pub trait ProvisionReporter: Send + Sync {
    fn batch_started(&self, total: usize);

    fn account_started(&self, position: usize, total: usize, display: &str);

    fn account_finished(&self, display: &str, outcome: &ProvisioningOutcome);

    fn batch_finished(&self, summary: &BatchSummary, interrupted: bool);
}
