// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::Instrument;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecCapture, ProvisionReporter, RemoteExecPort, RemoteSession};
use crate::app::services::{crontab, mask};
use crate::app::types::{
    AccountEntry, AccountRecord, AccountReport, BatchReport, ProvisionSettings, ProvisionStep,
    ProvisioningOutcome, SkipReason, SshTarget,
};

#[derive(Clone)]
pub struct UseCases {
    pub(crate) remote: Arc<dyn RemoteExecPort>,
    pub(crate) reporter: Arc<dyn ProvisionReporter>,
    pub(crate) settings: ProvisionSettings,
}

struct StepFailure {
    step: ProvisionStep,
    cause: String,
}

impl UseCases {
    pub fn new(
        remote: Arc<dyn RemoteExecPort>,
        reporter: Arc<dyn ProvisionReporter>,
        settings: ProvisionSettings,
    ) -> Self {
        Self {
            remote,
            reporter,
            settings,
        }
    }

    /// Provisions one account with no way to interrupt it.
    #[cfg(test)]
    pub async fn provision(&self, record: &AccountRecord) -> ProvisioningOutcome {
        let (_cancel_tx, mut cancel_rx) = watch::channel(false);
        self.provision_until(record, &mut cancel_rx).await
    }

    /// Provisions one account: connect, run every step in order, close.
    /// Stops at the first failing step; a raised `cancel` flag ends the run
    /// with `Interrupted` after closing the session.
    pub async fn provision_until(
        &self,
        record: &AccountRecord,
        cancel: &mut watch::Receiver<bool>,
    ) -> ProvisioningOutcome {
        if let Err(reason) = record.eligibility() {
            return ProvisioningOutcome::Skipped(reason);
        }
        let display = mask::display_name(&record.username, &record.tip);

        let target = SshTarget {
            host: self.settings.host_for(&record.username),
            port: self.settings.ssh_port,
            username: record.username.clone(),
            password: record.password.clone(),
        };
        let connect = with_timeout(self.settings.connect_timeout, self.remote.connect(&target));
        let connected = tokio::select! {
            res = connect => res,
            _ = wait_cancelled(cancel) => {
                log::warn!("{display}: interrupted while connecting");
                return ProvisioningOutcome::Interrupted;
            }
        };
        drop(target);

        let mut session = match connected {
            Ok(session) => session,
            Err(err) => {
                log::debug!(
                    "{display}: connect failed ({:?}, code {})",
                    err.kind(),
                    err.code()
                );
                return ProvisioningOutcome::ConnectFailed(err.message().to_string());
            }
        };
        log::debug!("{display}: connected, running {} steps", ProvisionStep::ALL.len());

        let steps = self.run_steps(session.as_mut(), &record.command, &display);
        let result = tokio::select! {
            res = steps => Some(res),
            _ = wait_cancelled(cancel) => None,
        };
        session.close().await;

        match result {
            Some(Ok(())) => ProvisioningOutcome::Completed,
            Some(Err(failure)) => {
                log::debug!(
                    "{display}: stopped at step {} ({})",
                    failure.step.index(),
                    failure.step.label()
                );
                ProvisioningOutcome::StepFailed {
                    step: failure.step.index(),
                    cause: failure.cause,
                }
            }
            None => {
                log::warn!("{display}: interrupted while running steps");
                ProvisioningOutcome::Interrupted
            }
        }
    }

    async fn run_steps(
        &self,
        session: &mut dyn RemoteSession,
        command: &str,
        display: &str,
    ) -> Result<(), StepFailure> {
        for (step, text) in crontab::plan(command) {
            log::debug!(
                "{display}: step {}/{} {}",
                step.index(),
                ProvisionStep::ALL.len(),
                step.label()
            );
            let res = with_timeout(self.settings.step_timeout, session.exec_capture(&text)).await;
            match res {
                Ok(capture) if capture.success() => {
                    log::debug!(
                        "{display}: step {} ok ({} bytes of output)",
                        step.index(),
                        capture.stdout.len()
                    );
                }
                Ok(capture) => {
                    return Err(StepFailure {
                        step,
                        cause: describe_exit(&capture),
                    });
                }
                Err(err) => {
                    return Err(StepFailure {
                        step,
                        cause: err.message().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Runs every entry in order. Per-account failures are recorded and the
    /// batch moves on; only a raised `cancel` flag stops it early.
    pub async fn run_batch(
        &self,
        entries: Vec<AccountEntry>,
        mut cancel: watch::Receiver<bool>,
    ) -> BatchReport {
        let total = entries.len();
        self.reporter.batch_started(total);
        let mut report = BatchReport {
            total,
            ..Default::default()
        };

        for (idx, entry) in entries.into_iter().enumerate() {
            if *cancel.borrow() {
                report.interrupted = true;
                break;
            }
            let position = idx + 1;
            let (display, outcome) = match entry {
                AccountEntry::Malformed { index, reason } => {
                    let display = format!("entry #{}", index + 1);
                    self.reporter.account_started(position, total, &display);
                    (
                        display,
                        ProvisioningOutcome::Skipped(SkipReason::MalformedRecord(reason)),
                    )
                }
                AccountEntry::Record(record) => {
                    let display = mask::display_name(&record.username, &record.tip);
                    self.reporter.account_started(position, total, &display);
                    let span = tracing::info_span!("account", position, total);
                    let outcome = self
                        .provision_until(&record, &mut cancel)
                        .instrument(span)
                        .await;
                    (display, outcome)
                }
            };
            self.reporter.account_finished(&display, &outcome);
            let stop = outcome == ProvisioningOutcome::Interrupted;
            report.accounts.push(AccountReport { display, outcome });
            if stop {
                report.interrupted = true;
                break;
            }
        }

        self.reporter
            .batch_finished(&report.summary(), report.interrupted);
        report
    }
}

fn describe_exit(capture: &ExecCapture) -> String {
    match capture.stderr_tail() {
        Some(line) => format!("exit status {}: {}", capture.exit_code, line),
        None => format!("exit status {}", capture.exit_code),
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    let Some(limit) = limit else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(AppError::with_message(
            AppErrorKind::DeadlineExceeded,
            codes::TIMEOUT,
            format!("timed out after {limit:?}"),
        )),
    }
}

/// Resolves once the flag is raised. Never resolves if the sender is gone
/// without raising it.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::app::types::BatchSummary;

    #[derive(Clone)]
    enum StepBehavior {
        Exit(u32, &'static str),
        Transport,
        Hang,
        CancelAndHang,
    }

    #[derive(Clone, Default)]
    struct FakeRemote {
        calls: Arc<Mutex<Vec<String>>>,
        unreachable: HashSet<String>,
        /// 1-based exec number -> behavior, applied to every session.
        steps: Vec<(usize, StepBehavior)>,
        /// Connect never returns; raises `cancel_tx` first when one is set.
        hang_connect: bool,
        cancel_tx: Option<Arc<watch::Sender<bool>>>,
    }

    impl FakeRemote {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        }
    }

    struct FakeSession {
        calls: Arc<Mutex<Vec<String>>>,
        steps: Vec<(usize, StepBehavior)>,
        cancel_tx: Option<Arc<watch::Sender<bool>>>,
        executed: usize,
    }

    #[async_trait]
    impl RemoteExecPort for FakeRemote {
        async fn connect(&self, target: &SshTarget) -> AppResult<Box<dyn RemoteSession>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("connect:{}:{}", target.host, target.port));
            if self.hang_connect {
                if let Some(tx) = &self.cancel_tx {
                    let _ = tx.send(true);
                }
                return std::future::pending().await;
            }
            if self.unreachable.contains(&target.host) {
                return Err(AppError::with_message(
                    AppErrorKind::Aborted,
                    codes::CONNECTION_FAILURE,
                    "ssh connect failed: connection refused",
                ));
            }
            Ok(Box::new(FakeSession {
                calls: Arc::clone(&self.calls),
                steps: self.steps.clone(),
                cancel_tx: self.cancel_tx.clone(),
                executed: 0,
            }))
        }
    }

    #[async_trait]
    impl RemoteSession for FakeSession {
        async fn exec_capture(&mut self, command: &str) -> AppResult<ExecCapture> {
            self.executed += 1;
            self.calls
                .lock()
                .unwrap()
                .push(format!("exec:{command}"));
            let behavior = self
                .steps
                .iter()
                .find(|(n, _)| *n == self.executed)
                .map(|(_, b)| b.clone());
            let ok = ExecCapture {
                stdout: Vec::new(),
                stderr: Vec::new(),
                exit_code: 0,
            };
            match behavior {
                None => Ok(ok),
                Some(StepBehavior::Exit(code, stderr)) => Ok(ExecCapture {
                    stdout: Vec::new(),
                    stderr: stderr.as_bytes().to_vec(),
                    exit_code: code,
                }),
                Some(StepBehavior::Transport) => Err(AppError::with_message(
                    AppErrorKind::Internal,
                    codes::REMOTE_ERROR,
                    "ssh exec failed: channel closed",
                )),
                Some(StepBehavior::Hang) => std::future::pending().await,
                Some(StepBehavior::CancelAndHang) => {
                    if let Some(tx) = &self.cancel_tx {
                        let _ = tx.send(true);
                    }
                    std::future::pending().await
                }
            }
        }

        async fn close(&mut self) {
            self.calls.lock().unwrap().push("close".to_string());
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<String>>,
        summary: Mutex<Option<(BatchSummary, bool)>>,
    }

    impl RecordingReporter {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProvisionReporter for RecordingReporter {
        fn batch_started(&self, total: usize) {
            self.events.lock().unwrap().push(format!("batch:{total}"));
        }

        fn account_started(&self, position: usize, total: usize, display: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start:{position}/{total}:{display}"));
        }

        fn account_finished(&self, display: &str, outcome: &ProvisioningOutcome) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done:{display}:{outcome}"));
        }

        fn batch_finished(&self, summary: &BatchSummary, interrupted: bool) {
            *self.summary.lock().unwrap() = Some((summary.clone(), interrupted));
        }
    }

    fn usecases(remote: FakeRemote) -> (UseCases, Arc<RecordingReporter>) {
        usecases_with(remote, ProvisionSettings::default())
    }

    fn usecases_with(
        remote: FakeRemote,
        settings: ProvisionSettings,
    ) -> (UseCases, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let uc = UseCases::new(Arc::new(remote), reporter.clone(), settings);
        (uc, reporter)
    }

    fn alice() -> AccountRecord {
        AccountRecord::new("alice", "p1", Some("run.sh"), None)
    }

    #[tokio::test]
    async fn missing_credentials_skip_without_connecting() {
        let remote = FakeRemote::default();
        let (uc, _) = usecases(remote.clone());

        let outcome = uc.provision(&AccountRecord::new("", "p1", None, None)).await;
        assert_eq!(outcome, ProvisioningOutcome::Skipped(SkipReason::MissingUsername));
        let outcome = uc.provision(&AccountRecord::new("bob", "  ", None, None)).await;
        assert_eq!(outcome, ProvisioningOutcome::Skipped(SkipReason::MissingPassword));

        assert_eq!(remote.count("connect:"), 0);
    }

    #[tokio::test]
    async fn connect_failure_runs_no_steps() {
        let remote = FakeRemote {
            unreachable: HashSet::from(["alice.serv00.net".to_string()]),
            ..Default::default()
        };
        let (uc, _) = usecases(remote.clone());

        let outcome = uc.provision(&alice()).await;
        let ProvisioningOutcome::ConnectFailed(cause) = outcome else {
            panic!("expected connect failure, got {outcome:?}");
        };
        assert!(cause.contains("connection refused"));
        assert_eq!(remote.calls(), vec!["connect:alice.serv00.net:22"]);
    }

    #[tokio::test]
    async fn successful_run_executes_all_steps_in_order() {
        let remote = FakeRemote::default();
        let (uc, _) = usecases(remote.clone());

        let outcome = uc.provision(&alice()).await;
        assert_eq!(outcome, ProvisioningOutcome::Completed);

        let mut expected = vec!["connect:alice.serv00.net:22".to_string()];
        expected.extend(
            crontab::plan("run.sh")
                .into_iter()
                .map(|(_, text)| format!("exec:{text}")),
        );
        expected.push("close".to_string());
        assert_eq!(remote.calls(), expected);
    }

    #[tokio::test]
    async fn nonzero_exit_on_step_three_stops_the_sequence() {
        let remote = FakeRemote {
            steps: vec![(3, StepBehavior::Exit(1, "crontab: installing new crontab failed\n"))],
            ..Default::default()
        };
        let (uc, _) = usecases(remote.clone());

        let outcome = uc.provision(&alice()).await;
        assert_eq!(
            outcome,
            ProvisioningOutcome::StepFailed {
                step: 3,
                cause: "exit status 1: crontab: installing new crontab failed".to_string(),
            }
        );
        assert_eq!(remote.count("exec:"), 3);
        assert_eq!(remote.count("close"), 1);
        assert_eq!(remote.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn transport_error_is_a_step_failure() {
        let remote = FakeRemote {
            steps: vec![(1, StepBehavior::Transport)],
            ..Default::default()
        };
        let (uc, _) = usecases(remote.clone());

        let outcome = uc.provision(&alice()).await;
        assert_eq!(
            outcome,
            ProvisioningOutcome::StepFailed {
                step: 1,
                cause: "ssh exec failed: channel closed".to_string(),
            }
        );
        assert_eq!(remote.count("exec:"), 1);
        assert_eq!(remote.count("close"), 1);
    }

    #[tokio::test]
    async fn step_timeout_fails_the_hanging_step() {
        let remote = FakeRemote {
            steps: vec![(4, StepBehavior::Hang)],
            ..Default::default()
        };
        let settings = ProvisionSettings {
            step_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (uc, _) = usecases_with(remote.clone(), settings);

        let outcome = uc.provision(&alice()).await;
        let ProvisioningOutcome::StepFailed { step, cause } = outcome else {
            panic!("expected step failure, got {outcome:?}");
        };
        assert_eq!(step, 4);
        assert!(cause.starts_with("timed out after"));
        assert_eq!(remote.count("close"), 1);
    }

    #[tokio::test]
    async fn connect_timeout_is_a_connect_failure() {
        let remote = FakeRemote {
            hang_connect: true,
            ..Default::default()
        };
        let settings = ProvisionSettings {
            connect_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (uc, _) = usecases_with(remote.clone(), settings);

        let outcome = uc.provision(&alice()).await;
        let ProvisioningOutcome::ConnectFailed(cause) = outcome else {
            panic!("expected connect failure, got {outcome:?}");
        };
        assert!(cause.starts_with("timed out after"), "{cause}");
        assert_eq!(remote.count("connect:"), 1);
        assert_eq!(remote.count("exec:"), 0);
        assert_eq!(remote.count("close"), 0);
    }

    #[tokio::test]
    async fn interruption_while_connecting_stops_batch() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let remote = FakeRemote {
            hang_connect: true,
            cancel_tx: Some(Arc::new(cancel_tx)),
            ..Default::default()
        };
        let (uc, reporter) = usecases(remote.clone());

        let entries = vec![
            AccountEntry::Record(alice()),
            AccountEntry::Record(AccountRecord::new("bob", "p2", None, None)),
        ];
        let report = uc.run_batch(entries, cancel_rx).await;

        assert!(report.interrupted);
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.accounts[0].outcome, ProvisioningOutcome::Interrupted);
        assert_eq!(remote.calls(), vec!["connect:alice.serv00.net:22"]);

        let (summary, interrupted) = reporter.summary.lock().unwrap().clone().unwrap();
        assert!(interrupted);
        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.not_attempted, 1);
    }

    #[tokio::test]
    async fn custom_suffix_and_port_shape_the_target() {
        let remote = FakeRemote::default();
        let settings = ProvisionSettings {
            domain_suffix: "example.test".to_string(),
            ssh_port: 2222,
            ..Default::default()
        };
        let (uc, _) = usecases_with(remote.clone(), settings);

        uc.provision(&alice()).await;
        assert_eq!(remote.calls()[0], "connect:alice.example.test:2222");
    }

    #[tokio::test]
    async fn batch_continues_after_a_connect_failure() {
        let remote = FakeRemote {
            unreachable: HashSet::from(["bob.serv00.net".to_string()]),
            ..Default::default()
        };
        let (uc, reporter) = usecases(remote.clone());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let entries = vec![
            AccountEntry::Record(alice()),
            AccountEntry::Record(AccountRecord::new("bob", "p2", None, Some("backup"))),
            AccountEntry::Record(AccountRecord::new("carol", "p3", None, None)),
        ];
        let report = uc.run_batch(entries, cancel_rx).await;

        assert!(!report.interrupted);
        assert_eq!(report.accounts.len(), 3);
        assert_eq!(report.accounts[0].outcome, ProvisioningOutcome::Completed);
        assert!(matches!(
            report.accounts[1].outcome,
            ProvisioningOutcome::ConnectFailed(_)
        ));
        assert_eq!(report.accounts[2].outcome, ProvisioningOutcome::Completed);
        assert_eq!(report.accounts[1].display, "b*b (b****p)");
        assert_eq!(remote.count("connect:carol.serv00.net"), 1);

        let events = reporter.events();
        assert_eq!(events[0], "batch:3");
        assert!(events.contains(&"start:3/3:c***l".to_string()));
        assert!(events.iter().all(|e| !e.contains("alice")));
        let (summary, interrupted) = reporter.summary.lock().unwrap().clone().unwrap();
        assert!(!interrupted);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.connect_failed, 1);
    }

    #[tokio::test]
    async fn malformed_and_ineligible_entries_are_skipped() {
        let remote = FakeRemote::default();
        let (uc, _) = usecases(remote.clone());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let entries = vec![
            AccountEntry::Malformed {
                index: 0,
                reason: "entry is not a mapping".to_string(),
            },
            AccountEntry::Record(AccountRecord::new("dave", "", None, None)),
            AccountEntry::Record(alice()),
        ];
        let report = uc.run_batch(entries, cancel_rx).await;

        assert_eq!(report.accounts[0].display, "entry #1");
        assert_eq!(
            report.accounts[0].outcome,
            ProvisioningOutcome::Skipped(SkipReason::MalformedRecord(
                "entry is not a mapping".to_string()
            ))
        );
        assert_eq!(
            report.accounts[1].outcome,
            ProvisioningOutcome::Skipped(SkipReason::MissingPassword)
        );
        assert_eq!(report.accounts[2].outcome, ProvisioningOutcome::Completed);
        assert_eq!(remote.count("connect:"), 1);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn interruption_closes_session_and_stops_batch() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let remote = FakeRemote {
            steps: vec![(2, StepBehavior::CancelAndHang)],
            cancel_tx: Some(Arc::new(cancel_tx)),
            ..Default::default()
        };
        let (uc, reporter) = usecases(remote.clone());

        let entries = vec![
            AccountEntry::Record(alice()),
            AccountEntry::Record(AccountRecord::new("bob", "p2", None, None)),
        ];
        let report = uc.run_batch(entries, cancel_rx).await;

        assert!(report.interrupted);
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.accounts[0].outcome, ProvisioningOutcome::Interrupted);
        assert_eq!(remote.count("close"), 1);
        assert_eq!(remote.count("connect:bob"), 0);

        let (summary, interrupted) = reporter.summary.lock().unwrap().clone().unwrap();
        assert!(interrupted);
        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.not_attempted, 1);
    }

    #[tokio::test]
    async fn already_cancelled_batch_attempts_nothing() {
        let remote = FakeRemote::default();
        let (uc, _) = usecases(remote.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let report = uc
            .run_batch(vec![AccountEntry::Record(alice())], cancel_rx)
            .await;
        assert!(report.interrupted);
        assert!(report.accounts.is_empty());
        assert_eq!(report.summary().not_attempted, 1);
        assert!(remote.calls().is_empty());
    }
}
