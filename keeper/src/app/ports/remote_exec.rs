// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::SshTarget;

#[derive(Debug, Clone)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: u32,
}

impl ExecCapture {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, for failure messages.
    pub fn stderr_tail(&self) -> Option<String> {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
    }
}

#[async_trait]
/// Opens authenticated sessions to remote hosts.
pub trait RemoteExecPort: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> AppResult<Box<dyn RemoteSession>>;
}

#[async_trait]
/// One authenticated connection, owned by a single account run.
/// Commands run one at a time and each call waits for the exit status.
pub trait RemoteSession: Send {
    async fn exec_capture(&mut self, command: &str) -> AppResult<ExecCapture>;

    async fn close(&mut self);
}
