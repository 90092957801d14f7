// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Config;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{RemoteExecPort, RemoteSession};
use crate::app::types::SshTarget;

mod error;
mod session;

pub use error::{AuthenticationFailure, HostKeyMismatch};
pub use session::SshSession;

/// Knobs for the russh client shared by every account connection.
#[derive(Clone, Debug)]
pub struct SshOptions {
    /// Protocol keepalive; keeps a long foreground command from being dropped.
    pub keepalive_secs: u64,
    /// `None` uses the user's `~/.ssh/known_hosts`.
    pub known_hosts_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct SshAdapter {
    config: Arc<Config>,
    known_hosts_path: Option<PathBuf>,
}

impl SshAdapter {
    pub fn new(options: SshOptions) -> Self {
        let keepalive = (options.keepalive_secs > 0)
            .then(|| Duration::from_secs(options.keepalive_secs));
        let cfg = Config {
            // No idle cutoff: step commands may run for as long as they need.
            inactivity_timeout: None,
            keepalive_interval: keepalive,
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            config: Arc::new(cfg),
            known_hosts_path: options.known_hosts_path,
        }
    }
}

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else if err.chain().any(|cause| cause.is::<HostKeyMismatch>()) {
        codes::HOST_KEY_MISMATCH
    } else {
        codes::CONNECTION_FAILURE
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Aborted,
        ssh_error_code(&err),
        format!("ssh connect failed: {err:#}"),
    )
}

pub(crate) fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

#[async_trait]
impl RemoteExecPort for SshAdapter {
    async fn connect(&self, target: &SshTarget) -> AppResult<Box<dyn RemoteSession>> {
        let session = SshSession::connect(
            self.config.clone(),
            target,
            self.known_hosts_path.clone(),
        )
        .await
        .map_err(map_connect_error)?;
        Ok(Box::new(session))
    }
}
