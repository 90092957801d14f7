// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use russh::Disconnect;
use russh::client::{AuthResult, Config, Handle};
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use secrecy::ExposeSecret;

use crate::app::errors::AppResult;
use crate::app::ports::{ExecCapture, RemoteSession};
use crate::app::services::mask::mask;
use crate::app::types::SshTarget;

use super::{AuthenticationFailure, HostKeyMismatch, map_exec_error};

mod exec;


/// russh client handler that trusts unseen host keys and records them.
#[derive(Clone, Debug)]
pub(super) struct ClientHandler {
    host: String,
    port: u16,
    known_hosts_path: Option<PathBuf>,
}

impl ClientHandler {
    fn new(host: String, port: u16, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            host,
            port,
            known_hosts_path,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.port,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Trust-on-first-use: a known matching key passes, an unseen host is
/// learned, a changed key is refused.
fn verify_server_key(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let shown = mask(host);
    match check_known_hosts_for(host, port, key, known_hosts_path) {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(err) => {
            log::warn!("server key validation failed for {shown}:{port}: {err}");
            return Err(known_hosts_error(err, &shown, port));
        }
    }

    log::info!("server key for {shown}:{port} is not present in known_hosts; learning");
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        log::warn!("failed to learn server key for {shown}:{port}: {err}");
        anyhow!("failed to learn server key for {shown}:{port}: {err}")
    })?;
    Ok(true)
}

/// Only a changed key is a mismatch; anything else (unreadable or unparsable
/// known_hosts) is an ordinary connection failure.
fn known_hosts_error(err: russh::keys::Error, shown: &str, port: u16) -> anyhow::Error {
    match err {
        russh::keys::Error::KeyChanged { .. } => HostKeyMismatch {
            reason: err.to_string(),
        }
        .into(),
        other => anyhow!("failed to check known_hosts for {shown}:{port}: {other}"),
    }
}

fn auth_outcome(result: AuthResult) -> Result<()> {
    match result {
        AuthResult::Success => Ok(()),
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            log::debug!(
                "password authentication failed (partial_success={}, remaining={:?})",
                partial_success,
                remaining_methods
            );
            Err(AuthenticationFailure.into())
        }
    }
}

/// One authenticated connection to an account's host.
pub struct SshSession {
    handle: Option<Handle<ClientHandler>>,
    /// Masked, for log lines only.
    host: String,
}

impl SshSession {
    pub(super) async fn connect(
        config: Arc<Config>,
        target: &SshTarget,
        known_hosts_path: Option<PathBuf>,
    ) -> Result<Self> {
        let handler = ClientHandler::new(target.host.clone(), target.port, known_hosts_path);
        let mut handle = russh::client::connect(config, (target.host.as_str(), target.port), handler)
            .await
            .with_context(|| format!("connecting to {}:{}", mask(&target.host), target.port))?;
        log::debug!(
            "established connection with {}:{}, proceeding with auth",
            mask(&target.host),
            target.port
        );

        let auth = handle
            .authenticate_password(target.username.clone(), target.password.expose_secret())
            .await
            .context("password authentication request");
        if let Err(err) = auth.and_then(auth_outcome) {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(err);
        }

        Ok(Self {
            handle: Some(handle),
            host: mask(&target.host),
        })
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec_capture(&mut self, command: &str) -> AppResult<ExecCapture> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| map_exec_error(anyhow!("SSH handle already closed")))?;
        exec::exec_capture(handle, command)
            .await
            .map_err(map_exec_error)
    }

    async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.is_closed() {
            return;
        }
        if let Err(err) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            log::debug!("error while disconnecting from {}: {}", self.host, err);
        }
    }
}
