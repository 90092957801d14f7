// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use russh::ChannelMsg;
use russh::client::Handle;

use crate::app::ports::ExecCapture;

use super::ClientHandler;

/// How long to keep reading after the exit status when the channel stays
/// open, e.g. because a backgrounded child still holds stdout.
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct CaptureState {
    out: Vec<u8>,
    err: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    eof: bool,
}

impl CaptureState {
    fn exited(&self) -> bool {
        self.exit_status.is_some() || self.exit_signal.is_some()
    }

    fn finish(self) -> Result<ExecCapture> {
        if let Some(signal) = self.exit_signal {
            return Err(anyhow!("remote command terminated by signal {signal}"));
        }
        let Some(exit_code) = self.exit_status else {
            return Err(anyhow!("channel closed without an exit status"));
        };
        Ok(ExecCapture {
            stdout: self.out,
            stderr: self.err,
            exit_code,
        })
    }
}

/// Folds one channel message into `state`; returns true once nothing more is
/// needed: the channel closed, or both EOF and the exit status have arrived.
fn handle_capture_message(msg: &ChannelMsg, state: &mut CaptureState) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            state.out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            state.err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            state.exit_status = Some(*exit_status);
            state.eof
        }
        ChannelMsg::ExitSignal { signal_name, .. } => {
            state.exit_signal = Some(format!("{signal_name:?}"));
            state.eof
        }
        ChannelMsg::Eof => {
            state.eof = true;
            state.exited()
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

/// Runs `cmd` on a fresh exec channel and waits for its exit status,
/// collecting output until the channel closes or goes quiet.
pub(super) async fn exec_capture(
    handle: &Handle<ClientHandler>,
    cmd: &str,
) -> Result<ExecCapture> {
    let mut chan = handle
        .channel_open_session()
        .await
        .context("open session")?;
    chan.exec(true, cmd).await.context("exec request")?;

    let mut state = CaptureState::default();
    loop {
        let next = if state.exited() {
            match tokio::time::timeout(EXIT_DRAIN_GRACE, chan.wait()).await {
                Ok(next) => next,
                Err(_) => {
                    log::debug!(
                        "channel still open {EXIT_DRAIN_GRACE:?} after exit status; not waiting for close"
                    );
                    break;
                }
            }
        } else {
            chan.wait().await
        };
        let Some(msg) = next else {
            break;
        };
        if handle_capture_message(&msg, &mut state) {
            break;
        }
    }

    let _ = chan.close().await;
    log::debug!(
        "remote command finished (status={:?}, stdout={}B, stderr={}B)",
        state.exit_status,
        state.out.len(),
        state.err.len()
    );
    state.finish()
}

#[cfg(test)]
mod tests {
    use super::{CaptureState, handle_capture_message};
    use russh::{ChannelMsg, CryptoVec, Sig};

    #[test]
    fn handle_capture_message_accumulates_output() {
        let mut state = CaptureState::default();

        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"hi"),
        };
        assert!(!handle_capture_message(&msg, &mut state));
        assert_eq!(state.out, b"hi");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"err"),
            ext: 1,
        };
        assert!(!handle_capture_message(&msg, &mut state));
        assert_eq!(state.err, b"err");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"skip"),
            ext: 2,
        };
        assert!(!handle_capture_message(&msg, &mut state));
        assert_eq!(state.err, b"err");

        let msg = ChannelMsg::ExitStatus { exit_status: 42 };
        assert!(!handle_capture_message(&msg, &mut state));

        let msg = ChannelMsg::Close;
        assert!(handle_capture_message(&msg, &mut state));

        let capture = state.finish().unwrap();
        assert_eq!(capture.exit_code, 42);
        assert_eq!(capture.stdout, b"hi");
    }

    #[test]
    fn exit_status_then_eof_finishes_without_close() {
        let mut state = CaptureState::default();
        let msg = ChannelMsg::ExitStatus { exit_status: 0 };
        assert!(!handle_capture_message(&msg, &mut state));
        assert!(state.exited());
        assert!(handle_capture_message(&ChannelMsg::Eof, &mut state));
        assert_eq!(state.finish().unwrap().exit_code, 0);
    }

    #[test]
    fn eof_then_exit_status_finishes_without_close() {
        let mut state = CaptureState::default();
        assert!(!handle_capture_message(&ChannelMsg::Eof, &mut state));
        assert!(!state.exited());
        let msg = ChannelMsg::ExitStatus { exit_status: 3 };
        assert!(handle_capture_message(&msg, &mut state));
        assert_eq!(state.finish().unwrap().exit_code, 3);
    }

    #[test]
    fn missing_exit_status_is_an_error() {
        let mut state = CaptureState::default();
        assert!(handle_capture_message(&ChannelMsg::Close, &mut state));
        let err = state.finish().unwrap_err();
        assert!(err.to_string().contains("without an exit status"));
    }

    #[test]
    fn exit_signal_is_an_error() {
        let mut state = CaptureState::default();
        let msg = ChannelMsg::ExitSignal {
            signal_name: Sig::KILL,
            core_dumped: false,
            error_message: String::new(),
            lang_tag: String::new(),
        };
        assert!(!handle_capture_message(&msg, &mut state));
        let err = state.finish().unwrap_err();
        assert!(err.to_string().contains("terminated by signal KILL"));
    }
}
