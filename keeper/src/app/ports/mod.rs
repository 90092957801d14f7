// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod remote_exec;
pub mod reporter;

pub use remote_exec::{ExecCapture, RemoteExecPort, RemoteSession};
pub use reporter::ProvisionReporter;
