// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Process-wide tracing subscriber. Library code logs through the `log`
//! facade; `init` bridges those records into the registry.

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV: &str = "KEEPER_LOG";
const LOG_FORMAT_ENV: &str = "KEEPER_LOG_FORMAT";
const LOG_SPAN_EVENTS_ENV: &str = "KEEPER_LOG_SPAN_EVENTS";
const LOG_FILE_ENV: &str = "KEEPER_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

// Each fmt flavour is a distinct layer type, so the wiring is stamped out
// per format.
macro_rules! install {
    ($registry:expr, $flavour:ident, $span_events:expr) => {{
        let stderr_layer = tracing_subscriber::fmt::layer()
            .$flavour()
            .with_writer(std::io::stderr)
            .with_timer(UtcTime::rfc_3339())
            .with_span_events($span_events.clone());
        if let Some((writer, guard)) = build_file_writer() {
            let file_layer = tracing_subscriber::fmt::layer()
                .$flavour()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events($span_events)
                .with_writer(writer);
            $registry.with(stderr_layer).with(file_layer).init();
            let _ = FILE_GUARD.set(guard);
        } else {
            $registry.with(stderr_layer).init();
        }
    }};
}

pub fn init(verbose: bool) {
    let filter = build_filter(env::var(LOG_ENV).ok(), verbose);
    let span_events = parse_span_events(env::var(LOG_SPAN_EVENTS_ENV).ok().as_deref());
    let format = parse_format(env::var(LOG_FORMAT_ENV).ok().as_deref());
    let registry = Registry::default()
        .with(filter)
        .with(tracing_error::ErrorLayer::default());

    match format {
        LogFormat::Json => install!(registry, json, span_events),
        LogFormat::Pretty => install!(registry, pretty, span_events),
        LogFormat::Compact => install!(registry, compact, span_events),
    }
}

fn build_filter(directives: Option<String>, verbose: bool) -> EnvFilter {
    match directives.filter(|value| !value.trim().is_empty()) {
        Some(value) => EnvFilter::new(value),
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("warn,keeper=info"),
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match normalized(value).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(value: Option<&str>) -> FmtSpan {
    match normalized(value).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(LOG_FILE_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
