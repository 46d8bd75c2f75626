use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

pub(crate) const TRACE_FILE_ENV: &str = "HELPDESK_TRACE_FILE";

/// Keeps the JSONL writer alive; buffered lines flush when dropped.
pub(crate) struct TracingGuard {
    _guard: Option<WorkerGuard>,
}

/// Console output filtered by `RUST_LOG` (default `info`), plus a JSONL file
/// at `debug` when `HELPDESK_TRACE_FILE` is set.
pub(crate) fn init() -> TracingGuard {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_target(false).with_filter(console_filter);

    let mut guard = None;
    let jsonl_layer = std::env::var(TRACE_FILE_ENV).ok().map(|trace_file| {
        let (dir, filename) = split_trace_path(Path::new(&trace_file));
        let (writer, worker) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, filename));
        guard = Some(worker);

        let jsonl_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(jsonl_filter)
    });

    Registry::default()
        .with(console_layer)
        .with(jsonl_layer)
        .init();

    TracingGuard { _guard: guard }
}

fn split_trace_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let filename = path.file_name().map_or_else(
        || "helpdesk.jsonl".to_owned(),
        |name| name.to_string_lossy().into_owned(),
    );
    (dir, filename)
}
