//! Telemetry helpers for tracing, Prometheus metrics, and the process panic hook.

use std::{fs, io, panic, path::Path, sync::OnceLock, thread, time::Duration};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::Dispatch;
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

use crate::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROM_UPKEEP_THREAD: OnceLock<thread::JoinHandle<()>> = OnceLock::new();

/// Keeps the optional Chrome trace writer alive until dropped.
pub struct TelemetryGuard {
    _chrome_guard: Option<tracing_chrome::FlushGuard>,
}

/// Ensure the global metrics recorder is installed and return the Prometheus handle.
pub fn init_metrics_recorder() -> io::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle);
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("metrics recorder already installed; /metrics will stay empty");
    }

    let upkeep_handle = handle.clone();
    if PROM_UPKEEP_THREAD.get().is_none() {
        let upkeep = spawn_thread("prometheus-upkeep", move || {
            loop {
                thread::sleep(Duration::from_secs(5));
                upkeep_handle.run_upkeep();
            }
        })?;
        let _ = PROM_UPKEEP_THREAD.set(upkeep);
    }

    Ok(PROM_HANDLE.get_or_init(|| handle))
}

/// Access the Prometheus handle when already initialised.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Install the global tracing subscriber described by `opts`.
///
/// A subscriber that is already installed (tests, embedding) is left in place.
pub fn init_tracing(opts: &TelemetryOptions) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_filter(env_filter);

    let (chrome_layer, chrome_guard) = match opts.chrome_trace_path.as_deref().map(chrome_trace_layer) {
        Some(Ok((layer, guard))) => (Some(layer), Some(guard)),
        Some(Err(err)) => {
            eprintln!("chrome span trace disabled: {err}");
            (None, None)
        }
        None => (None, None),
    };

    let span_only_filter = filter_fn(|metadata| metadata.is_span());
    let installed = tracing_subscriber::registry()
        .with(chrome_layer.map(|layer| layer.with_filter(span_only_filter)))
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("tracing subscriber already installed");
    }

    TelemetryGuard {
        _chrome_guard: chrome_guard,
    }
}

/// Route panics through tracing. The process keeps running; actix replaces
/// the worker that panicked.
pub fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let thread = thread::current();
        tracing::error!(
            thread = thread.name().unwrap_or("unnamed"),
            %location,
            "Unexpected fault: {payload}"
        );
        if std::env::var_os("RUST_BACKTRACE").is_some() {
            default_hook(info);
        }
    }));
}

/// Spawn a named worker thread that keeps the caller's tracing dispatcher and
/// runs `f` inside a `thread` span carrying that name.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
    thread::Builder::new().name(name.clone()).spawn(move || {
        tracing::dispatcher::with_default(&dispatch, || {
            let span = tracing::debug_span!("thread", name = %name);
            let result = span.in_scope(f);
            tracing::debug!(thread = %name, "Worker thread finished");
            result
        })
    })
}

type ChromeParts = (
    tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
    tracing_chrome::FlushGuard,
);

/// Chrome trace writer for relay spans. Connection spans live on async tasks
/// that hop between worker threads, so they are recorded as async slices.
fn chrome_trace_layer(path: &Path) -> io::Result<ChromeParts> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path).map_err(|err| {
        io::Error::new(err.kind(), format!("cannot create {}: {err}", path.display()))
    })?;
    Ok(tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Async)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_thread_is_named_and_returns_its_value() {
        let handle = spawn_thread("relay-test-worker", || {
            thread::current().name().map(str::to_string)
        })
        .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("relay-test-worker"));
    }

    #[test]
    fn chrome_trace_layer_creates_missing_directories() {
        let dir = std::env::temp_dir().join(format!("relay-chrome-{}", std::process::id()));
        let path = dir.join("nested").join("trace.json");
        let (_layer, guard) = chrome_trace_layer(&path).unwrap();
        drop(guard);
        assert!(path.exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
