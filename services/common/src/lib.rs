use std::{
    env, fs,
    net::SocketAddr,
    panic,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::{Duration, SystemTime},
};
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const DEFAULT_LOG_DIR: &str = "/var/log/atlas-iot";

/// Keeps the non-blocking file writer alive; drop it only at process exit.
pub struct TracingGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Installs the global subscriber: stdout always, plus a daily rolling file
/// under `$LOG_DIR/<service_name>` when that directory is writable.
pub fn init_tracing(service_name: &str) -> TracingGuards {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_root = log_root(service_name);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let mut file_guard: Option<WorkerGuard> = None;
    let mut file_layer = None;

    if fs::create_dir_all(&log_root).is_ok() {
        // The rolling appender panics if it cannot open its first file.
        let appender = panic::catch_unwind(|| {
            tracing_appender::rolling::daily(&log_root, format!("{service_name}.log"))
        })
        .ok();

        if let Some(appender) = appender {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_layer = Some(fmt::layer().with_ansi(false).with_writer(writer));
            file_guard = Some(guard);
        }
    }

    if let Some(layer) = file_layer {
        let subscriber = Registry::default()
            .with(filter)
            .with(stdout_layer)
            .with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = Registry::default().with(filter).with(stdout_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    if file_guard.is_some() {
        let retention_days = env_or("LOG_RETENTION_DAYS", 14u64);
        let cleanup_interval = env_or("LOG_CLEANUP_INTERVAL_MINUTES", 360u64);
        spawn_log_cleanup(log_root, retention_days, cleanup_interval);
    }

    TracingGuards {
        _file_guard: file_guard,
    }
}

fn log_root(service_name: &str) -> PathBuf {
    let log_dir = env::var("LOG_DIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
    PathBuf::from(log_dir).join(service_name)
}

/// Reads a typed environment value, falling back to `default` when the
/// variable is unset, empty, or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Reads a string environment value, treating an empty value as unset.
pub fn env_string_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Boolean switch: `1`, `true`, `yes` and `on` enable, `0`, `false`, `no`
/// and `off` disable, anything else keeps `default`.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key)
        .map(|value| value.trim().to_ascii_lowercase())
        .as_deref()
    {
        Ok("1" | "true" | "yes" | "on") => true,
        Ok("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

fn spawn_log_cleanup(log_root: PathBuf, retention_days: u64, cleanup_interval_minutes: u64) {
    if retention_days == 0 || cleanup_interval_minutes == 0 {
        return;
    }

    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let interval = Duration::from_secs(cleanup_interval_minutes * 60);

    thread::spawn(move || loop {
        if let Some(cutoff) = SystemTime::now().checked_sub(retention) {
            cleanup_old_logs(&log_root, cutoff);
        }
        thread::sleep(interval);
    });
}

fn cleanup_old_logs(root: &Path, cutoff: SystemTime) {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            cleanup_old_logs(&path, cutoff);
            continue;
        }
        let modified = match fs::metadata(&path).and_then(|metadata| metadata.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if modified < cutoff {
            let _ = fs::remove_file(&path);
        }
    }
}

pub async fn bind_listener(port: u16) -> TcpListener {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await.expect("bind listener")
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
