use owo_colors::OwoColorize;
use std::sync::OnceLock;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Installs the stderr subscriber. `RTS_LOG` takes the usual `EnvFilter`
/// syntax; otherwise `verbose` picks between `debug` and `warn`.
pub fn init(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ansi = ansi_enabled();
    let fallback = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("RTS_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn error_label() -> String {
    if ansi_enabled() {
        format!("{}", "error".bright_red().bold())
    } else {
        "error".to_string()
    }
}

pub fn section_label(name: &str) -> String {
    if ansi_enabled() {
        format!("{}", name.bright_cyan().bold())
    } else {
        name.to_string()
    }
}

pub fn method_label(method: &str) -> String {
    if !ansi_enabled() {
        return method.to_string();
    }

    match method {
        "GET" => format!("{}", method.bright_blue()),
        "POST" => format!("{}", method.bright_green()),
        "PUT" => format!("{}", method.bright_yellow()),
        "DELETE" => format!("{}", method.bright_red()),
        "PATCH" => format!("{}", method.bright_magenta()),
        _ => format!("{}", method.bright_white()),
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    supports_color::on_cached(Stream::Stderr).is_some()
}
