//! Logging infrastructure
//!
//! Structured `tracing` events throughout the glue, plus the bridge that
//! routes script log call-outs into the same subscriber. Installing the
//! subscriber is optional and idempotent; embedders with their own
//! subscriber simply never call [`init`].

use crate::value::Value;
use once_cell::sync::OnceCell;
use std::io;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Colored output
    pub ansi: bool,
    /// Print event targets
    pub targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            ansi: false,
            targets: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // AFB_GLUE_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("AFB_GLUE_LOG_LEVEL") {
            config.level = parse_level(&level).unwrap_or(Level::INFO);
        }
        config.ansi = std::env::var("AFB_GLUE_LOG_ANSI").is_ok();
        config
    }

    /// Config for a binder `verbose` setting: 0 is info, each step adds detail
    pub fn from_verbosity(verbose: u32) -> Self {
        let level = match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            ..Self::default()
        }
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration. `RUST_LOG` wins over
/// `config.level`; a subscriber installed elsewhere is left alone.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let level = config.level.as_str().to_lowercase();
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "afb_glue_core={level},afb_glue_runtime={level},script={level}"
            ))
        });

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(config.ansi)
                    .with_target(config.targets)
                    .with_thread_ids(cfg!(debug_assertions)),
            )
            .try_init();

        if installed.is_ok() {
            tracing::debug!(level = %config.level, "logging initialized");
        }
    });
}

/// Whether [`init`] already ran
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Script log levels
// ============================================================================

/// Level names exposed to scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLevel {
    /// `error`
    Error,
    /// `warning`
    Warning,
    /// `notice`
    Notice,
    /// `info`
    Info,
    /// `debug`
    Debug,
}

impl ScriptLevel {
    /// Call-out name
    pub fn name(self) -> &'static str {
        match self {
            ScriptLevel::Error => "error",
            ScriptLevel::Warning => "warning",
            ScriptLevel::Notice => "notice",
            ScriptLevel::Info => "info",
            ScriptLevel::Debug => "debug",
        }
    }

    /// `tracing` level events are emitted at
    pub fn level(self) -> Level {
        match self {
            ScriptLevel::Error => Level::ERROR,
            ScriptLevel::Warning => Level::WARN,
            ScriptLevel::Notice => Level::INFO,
            ScriptLevel::Info => Level::DEBUG,
            ScriptLevel::Debug => Level::TRACE,
        }
    }
}

/// Emit one script log line under the `script` target
pub fn script_event(level: ScriptLevel, api: Option<&str>, verb: Option<&str>, message: &str) {
    let api = api.unwrap_or("-");
    let verb = verb.unwrap_or("-");
    match level {
        ScriptLevel::Error => tracing::error!(target: "script", api, verb, "{}", message),
        ScriptLevel::Warning => tracing::warn!(target: "script", api, verb, "{}", message),
        ScriptLevel::Notice => tracing::info!(target: "script", api, verb, "{}", message),
        ScriptLevel::Info => tracing::debug!(target: "script", api, verb, "{}", message),
        ScriptLevel::Debug => tracing::trace!(target: "script", api, verb, "{}", message),
    }
}

/// Expand printf-style directives against `args`.
///
/// Supports `%s`, `%d`, `%i`, `%f` and `%%`. A directive with no argument
/// left, or an unknown one, is kept as written; extra arguments are
/// appended separated by spaces.
pub fn format_message(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(d @ ('s' | 'd' | 'i' | 'f')) => {
                chars.next();
                match args.next() {
                    Some(arg) => push_directive(&mut out, d, arg),
                    None => {
                        out.push('%');
                        out.push(d);
                    }
                }
            }
            _ => out.push('%'),
        }
    }

    for extra in args {
        out.push(' ');
        out.push_str(&extra.to_string());
    }
    out
}

fn push_directive(out: &mut String, directive: char, arg: &Value) {
    match (directive, arg) {
        ('d' | 'i', Value::Float(f)) => out.push_str(&format!("{}", f.trunc() as i64)),
        ('f', Value::Int(i)) => out.push_str(&format!("{:.6}", *i as f64)),
        ('f', Value::Float(f)) => out.push_str(&format!("{:.6}", f)),
        _ => out.push_str(&arg.to_string()),
    }
}
