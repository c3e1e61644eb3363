//! Binder and API configuration
//!
//! Both are read from a [`Data`] tree. Callable leaves render as plain
//! strings on the way through JSON and are ignored here; unknown fields are
//! ignored too.

use afb_glue_sdk::{Data, NativeError, NativeResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Default timeout of synchronous subcalls
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 60_000;

fn parse<T: DeserializeOwned>(data: &Data, what: &str) -> NativeResult<T> {
    serde_json::from_value(data.to_json())
        .map_err(|e| NativeError::InvalidConfig(format!("{}: {}", what, e)))
}

/// Runtime-wide settings passed to `binder(config)`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    /// Binder uid, also the name of the root API
    pub uid: String,
    /// Free-form description
    pub info: Option<String>,
    /// Verbosity, 0 is quiet
    pub verbose: u32,
    /// Listening port, kept for compatibility; no transport is started
    pub port: Option<u16>,
    /// Root directory for relative paths
    pub rootdir: Option<String>,
    /// Worker thread count
    pub workers: usize,
    /// Synchronous subcall timeout in milliseconds, zero waits forever
    pub call_timeout_ms: u64,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            uid: "afb-binder".to_string(),
            info: None,
            verbose: 0,
            port: None,
            rootdir: None,
            workers: num_cpus::get().max(2),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl BinderConfig {
    /// Parse and validate a binder config
    pub fn from_data(data: &Data) -> NativeResult<Self> {
        if !matches!(data, Data::Object(_)) {
            return Err(NativeError::InvalidConfig(format!(
                "binder config should be an object, got {}",
                data.type_name()
            )));
        }
        let mut config: Self = parse(data, "binder config")?;
        config.workers = config.workers.max(2);
        Ok(config)
    }
}

/// Settings of one API, local or imported
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API uid
    pub uid: Option<String>,
    /// Exported name, defaults to `uid`
    pub api: Option<String>,
    /// Free-form description
    pub info: Option<String>,
    /// Class used to group APIs for class-ready notification
    pub class: Option<String>,
    /// Export scope (`public`, `private`, ...)
    pub export: Option<String>,
    /// Remote address, present on imported APIs
    pub uri: Option<String>,
    /// Verbosity
    pub verbose: u32,
}

impl ApiConfig {
    /// Parse an API config
    pub fn from_data(data: &Data) -> NativeResult<Self> {
        parse(data, "api config")
    }

    /// Name the API is registered under
    pub fn name(&self) -> NativeResult<String> {
        if let Some(name) = self.api.as_ref().or(self.uid.as_ref()) {
            return Ok(name.clone());
        }
        // imported APIs may be named by the last segment of their uri
        self.uri
            .as_deref()
            .and_then(|uri| uri.rsplit(['/', ':', '@']).find(|s| !s.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| NativeError::InvalidConfig("api config requires 'api' or 'uid'".into()))
    }
}
