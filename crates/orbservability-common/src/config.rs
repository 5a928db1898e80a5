//! Configuration for the observer bridge

use crate::error::{ObserverError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default Pixie standalone PEM address
pub const DEFAULT_PIXIE_URL: &str = "127.0.0.1:12345";
/// Default cluster id passed with every script execution
pub const DEFAULT_VIZIER_HOST: &str = "localhost";
/// Default location of the PxL script
pub const DEFAULT_PXL_FILE_PATH: &str = "./config/config.pxl";
/// Default sleep between script executions, in seconds
pub const DEFAULT_STREAM_SLEEP_SECS: u64 = 10;
/// Default number of failed executions tolerated
pub const DEFAULT_MAX_ERROR_COUNT: u32 = 3;

/// Observer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Event gateway address (required)
    pub orbservability_url: String,
    /// Pixie / Vizier address
    pub pixie_url: String,
    /// Cluster id sent with each execution request
    pub vizier_host: String,
    /// Path to the PxL script
    pub pxl_file_path: String,
    /// Seconds to sleep between executions
    pub stream_sleep_secs: u64,
    /// Failed executions tolerated before giving up
    pub max_error_count: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            orbservability_url: String::new(),
            pixie_url: DEFAULT_PIXIE_URL.into(),
            vizier_host: DEFAULT_VIZIER_HOST.into(),
            pxl_file_path: DEFAULT_PXL_FILE_PATH.into(),
            stream_sleep_secs: DEFAULT_STREAM_SLEEP_SECS,
            max_error_count: DEFAULT_MAX_ERROR_COUNT,
        }
    }
}

impl ObserverConfig {
    /// Check that both endpoints are present.
    pub fn validate(&self) -> Result<()> {
        if self.orbservability_url.trim().is_empty() {
            return Err(ObserverError::ConfigError(
                "ORBSERVABILITY_URL environment variable is missing".into(),
            ));
        }
        if self.pixie_url.trim().is_empty() {
            return Err(ObserverError::ConfigError("PIXIE_URL must not be empty".into()));
        }
        Ok(())
    }

    pub fn stream_sleep(&self) -> Duration {
        Duration::from_secs(self.stream_sleep_secs)
    }

    /// gRPC endpoint of the event gateway
    pub fn gateway_endpoint(&self) -> String {
        endpoint_uri(&self.orbservability_url)
    }

    /// gRPC endpoint of the Pixie API
    pub fn pixie_endpoint(&self) -> String {
        endpoint_uri(&self.pixie_url)
    }

    /// Read the PxL script from `pxl_file_path`.
    pub fn load_script(&self) -> Result<String> {
        load_script(&self.pxl_file_path)
    }
}

/// Prefix bare `host:port` addresses with `http://` so tonic accepts them.
pub fn endpoint_uri(addr: &str) -> String {
    let addr = addr.trim();
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// Read a PxL script from disk, rejecting empty files
pub fn load_script(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let script = std::fs::read_to_string(path).map_err(|source| ObserverError::ScriptLoad {
        path: path.display().to_string(),
        source,
    })?;

    if script.trim().is_empty() {
        return Err(ObserverError::ConfigError(format!(
            "PxL script {} is empty",
            path.display()
        )));
    }

    Ok(script)
}
