pub mod capture;
pub mod decoder;
pub mod error;
pub mod page;
pub mod session;
pub mod still;
pub mod surface;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

use crate::capture::FoundDevice;
pub use crate::error::{Result, ScanError};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment variable prefix, e.g. `QRSCAN_SCANNER__POLL_INTERVAL_MS=2000`
const ENV_PREFIX: &str = "QRSCAN";

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub scanner: ScannerConfig,
    pub navigation: NavigationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Empty path means auto-detect
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Gap between two frame samples
    pub poll_interval_ms: u64,
    /// Largest width or height accepted for the off-screen surface
    pub max_surface_dimension: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Route opened after a successful scan
    pub destination: String,
    /// Query parameter carrying the decoded payload
    pub query_param: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: FoundDevice::new(String::new(), PixelFormat::Mjpeg),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_surface_dimension: 7680,
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            destination: "/miclase".into(),
            query_param: "datosQR".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            scanner: ScannerConfig::default(),
            navigation: NavigationConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `QRSCAN_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ScanError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scanner.poll_interval_ms == 0 {
            return Err(ScanError::Config(
                "scanner.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.scanner.max_surface_dimension == 0 {
            return Err(ScanError::Config(
                "scanner.max_surface_dimension must be greater than zero".into(),
            ));
        }
        if self.navigation.destination.is_empty() {
            return Err(ScanError::Config("navigation.destination is empty".into()));
        }
        if self.navigation.query_param.is_empty() {
            return Err(ScanError::Config("navigation.query_param is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scanner.poll_interval_ms, 1000);
        assert_eq!(config.navigation.destination, "/miclase");
        assert_eq!(config.navigation.query_param, "datosQR");
        assert!(config.camera.device.path.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[scanner]\npoll_interval_ms = 2000\n\n[camera]\nwidth = 1280\nheight = 720"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.scanner.poll_interval_ms, 2000);
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.height, 720);
        // untouched sections keep their defaults
        assert_eq!(config.navigation.query_param, "datosQR");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scanner]\npoll_interval_ms = 0").unwrap();

        let result = Config::load(Some(file.path()));
        assert!(matches!(result, Err(ScanError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = Config::load(Some(Path::new("/nonexistent/qrscan.toml")));
        assert!(matches!(result, Err(ScanError::Config(_))));
    }
}
