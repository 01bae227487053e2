use crate::services::reconnect::{MAX_RETRIES_LIMIT, MIN_INTERVAL_MS};
use anyhow::{Context, Result};
use std::{env, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// UI server configuration
    pub ui: UiConfig,

    /// Airguard device API configuration
    pub device: DeviceConfig,

    /// Defaults for reconnection monitoring after a WiFi change
    pub reconnect: ReconnectConfig,

    /// Firmware release feed configuration
    pub firmware: FirmwareConfig,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    pub max_retries: u32,
    pub interval_ms: u64,
}

#[derive(Clone, Debug)]
pub struct FirmwareConfig {
    pub releases_url: String,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// and validates all configuration from environment variables. Subsequent
    /// calls return the cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. This is intentional as the
    /// application cannot function without valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load(&|key| env::var(key).ok())
                .expect("failed to load application configuration")
        })
    }

    /// Load all configuration sections through `lookup`
    ///
    /// `get()` passes the process environment. Anything that maps a variable
    /// name to an optional value works, which keeps loading testable.
    pub fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let ui = UiConfig::load(lookup)?;
        let device = DeviceConfig::load(lookup)?;
        let reconnect = ReconnectConfig::load(lookup)?;
        let firmware = FirmwareConfig::load(lookup);

        Ok(Self {
            ui,
            device,
            reconnect,
            firmware,
        })
    }
}

impl UiConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let port = lookup("UI_PORT")
            .unwrap_or_else(|| "1977".to_string())
            .parse::<u16>()
            .context("failed to parse UI_PORT: invalid format")?;

        Ok(Self { port })
    }
}

impl DeviceConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("DEVICE_URL")
            .unwrap_or_else(|| "http://192.168.4.1".to_string())
            .trim_end_matches('/')
            .to_string();

        anyhow::ensure!(
            url.starts_with("http://") || url.starts_with("https://"),
            "failed to parse DEVICE_URL: expected http(s) url, got {url}"
        );

        let timeout_ms = lookup("DEVICE_TIMEOUT_MS")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u64>()
            .context("failed to parse DEVICE_TIMEOUT_MS: invalid format")?;

        Ok(Self {
            url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

impl ReconnectConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let max_retries = lookup("RECONNECT_MAX_RETRIES")
            .unwrap_or_else(|| "10".to_string())
            .parse::<u32>()
            .context("failed to parse RECONNECT_MAX_RETRIES: invalid format")?;

        let interval_ms = lookup("RECONNECT_INTERVAL_MS")
            .unwrap_or_else(|| "1000".to_string())
            .parse::<u64>()
            .context("failed to parse RECONNECT_INTERVAL_MS: invalid format")?;

        anyhow::ensure!(
            (1..=MAX_RETRIES_LIMIT).contains(&max_retries),
            "RECONNECT_MAX_RETRIES must be between 1 and {MAX_RETRIES_LIMIT}"
        );
        anyhow::ensure!(
            interval_ms >= MIN_INTERVAL_MS,
            "RECONNECT_INTERVAL_MS must be at least {MIN_INTERVAL_MS}"
        );

        Ok(Self {
            max_retries,
            interval_ms,
        })
    }
}

impl FirmwareConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let releases_url = lookup("RELEASES_URL").unwrap_or_else(|| {
            "https://api.github.com/repos/gaisasargs/airguard/releases".to_string()
        });

        Self { releases_url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::load(&|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = load_from(&[]).unwrap();

        assert_eq!(config.ui.port, 1977);
        assert_eq!(config.device.url, "http://192.168.4.1");
        assert_eq!(config.device.timeout, Duration::from_millis(3000));
        assert_eq!(config.reconnect.max_retries, 10);
        assert_eq!(config.reconnect.interval_ms, 1000);
    }

    #[test]
    fn device_url_trailing_slash_is_trimmed() {
        let config = load_from(&[("DEVICE_URL", "http://10.0.0.7/")]).unwrap();
        assert_eq!(config.device.url, "http://10.0.0.7");
    }

    #[test]
    fn device_url_without_scheme_is_rejected() {
        let err = load_from(&[("DEVICE_URL", "10.0.0.7")]).unwrap_err();
        assert!(err.to_string().contains("DEVICE_URL"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = load_from(&[("UI_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("UI_PORT"));
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        assert!(load_from(&[("RECONNECT_MAX_RETRIES", "0")]).is_err());
        assert!(load_from(&[("RECONNECT_INTERVAL_MS", "0")]).is_err());
    }

    #[test]
    fn reconnect_values_outside_device_limits_are_rejected() {
        let err = load_from(&[("RECONNECT_MAX_RETRIES", "101")]).unwrap_err();
        assert!(err.to_string().contains("RECONNECT_MAX_RETRIES"));

        let err = load_from(&[("RECONNECT_INTERVAL_MS", "249")]).unwrap_err();
        assert!(err.to_string().contains("RECONNECT_INTERVAL_MS"));
    }

    #[test]
    fn reconnect_overrides_are_parsed() {
        let config = load_from(&[
            ("RECONNECT_MAX_RETRIES", "3"),
            ("RECONNECT_INTERVAL_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.reconnect.max_retries, 3);
        assert_eq!(config.reconnect.interval_ms, 250);
    }
}
