//! Handles application configuration loading and management.
//!
//! This module defines the `AppConfig` struct which holds configuration
//! parameters like the region layout and playback timing knobs. It provides
//! the `load_config` function to read these settings from an INI file.

use configparser::ini::Ini;
use log::{debug, error, info};

use super::errors::ConfigError;

/// Holds the application's configuration parameters.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Region ids this screen renders, in layout order.
    pub regions: Vec<i64>,
    /// Whether regions should drive the progress bar/box.
    pub show_progress: bool,
    /// Fade transition time in milliseconds, padded around slide durations.
    pub fade_ms: u64,
    /// Delay after the `ready` event before buffered channel pushes are
    /// replayed, giving the screen template time to load.
    pub screen_settle_ms: u64,
    /// URL probed (HEAD) before video playback to detect offline state.
    /// When unset, the client assumes it is online.
    pub probe_url: Option<String>,
    /// Timeout in seconds for feed fetches.
    pub feed_timeout_secs: u64,
}

/// Loads application configuration from the specified INI file path.
///
/// Reads settings from the `[settings]` section of the INI file. Only
/// `regions` is required; everything else has defaults.
///
/// # Errors
/// Returns `ConfigError` if the file cannot be read, is malformed,
/// or if essential keys are missing or unparsable.
#[must_use = "loading configuration can fail, the Result must be handled"]
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    info!("Attempting to load config from: {}", path);
    let mut config_parser = Ini::new();

    config_parser.load(path).map_err(|e| {
        error!("Error loading config file '{}': {}", path, e);
        if e.to_lowercase().contains("os error 2") || e.to_lowercase().contains("failed to read") {
            ConfigError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e))
        } else {
            ConfigError::Parse(e)
        }
    })?;

    let get_key = |key_name: &str| {
        config_parser.get("settings", key_name).ok_or_else(|| {
            error!(
                "Missing configuration key '{}' in section '[settings]' of file '{}'",
                key_name, path
            );
            ConfigError::MissingKey(key_name.to_string())
        })
    };

    let regions_raw = get_key("regions")?;
    let regions = parse_region_list(&regions_raw)?;
    debug!("Loaded config value for key 'regions': {:?}", regions);

    let show_progress = config_parser
        .getboolcoerce("settings", "show_progress")
        .map_err(|e| ConfigError::InvalidValue { key: "show_progress".into(), message: e })?
        .unwrap_or(true);

    let fade_ms = parse_optional_u64(&config_parser, "fade_ms")?.unwrap_or(1000);
    let screen_settle_ms = parse_optional_u64(&config_parser, "screen_settle_ms")?.unwrap_or(5000);
    let feed_timeout_secs = parse_optional_u64(&config_parser, "feed_timeout_secs")?.unwrap_or(10);
    let probe_url = config_parser.get("settings", "probe_url").filter(|s| !s.is_empty());

    let app_config = AppConfig {
        regions,
        show_progress,
        fade_ms,
        screen_settle_ms,
        probe_url,
        feed_timeout_secs,
    };
    info!("Configuration loaded successfully from {}: {:?}", path, app_config);
    Ok(app_config)
}

/// Parses the comma-separated region id list, e.g. `regions = 1,2`.
fn parse_region_list(raw: &str) -> Result<Vec<i64>, ConfigError> {
    let regions = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                key: "regions".to_string(),
                message: format!("'{}': {}", part, e),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if regions.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "regions".to_string(),
            message: "at least one region id is required".to_string(),
        });
    }
    Ok(regions)
}

fn parse_optional_u64(parser: &Ini, key: &str) -> Result<Option<u64>, ConfigError> {
    match parser.get("settings", key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue { key: key.to_string(), message: e.to_string() }),
        None => Ok(None),
    }
}
