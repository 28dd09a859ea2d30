//! Defines the custom error types used throughout the `infoscreen_rs` application.
//!
//! This module centralizes error handling, providing specific error enums for
//! different categories of issues (configuration, media playback), and a
//! top-level `AppError` to wrap them. Each error type implements `Debug`,
//! `Display`, and `std::error::Error`, and provides `From` implementations
//! for common underlying error types.

use std::error::Error as StdError;
use std::fmt;

// --- ConfigError ---
/// Errors related to application configuration loading and parsing.
#[must_use = "a configuration error should be handled or propagated"]
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O error occurred while trying to read the configuration file.
    Io(std::io::Error),
    /// An error occurred while parsing the configuration file content.
    Parse(String),
    /// A required configuration key was missing from the file.
    MissingKey(String),
    /// A configuration value was present but could not be interpreted.
    InvalidValue { key: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Configuration parse error: {}", e),
            ConfigError::MissingKey(key) => write!(f, "Missing configuration key: '{}'", key),
            ConfigError::InvalidValue { key, message } => {
                write!(f, "Invalid value for configuration key '{}': {}", key, message)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

// --- MediaError ---
/// Errors related to slide media playback (feeds, video surfaces, downloads).
#[must_use = "a media error should be handled or propagated"]
#[derive(Debug)]
pub enum MediaError {
    /// An error occurred while downloading media content or a feed.
    Download(reqwest::Error),
    /// A feed was fetched but its content could not be parsed.
    Feed(String),
    /// A media source URL could not be parsed.
    UrlParse(url::ParseError),
    /// The connectivity probe failed; the client is considered offline.
    Offline,
    /// The video surface reported a playback error.
    Surface(String),
    /// A slide did not carry the media or options its type requires.
    MissingSource(String),
    /// A generic media-related error.
    Generic(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Download(e) => write!(f, "Media download error: {}", e),
            MediaError::Feed(s) => write!(f, "Feed parse error: {}", s),
            MediaError::UrlParse(e) => write!(f, "Media URL parse error: {}", e),
            MediaError::Offline => write!(f, "No network connectivity"),
            MediaError::Surface(s) => write!(f, "Video surface error: {}", s),
            MediaError::MissingSource(s) => write!(f, "Slide media missing: {}", s),
            MediaError::Generic(s) => write!(f, "Media error: {}", s),
        }
    }
}

impl StdError for MediaError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            MediaError::Download(e) => Some(e),
            MediaError::UrlParse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for MediaError {
    fn from(err: reqwest::Error) -> Self {
        MediaError::Download(err)
    }
}

impl From<url::ParseError> for MediaError {
    fn from(err: url::ParseError) -> Self {
        MediaError::UrlParse(err)
    }
}

// --- AppError (Top-level error enum) ---
/// A top-level error type that can encompass any error within the application.
#[must_use = "an application error should be handled or propagated"]
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Media(MediaError),
    Generic(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "Application Configuration Error: {}", e),
            AppError::Media(e) => write!(f, "Application Media Error: {}", e),
            AppError::Generic(s) => write!(f, "Application Error: {}", s),
        }
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::Media(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}
impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        AppError::Media(err)
    }
}
