//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.
//! The resulting [`Config`] is built once at startup and handed to every
//! component that needs it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::Datelike;
use ouvidoria_core::extraction::{DEFAULT_OCR_LANGUAGES, DEFAULT_WHISPER_MODEL};
use ouvidoria_core::media::{DEFAULT_AUDIO_MIMES, DEFAULT_IMAGE_MIMES, DEFAULT_VIDEO_MIMES};
use ouvidoria_core::{ExtractionSettings, MediaPolicy, ProtocolError, ProtocolSeries};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: IpAddr,
    /// PostgreSQL connection string; `None` selects the in-memory store
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Database connection pool minimum connections (default: 2)
    pub database_min_connections: u32,
    /// Root directory for attachment files (default: uploads)
    pub uploads_dir: PathBuf,
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in MB (default: 120)
    pub body_limit_mb: usize,
    /// Request timeout in seconds (default: 60)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Accepted MIME types and per-file size ceiling
    pub media: MediaPolicy,
    /// Protocol prefix (default: DF)
    pub protocol_prefix: String,
    /// Protocol year (default: current UTC year)
    pub protocol_year: i32,
    /// Extraction tools and limits
    pub extraction: ExtractionSettings,
    /// Number of extraction workers (default: 2)
    pub extraction_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            database_url: None,
            database_max_connections: 20,
            database_min_connections: 2,
            uploads_dir: PathBuf::from("uploads"),
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_mb: 120,
            timeout_secs: 60,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            media: MediaPolicy::default(),
            protocol_prefix: "DF".to_string(),
            protocol_year: chrono::Utc::now().year(),
            extraction: ExtractionSettings::default(),
            extraction_workers: 2,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .and_then(|h| h.trim().parse().ok())
            .unwrap_or(defaults.host);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|origins| split_list(&origins))
            .filter(|origins| !origins.is_empty());

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let max_file_size_mb: usize = env_or("MAX_FILE_SIZE_MB", 50);
        let media = MediaPolicy {
            audio_mimes: env_list("ALLOWED_AUDIO_MIMES", DEFAULT_AUDIO_MIMES),
            image_mimes: env_list("ALLOWED_IMAGE_MIMES", DEFAULT_IMAGE_MIMES),
            video_mimes: env_list("ALLOWED_VIDEO_MIMES", DEFAULT_VIDEO_MIMES),
            max_file_size: max_file_size_mb * 1024 * 1024,
        };

        let extraction = ExtractionSettings {
            tesseract_bin: env_or("TESSERACT_BIN", "tesseract".to_string()),
            whisper_bin: env_or("WHISPER_BIN", "whisper".to_string()),
            whisper_model: env_or("WHISPER_MODEL", DEFAULT_WHISPER_MODEL.to_string()),
            ffmpeg_bin: env_or("FFMPEG_BIN", "ffmpeg".to_string()),
            languages: env_or("OCR_LANGUAGES", DEFAULT_OCR_LANGUAGES.to_string()),
            tool_timeout: Duration::from_secs(env_or("EXTRACTION_TIMEOUT_SECS", 300)),
            ..defaults.extraction.clone()
        };

        Self {
            port: env_or("PORT", defaults.port),
            host,
            database_url,
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            database_min_connections: env_or(
                "DATABASE_MIN_CONNECTIONS",
                defaults.database_min_connections,
            ),
            uploads_dir: env_or("UPLOADS_DIR", defaults.uploads_dir.clone()),
            allowed_origins,
            body_limit_mb: env_or("BODY_LIMIT_MB", defaults.body_limit_mb),
            timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_or("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            media,
            protocol_prefix: env_or("PROTOCOL_PREFIX", defaults.protocol_prefix.clone()),
            protocol_year: env_or("PROTOCOL_YEAR", defaults.protocol_year),
            extraction,
            extraction_workers: env_or("EXTRACTION_WORKERS", defaults.extraction_workers).max(1),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The protocol series new submissions are numbered in.
    pub fn protocol_series(&self) -> Result<ProtocolSeries, ProtocolError> {
        ProtocolSeries::new(&self.protocol_prefix, self.protocol_year)
    }

    pub fn max_file_size_mb(&self) -> usize {
        self.media.max_file_size / (1024 * 1024)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| split_list(&v))
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert!(config.database_url.is_none());
        assert!(!config.rate_limit_enabled);
        assert_eq!(config.max_file_size_mb(), 50);
        assert_eq!(config.extraction.languages, "por+eng");
        assert_eq!(config.extraction.whisper_model, "base");
    }

    #[test]
    fn test_socket_addr() {
        let config = Config {
            host: "0.0.0.0".parse().unwrap(),
            port: 9000,
            ..Config::default()
        };
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9000");
    }

    #[test]
    fn test_protocol_series() {
        let config = Config {
            protocol_prefix: "df".to_string(),
            protocol_year: 2026,
            ..Config::default()
        };
        assert_eq!(config.protocol_series().unwrap().series_prefix(), "DF-2026-");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" image/png, ,image/jpeg "),
            vec!["image/png".to_string(), "image/jpeg".to_string()]
        );
        assert!(split_list(" , ").is_empty());
    }
}
