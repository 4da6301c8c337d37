//! Runtime configuration, loaded from environment variables (§6).

use std::time::Duration;

use crate::catalog::CatalogSource;
use crate::protocol_constants::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_STREAM_SIZE_BYTES};

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub m3u_source: CatalogSource,
    pub encoder_preference: String,
    pub idle_timeout: Duration,
    pub port: u16,
    pub max_stream_size_bytes: u64,
    pub ffmpeg_binary: String,
}

impl AppConfig {
    /// Builds configuration from environment variables, applying the
    /// defaults documented in §6/§protocol_constants for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if `M3U_SOURCE` is unset, or if a numeric variable
    /// is present but fails to parse.
    pub fn from_env() -> Result<Self, String> {
        let m3u_source = std::env::var("M3U_SOURCE")
            .map_err(|_| "M3U_SOURCE environment variable is required".to_string())?;

        let encoder_preference =
            std::env::var("ENCODER_PREFERENCE").unwrap_or_else(|_| "auto".to_string());

        let idle_timeout_secs = parse_env_or("IDLE_TIMEOUT", DEFAULT_IDLE_TIMEOUT_SECS)?;
        let port = parse_env_or("PORT", 8080u16)?;
        let max_stream_size_bytes =
            parse_env_or("MAX_STREAM_SIZE", DEFAULT_MAX_STREAM_SIZE_BYTES)?;
        let ffmpeg_binary =
            std::env::var("FFMPEG_BINARY").unwrap_or_else(|_| "ffmpeg".to_string());

        Ok(Self {
            m3u_source: CatalogSource::parse(&m3u_source),
            encoder_preference,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            port,
            max_stream_size_bytes,
            ffmpeg_binary,
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| format!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_or_falls_back_to_default_when_unset() {
        std::env::remove_var("MOSAIC_TEST_UNSET_VAR");
        let v: u64 = parse_env_or("MOSAIC_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn parse_env_or_rejects_unparseable_value() {
        std::env::set_var("MOSAIC_TEST_BAD_VAR", "not-a-number");
        let result: Result<u64, String> = parse_env_or("MOSAIC_TEST_BAD_VAR", 1);
        assert!(result.is_err());
        std::env::remove_var("MOSAIC_TEST_BAD_VAR");
    }
}
