//! M3U catalog loading and lookup (component C1).
//!
//! Parses extended M3U playlist text into [`Channel`] records and holds them
//! in memory behind a single read-write lock (the "catalog lock" of §5).
//! Attribute extraction is hand-rolled `key="value"` scanning over the
//! `#EXTINF` line rather than a dedicated playlist-parsing crate, in the
//! same manual-text-extraction style the rest of this codebase uses for
//! other small wire formats.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::protocol_constants::APP_NAME;
use crate::state::Channel;
use crate::utils::now_millis;

/// Source an M3U playlist is fetched from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    Http(String),
    File(std::path::PathBuf),
}

impl CatalogSource {
    /// Parses `M3U_SOURCE` into a source, treating `file://` URIs and bare
    /// paths as local files and everything else as HTTP(S).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if let Some(path) = raw.strip_prefix("file://") {
            Self::File(std::path::PathBuf::from(path))
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Http(raw.to_string())
        } else {
            Self::File(std::path::PathBuf::from(raw))
        }
    }
}

/// Extracts a `key="value"` (or `key=value`) attribute from an `#EXTINF` line.
fn extract_attr(line: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=");
    let start = line.find(&needle)? + needle.len();
    let rest = &line[start..];
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        Some(stripped[..end].to_string())
    } else {
        let end = rest
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(rest.len());
        let val = rest[..end].trim();
        if val.is_empty() {
            None
        } else {
            Some(val.to_string())
        }
    }
}

/// Returns the text following the last top-level comma on an `#EXTINF` line —
/// the display name.
fn extract_display_name(line: &str) -> String {
    line.rsplit_once(',')
        .map(|(_, name)| name.trim().to_string())
        .unwrap_or_default()
}

/// Parses M3U playlist text into channels.
///
/// Malformed individual entries are skipped silently, per §4.1 — one bad
/// `#EXTINF` line must never fail the whole refresh.
fn parse_m3u(text: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if !line.starts_with("#EXTINF:") {
            continue;
        }

        // The stream URL is the next non-comment, non-blank line.
        let Some(stream_url) = lines
            .by_ref()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
        else {
            break;
        };

        let tvg_id = extract_attr(line, "tvg-id");
        let tvg_logo = extract_attr(line, "tvg-logo");
        let tvg_chno = extract_attr(line, "tvg-chno");
        let group_title = extract_attr(line, "group-title");
        let display_name = extract_display_name(line);

        if display_name == APP_NAME {
            // Avoid a feedback loop: never catalog ourselves.
            continue;
        }

        let id = tvg_id.unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

        channels.push(Channel {
            id,
            display_name,
            logo_url: tvg_logo,
            stream_url: stream_url.to_string(),
            group: group_title,
            channel_number: tvg_chno,
        });
    }

    channels
}

/// In-memory channel catalog, guarded by a single read-write lock.
pub struct Catalog {
    source: CatalogSource,
    http: reqwest::Client,
    channels: RwLock<Vec<Channel>>,
    last_loaded_at_ms: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl Catalog {
    #[must_use]
    pub fn new(source: CatalogSource, http: reqwest::Client) -> Self {
        Self {
            source,
            http,
            channels: RwLock::new(Vec::new()),
            last_loaded_at_ms: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    async fn fetch_text(&self) -> Result<String, AppError> {
        match &self.source {
            CatalogSource::Http(url) => self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| AppError::CatalogUnavailable(e.to_string()))?
                .error_for_status()
                .map_err(|e| AppError::CatalogUnavailable(e.to_string()))?
                .text()
                .await
                .map_err(|e| AppError::CatalogUnavailable(e.to_string())),
            CatalogSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| AppError::CatalogUnavailable(e.to_string())),
        }
    }

    /// Fetches and parses the playlist, replacing the catalog atomically
    /// under the catalog lock. On transport failure the prior catalog is
    /// left untouched, `last_error` is recorded, and the error is returned
    /// to the caller.
    pub async fn load(&self) -> Result<(), AppError> {
        let text = match self.fetch_text().await {
            Ok(text) => text,
            Err(e) => {
                *self.last_error.write() = Some(e.to_string());
                return Err(e);
            }
        };

        let parsed = parse_m3u(&text);
        *self.channels.write() = parsed;
        self.last_loaded_at_ms.store(now_millis(), Ordering::Relaxed);
        *self.last_error.write() = None;
        Ok(())
    }

    /// Returns a snapshot of the current catalog.
    #[must_use]
    pub fn list(&self) -> Vec<Channel> {
        self.channels.read().clone()
    }

    /// Resolves a channel id, or signals **not-found**.
    pub fn resolve(&self, id: &str) -> Result<Channel, AppError> {
        self.channels
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    #[must_use]
    pub fn last_loaded_at_ms(&self) -> u64 {
        self.last_loaded_at_ms.load(Ordering::Relaxed)
    }

    /// The most recent `load()` failure, cleared on the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "#EXTM3U\n",
        "#EXTINF:-1 tvg-id=\"ch1\" tvg-name=\"Channel One\" tvg-logo=\"http://x/logo.png\" ",
        "tvg-chno=\"1\" group-title=\"News\",Channel One\n",
        "http://example.com/ch1.m3u8\n",
        "#EXTINF:-1,Mosaic Cast\n",
        "http://example.com/self.m3u8\n",
        "#EXTINF:-1,No Id Channel\n",
        "http://example.com/noid.m3u8\n",
        "#EXTINF:-1 tvg-id=\"ch-bad\"\n",
    );

    #[test]
    fn parses_attributes_and_display_name() {
        let channels = parse_m3u(SAMPLE);
        let ch1 = channels.iter().find(|c| c.id == "ch1").unwrap();
        assert_eq!(ch1.display_name, "Channel One");
        assert_eq!(ch1.logo_url.as_deref(), Some("http://x/logo.png"));
        assert_eq!(ch1.channel_number.as_deref(), Some("1"));
        assert_eq!(ch1.group.as_deref(), Some("News"));
        assert_eq!(ch1.stream_url, "http://example.com/ch1.m3u8");
    }

    #[test]
    fn filters_out_self_referential_entry() {
        let channels = parse_m3u(SAMPLE);
        assert!(!channels.iter().any(|c| c.display_name == APP_NAME));
    }

    #[test]
    fn generates_id_when_tvg_id_absent() {
        let channels = parse_m3u(SAMPLE);
        let noid = channels
            .iter()
            .find(|c| c.display_name == "No Id Channel")
            .unwrap();
        assert!(noid.id.starts_with("gen-"));
    }

    #[test]
    fn skips_entry_with_no_following_url() {
        let channels = parse_m3u(SAMPLE);
        assert!(!channels.iter().any(|c| c.id == "ch-bad"));
    }

    #[test]
    fn catalog_source_parses_file_scheme() {
        assert!(matches!(
            CatalogSource::parse("file:///tmp/x.m3u"),
            CatalogSource::File(_)
        ));
        assert!(matches!(
            CatalogSource::parse("/tmp/x.m3u"),
            CatalogSource::File(_)
        ));
        assert!(matches!(
            CatalogSource::parse("https://example.com/x.m3u"),
            CatalogSource::Http(_)
        ));
    }

    #[tokio::test]
    async fn resolve_unknown_id_is_not_found() {
        let catalog = Catalog::new(
            CatalogSource::File("/nonexistent".into()),
            reqwest::Client::new(),
        );
        assert!(matches!(
            catalog.resolve("missing"),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_load_records_last_error_and_keeps_prior_catalog() {
        let catalog = Catalog::new(
            CatalogSource::File("/nonexistent/does-not-exist.m3u".into()),
            reqwest::Client::new(),
        );
        assert!(catalog.last_error().is_none());
        assert!(catalog.load().await.is_err());
        assert!(catalog.last_error().is_some());
        assert!(catalog.list().is_empty());
    }

    #[tokio::test]
    async fn successful_load_clears_last_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), SAMPLE).unwrap();
        let catalog = Catalog::new(
            CatalogSource::File(file.path().to_path_buf()),
            reqwest::Client::new(),
        );
        catalog.load().await.unwrap();
        assert!(catalog.last_error().is_none());
        assert!(!catalog.list().is_empty());
    }
}
