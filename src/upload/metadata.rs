//! `Upload-Metadata` header encoding
//!
//! The resumable protocol carries metadata as a comma-separated list of
//! `key base64(value)` pairs. A key without a value is a flag.
//!
//! # Example
//!
//! ```
//! use stream_ingestr::upload::metadata::UploadMetadata;
//!
//! let header = UploadMetadata::new()
//!     .pair("name", "clip.mp4")
//!     .flag("requiresignedurls")
//!     .encode();
//! assert_eq!(header, "name Y2xpcC5tcDQ=,requiresignedurls");
//! ```

use crate::registry::CollectionSettings;
use crate::upload::UploadIntent;
use base64::{engine::general_purpose::STANDARD, Engine};

pub const KEY_NAME: &str = "name";
pub const KEY_FILETYPE: &str = "filetype";
pub const KEY_MAX_DURATION: &str = "maxDurationSeconds";
pub const KEY_REQUIRE_SIGNED_URLS: &str = "requiresignedurls";

/// Ordered `Upload-Metadata` entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    entries: Vec<(String, Option<String>)>,
}

impl UploadMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for a resumable session: filename, content type, duration
    /// cap and the signed-URL flag
    pub fn for_intent(intent: &UploadIntent, settings: &CollectionSettings) -> Self {
        let metadata = Self::new()
            .pair(KEY_NAME, &intent.filename)
            .pair(KEY_FILETYPE, &intent.mime_type)
            .pair(KEY_MAX_DURATION, settings.max_duration_seconds.to_string());

        if settings.require_signed_urls {
            metadata.flag(KEY_REQUIRE_SIGNED_URLS)
        } else {
            metadata
        }
    }

    /// Append a key with a value; empty values are skipped
    #[must_use]
    pub fn pair(mut self, key: &str, value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        if !value.is_empty() {
            self.entries
                .push((key.to_string(), Some(value.to_string())));
        }
        self
    }

    /// Append a key without a value
    #[must_use]
    pub fn flag(mut self, key: &str) -> Self {
        self.entries.push((key.to_string(), None));
        self
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    /// Render the header value
    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!("{} {}", key, STANDARD.encode(value.as_bytes())),
                None => key.clone(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a header value; entries with invalid base64 or UTF-8 are dropped
    pub fn parse(header: &str) -> Self {
        let entries = header
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let mut parts = entry.splitn(2, ' ');
                let key = parts.next()?.to_string();
                match parts.next() {
                    None => Some((key, None)),
                    Some(encoded) => {
                        let decoded = STANDARD.decode(encoded.trim()).ok()?;
                        let value = String::from_utf8(decoded).ok()?;
                        Some((key, Some(value)))
                    }
                }
            })
            .collect();
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;

    #[test]
    fn test_encode_pairs_and_flags() {
        let metadata = UploadMetadata::new()
            .pair("name", "a")
            .pair("filetype", "video/mp4")
            .flag("requiresignedurls");
        assert_eq!(
            metadata.encode(),
            "name YQ==,filetype dmlkZW8vbXA0,requiresignedurls"
        );
    }

    #[test]
    fn test_empty_values_skipped() {
        let metadata = UploadMetadata::new().pair("name", "").pair("filetype", "x");
        assert_eq!(metadata.encode(), "filetype eA==");
    }

    #[test]
    fn test_for_intent() {
        let mut collection = CollectionConfig::new("videos");
        collection.max_duration_seconds = 600;
        collection.require_signed_urls = true;
        let settings = CollectionSettings::from(&collection);
        let intent = UploadIntent::new("videos", "talk, final.mov", "video/quicktime", 10, 1);

        let parsed = UploadMetadata::parse(&UploadMetadata::for_intent(&intent, &settings).encode());
        assert_eq!(parsed.get(KEY_NAME), Some(Some("talk, final.mov")));
        assert_eq!(parsed.get(KEY_FILETYPE), Some(Some("video/quicktime")));
        assert_eq!(parsed.get(KEY_MAX_DURATION), Some(Some("600")));
        assert_eq!(parsed.get(KEY_REQUIRE_SIGNED_URLS), Some(None));
    }

    #[test]
    fn test_for_intent_without_signed_urls() {
        let settings = CollectionSettings::from(&CollectionConfig::new("videos"));
        let intent = UploadIntent::new("videos", "a.mp4", "video/mp4", 10, 1);
        let metadata = UploadMetadata::for_intent(&intent, &settings);
        assert_eq!(metadata.get(KEY_REQUIRE_SIGNED_URLS), None);
    }

    #[test]
    fn test_parse_drops_garbage() {
        let parsed = UploadMetadata::parse("name !!!notbase64,flag,,  ");
        assert_eq!(parsed.get("name"), None);
        assert_eq!(parsed.get("flag"), Some(None));
    }
}
