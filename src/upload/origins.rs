//! Origin allowlist normalization
//!
//! The platform expects bare hosts (`example.com`, `*.example.com`,
//! `localhost:3000`). Operators tend to paste full URLs, so values are
//! reduced to their host part before they are submitted.

use reqwest::Url;

/// Normalize a single origin value
///
/// Returns `None` for values that are empty after normalization.
///
/// ```
/// use stream_ingestr::upload::origins::normalize_origin;
///
/// assert_eq!(
///     normalize_origin("https://App.Example.com/path?q=1").as_deref(),
///     Some("app.example.com")
/// );
/// assert_eq!(normalize_origin("  "), None);
/// ```
pub fn normalize_origin(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || (value.starts_with('/') && !value.starts_with("//")) {
        return None;
    }

    let absolute = if value.starts_with("//") {
        format!("https:{}", value)
    } else if value.contains("://") {
        value.to_string()
    } else {
        format!("https://{}", value)
    };

    let url = Url::parse(&absolute).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    // port() is None for the scheme's default port
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Normalize an origin list, removing empties and duplicates
///
/// The first occurrence of each origin keeps its position.
pub fn normalize_origins<I, S>(origins: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for origin in origins {
        if let Some(host) = normalize_origin(origin.as_ref()) {
            if !normalized.contains(&host) {
                normalized.push(host);
            }
        }
    }
    normalized
}
