//! Remote video identifiers
//!
//! The hosting platform addresses every video by a 32 character lowercase
//! hex `uid`. Resumable sessions only expose it as a path segment of the
//! resource URL returned in the `Location` header.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a remote video identifier
pub const STREAM_ID_LEN: usize = 32;

const RELATIVE_BASE: &str = "http://localhost/";

/// Identifier parse error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream id '{0}': expected 32 lowercase hex characters")]
pub struct InvalidStreamId(pub String);

/// Remote video identifier (32 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    /// Parse and validate an identifier
    pub fn parse(value: &str) -> Result<Self, InvalidStreamId> {
        if is_stream_id(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidStreamId(value.to_string()))
        }
    }

    /// Extract the identifier from a resumable resource URL.
    ///
    /// Accepts absolute (`https://host/tus/{uid}?tusv2=true`) and relative
    /// (`/tus/{uid}`) locations. The last path segment that is a well-formed
    /// identifier wins. Returns `None` when no segment matches.
    ///
    /// ```
    /// use stream_ingestr::stream::StreamId;
    ///
    /// let id = StreamId::from_location(
    ///     "https://upload.videodelivery.net/tus/0123456789abcdef0123456789abcdef?tusv2=true",
    /// )
    /// .unwrap();
    /// assert_eq!(id.as_str(), "0123456789abcdef0123456789abcdef");
    /// ```
    pub fn from_location(location: &str) -> Option<Self> {
        // Relative locations only need a base to be split into segments
        let url = Url::parse(RELATIVE_BASE).ok()?.join(location).ok()?;
        Self::from_url(&url)
    }

    /// Extract the identifier from the path of a resolved resource URL
    pub fn from_url(url: &Url) -> Option<Self> {
        url.path_segments()?
            .rev()
            .find(|segment| is_stream_id(segment))
            .map(|segment| Self(segment.to_string()))
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_stream_id(value: &str) -> bool {
    value.len() == STREAM_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamId {
    type Err = InvalidStreamId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StreamId {
    type Error = InvalidStreamId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_stream_id(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidStreamId(value))
        }
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
