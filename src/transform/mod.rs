//! Transforms turn an accepted content event into a deliverable file.
//!
//! A transform is pure given the event and a snapshot of the reference
//! store: it performs read-only lookups and no other I/O. Converting the
//! same event against the same snapshot yields byte-equal output.

pub mod ravenpack;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::content::Event;

pub use ravenpack::Ravenpack;

/// Errors that can occur while converting an event.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("document build failed: {0}")]
    Document(#[from] quick_xml::Error),

    #[error("transform failed: {0}")]
    Failed(String),
}

/// A deliverable file produced by a transform.
///
/// Checksum and size are derived from the data at construction and cannot
/// drift from it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    filename: String,
    data: Vec<u8>,
    checksum: String,
    size: usize,
}

impl Artifact {
    pub fn new(filename: String, data: Vec<u8>) -> Self {
        let checksum = hex::encode(Sha256::digest(&data));
        let size = data.len();
        Self {
            filename,
            data,
            checksum,
            size,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Hex SHA-256 of the data.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Converts events into artifacts. One implementation per downstream
/// partner format; the active one is selected by configuration.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn convert(&self, event: &Event) -> Result<Artifact, TransformError>;
}

/// The coarse classification a raw content type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Story,
    PressRelease,
}

impl ContentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Story => "story",
            ContentClass::PressRelease => "press-release",
        }
    }

    /// Map a raw content type to its class. Case-insensitive; types
    /// outside the mapping are unwanted and yield `None`.
    pub fn from_type(content_type: &str) -> Option<Self> {
        match content_type.to_lowercase().as_str() {
            "story" => Some(ContentClass::Story),
            "abnewswire"
            | "accesswire_pr"
            | "acnnewswire_story"
            | "businesswire_story"
            | "bz_pr_thomson_reuters"
            | "comtex_story"
            | "globenewswire_story"
            | "marketwire_story"
            | "newswire_pressreleases"
            | "newswire_story"
            | "pr_story"
            | "prweb_story"
            | "webwire_story"
            | "wired_release" => Some(ContentClass::PressRelease),
            _ => None,
        }
    }
}

// Matches double-quote-delimited relative stock anchors, e.g. "/stock/AAPL".
static BODY_TICKER_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(/stock/\S*)""#).unwrap());

/// Rewrite relative stock anchors in a body to absolute URLs under the
/// given prefix. The prefix must not have a trailing slash. Quotes are
/// preserved, and output already carrying absolute URLs is left unchanged.
pub fn rewrite_body_ticker_paths(url_prefix: &str, body: &str) -> String {
    let replacement = format!("\"{url_prefix}${{1}}\"");
    BODY_TICKER_PATH.replace_all(body, replacement.as_str()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_class_mapping() {
        assert_eq!(ContentClass::from_type("story"), Some(ContentClass::Story));
        assert_eq!(ContentClass::from_type("Story"), Some(ContentClass::Story));
        assert_eq!(
            ContentClass::from_type("globenewswire_story"),
            Some(ContentClass::PressRelease)
        );
        assert_eq!(
            ContentClass::from_type("PR_STORY"),
            Some(ContentClass::PressRelease)
        );
        assert_eq!(ContentClass::from_type("podcast"), None);
        assert_eq!(ContentClass::from_type(""), None);
    }

    #[test]
    fn test_artifact_checksum_and_size_match_data() {
        let artifact = Artifact::new("x.xml".to_string(), b"hello".to_vec());
        assert_eq!(artifact.size(), 5);
        assert_eq!(artifact.checksum(), hex::encode(Sha256::digest(b"hello")));

        let empty = Artifact::new("y.xml".to_string(), Vec::new());
        assert_eq!(empty.size(), 0);
        assert_eq!(
            empty.checksum(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_body_rewrite() {
        let body = r#"<a href="/stock/AAPL">AAPL</a>"#;
        let rewritten = rewrite_body_ticker_paths("https://benzinga.com", body);
        assert_eq!(rewritten, r#"<a href="https://benzinga.com/stock/AAPL">AAPL</a>"#);
    }

    #[test]
    fn test_body_rewrite_is_idempotent() {
        let body = r#"see "/stock/f" and <a href="/stock/TSLA?x=1">TSLA</a>"#;
        let once = rewrite_body_ticker_paths("https://benzinga.com", body);
        let twice = rewrite_body_ticker_paths("https://benzinga.com", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_body_rewrite_leaves_unquoted_paths_alone() {
        let body = "plain /stock/AAPL mention";
        assert_eq!(rewrite_body_ticker_paths("https://benzinga.com", body), body);
    }
}
