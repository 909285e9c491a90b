//! Nostr event model for archive records.

use serde::{Deserialize, Serialize};

/// Kind number reserved for archived documents.
///
/// Every archive published by this crate carries this kind, and queries only
/// ask relays for it. Changing the value orphans every archive published
/// under the old one.
pub const ARCHIVE_KIND: u32 = 9802;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element names the tag and the rest hold data. Archive records
/// carry a single `r` tag pointing at the archived document, e.g.
/// `Tag(vec!["r".into(), "https://example.com/post".into()])`. Unknown tags
/// received from relays are kept verbatim so ids recompute correctly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build the `r` tag that links a record to its source URL.
    pub fn reference(url: &str) -> Self {
        Tag(vec!["r".into(), url.into()])
    }

    /// Tag name, e.g. `r`.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First value after the name.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Event fields before an id and signature have been attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Author public key (x-only, hex).
    pub pubkey: String,
    /// Kind number, [`ARCHIVE_KIND`] for archives.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Tags, including the `r` source URL tag.
    pub tags: Vec<Tag>,
    /// Archived document markup.
    pub content: String,
}

/// Signed Nostr event as published to and received from relays.
///
/// ```json
/// {
///   "id": "4f1c...",
///   "pubkey": "79be...",
///   "kind": 9802,
///   "created_at": 1700000000,
///   "tags": [["r", "https://example.com/post"]],
///   "content": "<p>archived body</p>",
///   "sig": "e8a1..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 over the canonical serialization).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Tags such as `r` (source URL).
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the id.
    pub sig: String,
}

impl Event {
    /// URL named by the first `r` tag, if any.
    pub fn source_url(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.name() == Some("r"))
            .and_then(Tag::value)
    }
}
