//! Relay connections and the pool that fans work out across them.

mod connection;
mod pool;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::event::{Event, ARCHIVE_KIND};

pub use connection::{Ack, ConnectionState};
pub(crate) use connection::RelayConnection;
pub use pool::{PublishOutcome, RelayPool};

/// Timeouts and transport settings applied to every relay connection.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Bound on TCP connect plus WebSocket handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for an `OK` after sending an event.
    pub publish_timeout: Duration,
    /// Total time a query collects results across all relays.
    pub query_window: Duration,
    /// Optional SOCKS5 proxy (host:port), e.g. a local Tor daemon.
    pub socks_proxy: Option<String>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            query_window: Duration::from_secs(3),
            socks_proxy: None,
        }
    }
}

/// Selects archive events of one kind that reference one source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub kind: u32,
    pub source_url: String,
}

impl QueryFilter {
    /// Filter for every archive of `source_url`.
    pub fn archives_of(source_url: &str) -> Self {
        Self {
            kind: ARCHIVE_KIND,
            source_url: source_url.to_string(),
        }
    }

    /// NIP-01 filter object sent in `REQ`.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "kinds": [self.kind],
            "#r": [self.source_url],
        })
    }

    /// Whether `ev` is something this filter asked for.
    pub fn matches(&self, ev: &Event) -> bool {
        ev.kind == self.kind
            && ev
                .tags
                .iter()
                .any(|t| t.name() == Some("r") && t.value() == Some(self.source_url.as_str()))
    }

    /// Subscription id prefix derived from the source URL.
    pub(crate) fn subscription_prefix(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.source_url.as_bytes());
        let hash = hex::encode(hasher.finalize());
        format!("archive-{}", &hash[..8])
    }
}
