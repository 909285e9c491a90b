//! Publish signed archives of web documents to Nostr relays and list the
//! archives other clients have published for a URL.
//!
//! Archives are kind [`ARCHIVE_KIND`] events whose `r` tag names the source
//! URL and whose content is the archived markup. Publishing succeeds once any
//! relay accepts; listing merges whatever every relay returns within the
//! query window into one newest-first list.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use chronicl::{identity::Keys, relay::RelayOptions, AggregateOptions};
//!
//! let relays = vec!["wss://nos.lol".to_string()];
//! let pool = chronicl::initialize(&relays, RelayOptions::default()).await?;
//! let keys = Keys::generate();
//! chronicl::archive(&pool, &keys, "https://example.com/post", "<p>hi</p>").await?;
//! let all = chronicl::list_archives(&pool, "https://example.com/post", &AggregateOptions::default()).await;
//! println!("{} archive(s)", all.len());
//! # Ok(()) }
//! ```

pub mod aggregate;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod identity;
pub mod relay;
pub mod session;

use std::time::{SystemTime, UNIX_EPOCH};

pub use aggregate::{AggregateOptions, ArchiveEntry};
pub use event::{Event, ARCHIVE_KIND};
pub use session::Session;

use error::{ArchiveError, InitError};
use identity::Keys;
use relay::{PublishOutcome, QueryFilter, RelayOptions, RelayPool};

/// Connect to `endpoints`. Usable as long as one of them answers.
pub async fn initialize(
    endpoints: &[String],
    options: RelayOptions,
) -> Result<RelayPool, InitError> {
    RelayPool::connect(endpoints, options).await
}

/// Sign `body` as an archive of `source_url` and publish it to every relay.
///
/// Returns once the first relay accepts.
pub async fn archive(
    pool: &RelayPool,
    keys: &Keys,
    source_url: &str,
    body: &str,
) -> Result<ArchiveEntry, ArchiveError> {
    let unsigned = codec::build(source_url, body, keys.public_key_hex(), unix_now());
    let event = codec::sign(unsigned, keys)?;
    match pool.publish_all(&event).await {
        PublishOutcome::Accepted(_) => Ok(ArchiveEntry::from_event(event, true)),
        PublishOutcome::AllFailed(failures) => Err(ArchiveError::Publish { failures }),
    }
}

/// All archives of `source_url` found across the pool, newest first.
///
/// Relays that are slow, silent, or gone only shorten the result.
pub async fn list_archives(
    pool: &RelayPool,
    source_url: &str,
    opts: &AggregateOptions,
) -> Vec<ArchiveEntry> {
    let records = pool.query_all(&QueryFilter::archives_of(source_url)).await;
    aggregate::aggregate(records, opts)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
