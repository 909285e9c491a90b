//! One identity plus one relay pool, opened from [`Settings`].

use tracing::info;

use crate::{
    aggregate::{AggregateOptions, ArchiveEntry},
    config::Settings,
    error::{ArchiveError, SessionError},
    identity::{EphemeralStore, FileSecretStore, Keys},
    relay::RelayPool,
};

/// Owns the relay pool for the lifetime of a run.
///
/// Dropping the session drops the pool; connection actors exit once their
/// last handle is gone.
#[derive(Debug)]
pub struct Session {
    keys: Keys,
    pool: RelayPool,
    aggregate: AggregateOptions,
}

impl Session {
    /// Load or create the identity, then connect to the configured relays.
    pub async fn open(settings: &Settings) -> Result<Self, SessionError> {
        let keys = match &settings.key_file {
            Some(path) => Keys::load_or_generate(&FileSecretStore::new(path))?,
            None => Keys::load_or_generate(&EphemeralStore)?,
        };
        let pool = crate::initialize(&settings.relays, settings.relay_options()).await?;
        info!(pubkey = %keys.public_key_hex(), "session open");
        Ok(Self::from_parts(keys, pool, settings.aggregate_options()))
    }

    pub fn from_parts(keys: Keys, pool: RelayPool, aggregate: AggregateOptions) -> Self {
        Self {
            keys,
            pool,
            aggregate,
        }
    }

    /// Sign `body` as an archive of `source_url` and publish it.
    pub async fn archive(&self, source_url: &str, body: &str) -> Result<ArchiveEntry, ArchiveError> {
        crate::archive(&self.pool, &self.keys, source_url, body).await
    }

    /// Every archive of `source_url` the relays return, newest first.
    pub async fn list_archives(&self, source_url: &str) -> Vec<ArchiveEntry> {
        crate::list_archives(&self.pool, source_url, &self.aggregate).await
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    /// Close every relay connection. Safe to call more than once.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
