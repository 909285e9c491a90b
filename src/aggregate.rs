//! Turn raw relay results into one ordered list of archives.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::{codec, event::Event};

/// One archived version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub id: String,
    pub created_at: u64,
    pub body: String,
    /// Hex public key of the archiver.
    pub author: String,
    /// At least one received copy passed id and signature checks.
    pub verified: bool,
}

impl ArchiveEntry {
    pub fn from_event(ev: Event, verified: bool) -> Self {
        Self {
            id: ev.id,
            created_at: ev.created_at,
            body: ev.content,
            author: ev.pubkey,
            verified,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Drop records whose id or signature do not check out.
    pub require_valid_signature: bool,
}

/// Deduplicate and order records gathered from any number of relays.
///
/// Every record is checked; unverified ones are dropped in strict mode and
/// kept with `verified = false` otherwise.
pub fn aggregate(
    records: impl IntoIterator<Item = Event>,
    opts: &AggregateOptions,
) -> Vec<ArchiveEntry> {
    let entries = records.into_iter().filter_map(|ev| match codec::check(&ev) {
        Ok(()) => Some(ArchiveEntry::from_event(ev, true)),
        Err(e) if opts.require_valid_signature => {
            debug!(id = %ev.id, error = %e, "dropping unverified archive");
            None
        }
        Err(e) => {
            debug!(id = %ev.id, error = %e, "keeping unverified archive");
            Some(ArchiveEntry::from_event(ev, false))
        }
    });
    merge(entries)
}

/// One entry per id, newest first, ties broken by id ascending.
///
/// The first copy of an id wins, unless it is unverified and a later copy
/// verifies, in which case the verified copy takes its place.
pub fn merge(entries: impl IntoIterator<Item = ArchiveEntry>) -> Vec<ArchiveEntry> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<ArchiveEntry> = Vec::new();
    for entry in entries {
        match index.get(&entry.id) {
            Some(&i) => {
                if entry.verified && !out[i].verified {
                    out[i] = entry;
                }
            }
            None => {
                index.insert(entry.id.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}
