//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::{aggregate::AggregateOptions, relay::RelayOptions};

/// Relays used when `RELAYS` is unset or empty.
pub const DEFAULT_RELAYS: [&str; 3] = [
    "wss://relay.damus.io",
    "wss://relay.nostr.band",
    "wss://nos.lol",
];

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relay endpoints to publish to and query.
    pub relays: Vec<String>,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    /// Total time a listing waits for relays.
    pub query_window: Duration,
    /// Drop archives that fail signature checks instead of flagging them.
    pub require_valid_sig: bool,
    /// Where the signing secret is kept. Unset means a new identity per run.
    pub key_file: Option<PathBuf>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let relay = RelayOptions::default();
        Self {
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            connect_timeout: relay.connect_timeout,
            publish_timeout: relay.publish_timeout,
            query_window: relay.query_window,
            require_valid_sig: false,
            key_file: None,
            tor_socks: None,
        }
    }
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let defaults = Self::default();
        let mut relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        if relays.is_empty() {
            relays = defaults.relays;
        }
        let connect_timeout = millis("CONNECT_TIMEOUT_MS", defaults.connect_timeout)?;
        let publish_timeout = millis("PUBLISH_TIMEOUT_MS", defaults.publish_timeout)?;
        let query_window = millis("QUERY_WINDOW_MS", defaults.query_window)?;
        let require_valid_sig =
            env::var("REQUIRE_VALID_SIG").unwrap_or_else(|_| "0".into()) == "1";
        let key_file = env::var("KEY_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        Ok(Self {
            relays,
            connect_timeout,
            publish_timeout,
            query_window,
            require_valid_sig,
            key_file,
            tor_socks,
        })
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            connect_timeout: self.connect_timeout,
            publish_timeout: self.publish_timeout,
            query_window: self.query_window,
            socks_proxy: self.tor_socks.clone(),
        }
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            require_valid_signature: self.require_valid_sig,
        }
    }
}

/// Read a millisecond duration, falling back to `default` when unset or empty.
fn millis(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(s) if !s.trim().is_empty() => {
            let ms: u64 = s
                .trim()
                .parse()
                .with_context(|| format!("parsing {key}={s}"))?;
            Ok(Duration::from_millis(ms))
        }
        _ => Ok(default),
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
