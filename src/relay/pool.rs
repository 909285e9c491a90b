//! Fan-out of publishes and queries across every configured relay.

use std::time::Instant;

use futures_util::{future::join_all, stream::FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Ack, ConnectionState, QueryFilter, RelayConnection, RelayOptions};
use crate::{
    error::{ConnectError, InitError, PublishError},
    event::Event,
};

/// Result of sending one event to every open relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// First relay to accept. Others may still be answering.
    Accepted(Ack),
    /// Every relay rejected, timed out, or was closed.
    AllFailed(Vec<(String, PublishError)>),
}

/// Set of relay connections opened together.
#[derive(Debug)]
pub struct RelayPool {
    connections: Vec<RelayConnection>,
    failures: Vec<(String, ConnectError)>,
    options: RelayOptions,
}

impl RelayPool {
    /// Connect to every endpoint concurrently.
    ///
    /// Succeeds if at least one relay connects; the others are recorded in
    /// [`RelayPool::failures`].
    pub async fn connect(endpoints: &[String], options: RelayOptions) -> Result<Self, InitError> {
        let mut unique: Vec<&String> = Vec::new();
        for url in endpoints {
            if !unique.contains(&url) {
                unique.push(url);
            }
        }
        let attempts = unique.into_iter().map(|url| {
            let options = &options;
            async move { (url.clone(), RelayConnection::connect(url, options).await) }
        });

        let mut connections = Vec::new();
        let mut failures = Vec::new();
        for (url, result) in join_all(attempts).await {
            match result {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    warn!(relay = %url, error = %e, "relay unavailable");
                    failures.push((url, e));
                }
            }
        }
        if connections.is_empty() {
            return Err(InitError::NoRelaysAvailable { failures });
        }
        info!(
            connected = connections.len(),
            failed = failures.len(),
            "relay pool ready"
        );
        Ok(Self {
            connections,
            failures,
            options,
        })
    }

    /// Publish `event` on every open relay and return at the first acceptance.
    ///
    /// Sends to the remaining relays keep running in the background.
    pub async fn publish_all(&self, event: &Event) -> PublishOutcome {
        let mut failures = Vec::new();
        let mut pending = FuturesUnordered::new();
        for conn in &self.connections {
            if !conn.is_open() {
                failures.push((conn.url().to_string(), PublishError::Closed));
                continue;
            }
            let conn = conn.clone();
            let event = event.clone();
            pending.push(tokio::spawn(async move {
                let result = conn.publish(&event).await;
                match &result {
                    Ok(ack) => debug!(relay = %conn.url(), id = %event.id, message = %ack.message, "accepted"),
                    Err(e) => debug!(relay = %conn.url(), id = %event.id, error = %e, "not accepted"),
                }
                (conn.url().to_string(), result)
            }));
        }

        while let Some(joined) = pending.next().await {
            match joined {
                Ok((relay, Ok(ack))) => {
                    info!(relay = %relay, id = %event.id, "archive published");
                    return PublishOutcome::Accepted(ack);
                }
                Ok((relay, Err(e))) => {
                    warn!(relay = %relay, id = %event.id, error = %e, "publish failed");
                    failures.push((relay, e));
                }
                Err(e) => warn!(error = %e, "publish task failed"),
            }
        }
        PublishOutcome::AllFailed(failures)
    }

    /// Collect matching events from every open relay until all of them
    /// finish or the query window elapses, whichever comes first.
    ///
    /// Records are returned raw, duplicates included.
    pub async fn query_all(&self, filter: &QueryFilter) -> Vec<Event> {
        let window = self.options.query_window;
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();
        for conn in self.connections.iter().filter(|c| c.is_open()) {
            let mut sub = conn.subscribe(filter, window);
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(ev) = sub.next().await {
                    if tx.send(ev).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        let mut records = Vec::new();
        loop {
            tokio::select! {
                ev = rx.recv() => match ev {
                    Some(ev) => records.push(ev),
                    None => break,
                },
                _ = &mut deadline => {
                    debug!(url = %filter.source_url, "query window elapsed");
                    break;
                }
            }
        }
        for task in tasks {
            task.abort();
        }
        info!(
            url = %filter.source_url,
            records = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query finished"
        );
        records
    }

    /// Every configured endpoint with its current state.
    pub fn relays(&self) -> Vec<(String, ConnectionState)> {
        self.connections
            .iter()
            .map(|c| (c.url().to_string(), c.state()))
            .chain(
                self.failures
                    .iter()
                    .map(|(url, _)| (url.clone(), ConnectionState::Failed)),
            )
            .collect()
    }

    /// Endpoints that could not be reached at startup.
    pub fn failures(&self) -> &[(String, ConnectError)] {
        &self.failures
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Close every connection.
    pub async fn close(&self) {
        join_all(self.connections.iter().map(RelayConnection::close)).await;
    }
}
