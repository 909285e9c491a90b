//! A single WebSocket link to one relay.
//!
//! Each connection is driven by one actor task that owns the socket. Handles
//! talk to it over a command channel; inbound `OK` frames are routed back to
//! the publish waiting on that event id and `EVENT`/`EOSE`/`CLOSED` frames to
//! the subscription they name. Dropping every handle ends the actor, which
//! closes the socket.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    time::timeout,
};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::{
    client_async_tls,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use super::{QueryFilter, RelayOptions};
use crate::{
    codec,
    error::{ConnectError, PublishError},
    event::Event,
};

/// Subscription ids longer than this are truncated.
const MAX_SUBSCRIPTION_ID: usize = 48;

/// Lifecycle of a relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No attempt made.
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Closed by either side without error.
    Closed,
    /// Handshake or transport failure.
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Relay acceptance of a published event.
///
/// Acceptance means the relay took the event, not that it stored it durably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub relay: String,
    pub event_id: String,
    /// Free-form message from the `OK` frame, often empty.
    pub message: String,
}

enum Command {
    Publish {
        event: Event,
        reply: Reply,
    },
    Subscribe {
        sub_id: String,
        filter: Value,
        deliveries: mpsc::UnboundedSender<Delivery>,
    },
    Unsubscribe {
        sub_id: String,
    },
    /// Drop waiters for `id` whose caller stopped listening.
    Forget {
        id: String,
    },
    Close,
    #[cfg(test)]
    PendingPublishes(oneshot::Sender<usize>),
}

type Reply = oneshot::Sender<Result<Ack, PublishError>>;

#[derive(Debug)]
enum Delivery {
    Event(Event),
    EndOfStored,
    Closed(String),
}

/// Handle to one connected relay. Cheap to clone.
#[derive(Clone)]
pub(crate) struct RelayConnection {
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    next_sub: Arc<AtomicU64>,
    publish_timeout: Duration,
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

impl RelayConnection {
    /// Perform a single handshake with `url`, bounded by the connect timeout.
    ///
    /// There is no retry here; callers decide whether to try again.
    pub async fn connect(url: &str, options: &RelayOptions) -> Result<Self, ConnectError> {
        debug!(relay = %url, "connecting");
        let ws = match timeout(
            options.connect_timeout,
            connect_ws(url, options.socks_proxy.as_deref()),
        )
        .await
        {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ConnectError::Timeout(options.connect_timeout)),
        };
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_actor(url.to_string(), ws, command_rx, state_tx));
        info!(relay = %url, "relay connected");
        Ok(Self {
            url: url.to_string(),
            commands,
            state: state_rx,
            next_sub: Arc::new(AtomicU64::new(0)),
            publish_timeout: options.publish_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send one signed event and wait for the relay's `OK`.
    pub async fn publish(&self, event: &Event) -> Result<Ack, PublishError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                event: event.clone(),
                reply,
            })
            .map_err(|_| PublishError::Closed)?;
        // `rx` is dropped by the end of this statement, before any `Forget`.
        let outcome = timeout(self.publish_timeout, rx).await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PublishError::Closed),
            Err(_) => {
                let _ = self.commands.send(Command::Forget {
                    id: event.id.clone(),
                });
                Err(PublishError::Timeout(self.publish_timeout))
            }
        }
    }

    /// Publishes still waiting for an `OK`.
    #[cfg(test)]
    async fn pending_publishes(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::PendingPublishes(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or_default()
    }

    /// Open a subscription for `filter`.
    ///
    /// The returned sequence ends at end-of-stored-events, when the relay
    /// closes the subscription, when nothing arrives for `idle_timeout`, or
    /// when the connection goes away. It cannot be restarted.
    pub fn subscribe(&self, filter: &QueryFilter, idle_timeout: Duration) -> Subscription {
        let n = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let mut sub_id = format!("{}-{n}", filter.subscription_prefix());
        sub_id.truncate(MAX_SUBSCRIPTION_ID);
        let (deliveries, rx) = mpsc::unbounded_channel();
        // A closed connection drops `deliveries`, which ends the subscription.
        let _ = self.commands.send(Command::Subscribe {
            sub_id: sub_id.clone(),
            filter: filter.to_json(),
            deliveries,
        });
        Subscription {
            id: sub_id,
            relay: self.url.clone(),
            filter: filter.clone(),
            deliveries: rx,
            commands: self.commands.clone(),
            idle_timeout,
            finished: false,
        }
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close);
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}

/// Finite, single-pass stream of events from one relay subscription.
pub(crate) struct Subscription {
    id: String,
    relay: String,
    filter: QueryFilter,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    commands: mpsc::UnboundedSender<Command>,
    idle_timeout: Duration,
    finished: bool,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next matching event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Event> {
        while !self.finished {
            match timeout(self.idle_timeout, self.deliveries.recv()).await {
                Ok(Some(Delivery::Event(ev))) => {
                    if self.filter.matches(&ev) {
                        return Some(ev);
                    }
                    debug!(relay = %self.relay, sub = %self.id, id = %ev.id, "dropping event outside filter");
                }
                Ok(Some(Delivery::EndOfStored)) => {
                    debug!(relay = %self.relay, sub = %self.id, "end of stored events");
                    self.finish();
                }
                Ok(Some(Delivery::Closed(reason))) => {
                    debug!(relay = %self.relay, sub = %self.id, %reason, "subscription closed by relay");
                    self.finish();
                }
                Ok(None) => self.finished = true,
                Err(_) => {
                    debug!(relay = %self.relay, sub = %self.id, "subscription idle");
                    self.finish();
                }
            }
        }
        None
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.commands.send(Command::Unsubscribe {
                sub_id: self.id.clone(),
            });
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.finish();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, socks_proxy: Option<&str>) -> Result<WsStream, ConnectError> {
    let url = Url::parse(relay).map_err(|e| ConnectError::InvalidUrl(format!("{relay}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConnectError::InvalidUrl(format!(
            "{relay}: expected ws:// or wss://"
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ConnectError::InvalidUrl(format!("{relay}: missing host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ConnectError::InvalidUrl(format!("{relay}: missing port")))?;
    let req = relay
        .into_client_request()
        .map_err(|e| ConnectError::InvalidUrl(format!("{relay}: {e}")))?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = socks_proxy {
        Box::new(
            Socks5Stream::connect(proxy, (host, port))
                .await
                .map_err(transport)?,
        )
    } else {
        Box::new(TcpStream::connect((host, port)).await.map_err(transport)?)
    };
    let (ws, _) = client_async_tls(req, stream).await.map_err(transport)?;
    Ok(ws)
}

fn transport(e: impl fmt::Display) -> ConnectError {
    ConnectError::Transport(e.to_string())
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Where inbound frames are delivered.
struct Routes {
    relay: String,
    /// Waiters per event id; the same event may be in flight more than once.
    pending: HashMap<String, Vec<Reply>>,
    subscriptions: HashMap<String, mpsc::UnboundedSender<Delivery>>,
}

impl Routes {
    fn await_ack(&mut self, id: String, reply: Reply) {
        self.pending.retain(|_, waiters| {
            waiters.retain(|w| !w.is_closed());
            !waiters.is_empty()
        });
        self.pending.entry(id).or_default().push(reply);
    }

    fn forget(&mut self, id: &str) {
        if let Some(waiters) = self.pending.get_mut(id) {
            waiters.retain(|w| !w.is_closed());
            if waiters.is_empty() {
                self.pending.remove(id);
            }
        }
    }

    fn dispatch(&mut self, txt: &str) {
        let Ok(val) = serde_json::from_str::<Value>(txt) else {
            debug!(relay = %self.relay, "ignoring non-json frame");
            return;
        };
        let Some(arr) = val.as_array() else {
            return;
        };
        match arr.first().and_then(Value::as_str) {
            Some("OK") if arr.len() >= 3 => {
                let (Some(id), Some(accepted)) = (arr[1].as_str(), arr[2].as_bool()) else {
                    return;
                };
                let message = arr
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(waiters) = self.pending.remove(id) {
                    let result = if accepted {
                        Ok(Ack {
                            relay: self.relay.clone(),
                            event_id: id.to_string(),
                            message,
                        })
                    } else {
                        Err(PublishError::Rejected(message))
                    };
                    for reply in waiters {
                        let _ = reply.send(result.clone());
                    }
                }
            }
            Some("EVENT") if arr.len() >= 3 => {
                let Some(tx) = arr[1].as_str().and_then(|sub| self.subscriptions.get(sub)) else {
                    return;
                };
                match codec::parse_untrusted(&arr[2]) {
                    Ok(ev) => {
                        let _ = tx.send(Delivery::Event(ev));
                    }
                    Err(e) => debug!(relay = %self.relay, error = %e, "dropping malformed event"),
                }
            }
            Some("EOSE") => {
                if let Some(tx) = arr
                    .get(1)
                    .and_then(Value::as_str)
                    .and_then(|sub| self.subscriptions.get(sub))
                {
                    let _ = tx.send(Delivery::EndOfStored);
                }
            }
            Some("CLOSED") => {
                if let Some(tx) = arr
                    .get(1)
                    .and_then(Value::as_str)
                    .and_then(|sub| self.subscriptions.remove(sub))
                {
                    let reason = arr
                        .get(2)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let _ = tx.send(Delivery::Closed(reason));
                }
            }
            Some("NOTICE") => {
                let notice = arr.get(1).and_then(Value::as_str).unwrap_or_default();
                info!(relay = %self.relay, %notice, "relay notice");
            }
            _ => {}
        }
    }
}

async fn run_actor(
    relay: String,
    ws: WsStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut routes = Routes {
        relay: relay.clone(),
        pending: HashMap::new(),
        subscriptions: HashMap::new(),
    };
    let outcome = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                None | Some(Command::Close) => break ConnectionState::Closed,
                Some(Command::Publish { event, reply }) => {
                    let frame = serde_json::json!(["EVENT", event]).to_string();
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        warn!(relay = %relay, error = %e, "send failed");
                        let _ = reply.send(Err(PublishError::Transport(e.to_string())));
                        break ConnectionState::Failed;
                    }
                    routes.await_ack(event.id, reply);
                }
                Some(Command::Forget { id }) => routes.forget(&id),
                #[cfg(test)]
                Some(Command::PendingPublishes(tx)) => {
                    let _ = tx.send(routes.pending.values().map(Vec::len).sum());
                }
                Some(Command::Subscribe { sub_id, filter, deliveries }) => {
                    let frame = serde_json::json!(["REQ", sub_id, filter]).to_string();
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        warn!(relay = %relay, error = %e, "send failed");
                        break ConnectionState::Failed;
                    }
                    routes.subscriptions.insert(sub_id, deliveries);
                }
                Some(Command::Unsubscribe { sub_id }) => {
                    if routes.subscriptions.remove(&sub_id).is_some() {
                        let frame = serde_json::json!(["CLOSE", sub_id]).to_string();
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!(relay = %relay, error = %e, "send failed");
                            break ConnectionState::Failed;
                        }
                    }
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(txt))) => routes.dispatch(&txt),
                Some(Ok(Message::Close(_))) | None => {
                    debug!(relay = %relay, "relay closed the connection");
                    break ConnectionState::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(relay = %relay, error = %e, "transport error");
                    break ConnectionState::Failed;
                }
            },
        }
    };
    if outcome == ConnectionState::Closed {
        let _ = sink.close().await;
    }
    // Pending publishes now see `Closed`; open subscriptions end.
    drop(routes);
    state.send_replace(outcome);
    debug!(relay = %relay, state = ?outcome, "relay connection finished");
}
