//! In-process relay used by tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::{codec, event::Event, identity::Keys};

/// How the relay answers `EVENT`.
#[derive(Debug, Clone)]
pub(crate) enum AckMode {
    Accept,
    Reject(&'static str),
    Silent,
}

#[derive(Debug, Clone)]
pub(crate) struct Behaviour {
    pub ack: AckMode,
    pub ack_delay: Duration,
    /// Raw event objects returned for every `REQ`.
    pub stored: Vec<Value>,
    pub eose: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            ack: AckMode::Accept,
            ack_delay: Duration::ZERO,
            stored: Vec::new(),
            eose: true,
        }
    }
}

impl Behaviour {
    pub(crate) fn storing(stored: Vec<Value>) -> Self {
        Self {
            stored,
            ..Self::default()
        }
    }
}

pub(crate) struct MockRelay {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl MockRelay {
    pub(crate) async fn spawn(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));
        let behaviour = Arc::new(behaviour);
        let log = received.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, behaviour.clone(), log.clone()));
            }
        });
        Self {
            url,
            received,
            handle,
        }
    }

    /// Every frame received so far whose first element is `verb`.
    pub(crate) fn frames(&self, verb: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v[0] == verb)
            .cloned()
            .collect()
    }

    /// Poll until at least `n` frames of `verb` have arrived.
    pub(crate) async fn wait_for_frames(&self, verb: &str, n: usize) -> Vec<Value> {
        for _ in 0..200 {
            let frames = self.frames(verb);
            if frames.len() >= n {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.frames(verb)
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, behaviour: Arc<Behaviour>, log: Arc<Mutex<Vec<Value>>>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(txt) = msg else { continue };
        let Ok(val) = serde_json::from_str::<Value>(&txt) else {
            continue;
        };
        log.lock().unwrap().push(val.clone());
        let mut replies = Vec::new();
        match val[0].as_str() {
            Some("EVENT") => {
                let id = val[1]["id"].clone();
                let frame = match &behaviour.ack {
                    AckMode::Silent => continue,
                    AckMode::Accept => json!(["OK", id, true, ""]),
                    AckMode::Reject(reason) => json!(["OK", id, false, reason]),
                };
                tokio::time::sleep(behaviour.ack_delay).await;
                replies.push(frame);
            }
            Some("REQ") => {
                let sub = val[1].clone();
                for ev in &behaviour.stored {
                    replies.push(json!(["EVENT", sub, ev]));
                }
                if behaviour.eose {
                    replies.push(json!(["EOSE", sub]));
                }
            }
            _ => {}
        }
        for reply in replies {
            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }
}

/// Listener that accepts TCP but never answers the WebSocket handshake.
pub(crate) async fn spawn_blackhole() -> (String, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (url, listener)
}

/// Endpoint nothing listens on.
pub(crate) const UNREACHABLE: &str = "ws://127.0.0.1:1";

pub(crate) fn test_keys() -> Keys {
    Keys::from_secret_hex(&"07".repeat(32)).unwrap()
}

/// Archive of `url` signed by [`test_keys`].
pub(crate) fn archive_event(url: &str, body: &str, created_at: u64) -> Event {
    let keys = test_keys();
    codec::sign(
        codec::build(url, body, keys.public_key_hex(), created_at),
        &keys,
    )
    .unwrap()
}
