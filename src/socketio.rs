//! Socket.IO v4 compatibility over axum WebSockets.
//!
//! The shipped visualizer UI speaks the stock Socket.IO client protocol, so
//! this module implements just enough Engine.IO v4 for it to connect
//! unchanged: the polling handshake (open packet, namespace connect,
//! websocket upgrade probe), the direct websocket transport, server pings,
//! and `42["event",...]` event frames. Continuous streaming happens over
//! the websocket transport; the polling transport only carries the
//! handshake until the client upgrades.
//!
//! Packet cheat sheet (Engine.IO type + Socket.IO type):
//! `0{open}` open, `2`/`3` ping/pong, `2probe`/`3probe`/`5` upgrade,
//! `6` noop, `40` namespace connect, `41` disconnect, `42[...]` event.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::{interval, sleep, timeout, Instant};

use crate::broadcast::{Broadcaster, Viewer};

const PING_INTERVAL: Duration = Duration::from_secs(25);
const PING_TIMEOUT: Duration = Duration::from_secs(20);
/// How long a polling GET hangs before returning a noop.
const POLL_WAIT: Duration = Duration::from_secs(20);
/// Bound on a single websocket send; a viewer slower than this is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Polling sessions that never upgrade are pruned after this.
const SESSION_TTL: Duration = Duration::from_secs(60);
/// Engine.IO separates packets in one polling payload with this byte.
const PACKET_SEPARATOR: char = '\u{1e}';

fn new_sid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

fn open_packet(sid: &str, upgrades: &[&str]) -> String {
    format!(
        "0{}",
        json!({
            "sid": sid,
            "upgrades": upgrades,
            "pingInterval": PING_INTERVAL.as_millis() as u64,
            "pingTimeout": PING_TIMEOUT.as_millis() as u64,
            "maxPayload": 1_000_000,
        })
    )
}

fn connect_ack(sid: &str) -> String {
    format!("40{}", json!({ "sid": sid }))
}

/// The `state_update` / `effects_update` / `presets_update` packets a
/// freshly connected viewer receives, prebuilt by the HTTP handler.
#[derive(Clone, Default)]
pub struct ConnectEvents {
    pub packets: Vec<String>,
}

// ── Polling sessions ───────────────────────────────────────────────

struct PollSession {
    queue: VecDeque<String>,
    notify: Arc<Notify>,
    connected: bool,
    created: Instant,
}

/// A session handed over to the websocket transport.
pub struct TakenSession {
    pub connected: bool,
    pub backlog: Vec<String>,
}

/// Live Engine.IO polling sessions, keyed by sid.
#[derive(Clone, Default)]
pub struct Sessions {
    inner: Arc<Mutex<HashMap<String, PollSession>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a polling handshake: returns the sid and the open packet.
    pub fn open(&self) -> (String, String) {
        let sid = new_sid();
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, s| s.created.elapsed() < SESSION_TTL);
        map.insert(
            sid.clone(),
            PollSession {
                queue: VecDeque::new(),
                notify: Arc::new(Notify::new()),
                connected: false,
                created: Instant::now(),
            },
        );
        (sid.clone(), open_packet(&sid, &["websocket"]))
    }

    /// Handle a polling POST body. Returns `None` for unknown sids.
    pub fn post(&self, sid: &str, body: &str, connect_events: &ConnectEvents) -> Option<&'static str> {
        let mut map = self.inner.lock().unwrap();
        if !map.contains_key(sid) {
            return None;
        }
        for packet in body.split(PACKET_SEPARATOR) {
            if packet == "1" {
                map.remove(sid);
                return Some("ok");
            }
            let session = map.get_mut(sid)?;
            if packet.starts_with("40") && !session.connected {
                session.connected = true;
                session.queue.push_back(connect_ack(sid));
                session.queue.extend(connect_events.packets.iter().cloned());
                session.notify.notify_one();
            }
        }
        Some("ok")
    }

    /// Handle a polling GET: drain queued packets, or hang until one
    /// arrives, or return a noop on timeout. `None` for unknown sids.
    pub async fn poll(&self, sid: &str) -> Option<String> {
        loop {
            let notify = {
                let mut map = self.inner.lock().unwrap();
                let session = map.get_mut(sid)?;
                if !session.queue.is_empty() {
                    let packets: Vec<String> = session.queue.drain(..).collect();
                    return Some(packets.join(&PACKET_SEPARATOR.to_string()));
                }
                session.notify.clone()
            };
            tokio::select! {
                _ = notify.notified() => {}
                _ = sleep(POLL_WAIT) => return Some("6".to_string()),
            }
        }
    }

    /// Remove a session for websocket takeover.
    pub fn take(&self, sid: &str) -> Option<TakenSession> {
        self.inner.lock().unwrap().remove(sid).map(|s| TakenSession {
            connected: s.connected,
            backlog: s.queue.into(),
        })
    }
}

// ── Websocket transport ────────────────────────────────────────────

/// Drive one websocket connection: either a fresh `transport=websocket`
/// connection or an upgrade of an existing polling session.
///
/// Registers with the broadcaster at namespace connect and forwards its
/// packets until the peer disconnects, times out, or stalls.
pub async fn serve_socket(
    mut socket: WebSocket,
    upgrade_sid: Option<String>,
    sessions: Sessions,
    broadcaster: Broadcaster,
    connect_events: ConnectEvents,
) {
    let taken = upgrade_sid.as_ref().and_then(|sid| sessions.take(sid));
    let upgrading = taken.is_some();
    let sid = upgrade_sid.unwrap_or_else(new_sid);

    if !upgrading {
        // Direct websocket transport: the server speaks first.
        if send(&mut socket, open_packet(&sid, &[])).await.is_err() {
            return;
        }
    }

    let mut viewer: Option<Viewer> = None;
    if let Some(taken) = taken {
        for packet in taken.backlog {
            if send(&mut socket, packet).await.is_err() {
                return;
            }
        }
        if taken.connected {
            viewer = Some(broadcaster.add_viewer());
        }
    }

    let mut ping = interval(PING_INTERVAL);
    ping.tick().await; // the first tick fires immediately
    let mut last_heard = Instant::now();

    loop {
        let closed = tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                last_heard = Instant::now();
                match message {
                    Message::Text(text) => {
                        handle_packet(
                            text.as_str(),
                            &mut socket,
                            &sid,
                            &broadcaster,
                            &connect_events,
                            &mut viewer,
                        )
                        .await
                    }
                    Message::Close(_) => true,
                    _ => false,
                }
            }
            packet = async { viewer.as_mut().expect("guarded by if").rx.recv().await },
                if viewer.is_some() =>
            {
                match packet {
                    Some(packet) => send(&mut socket, packet).await.is_err(),
                    None => false,
                }
            }
            _ = ping.tick() => {
                if last_heard.elapsed() > PING_INTERVAL + PING_TIMEOUT {
                    tracing::debug!("viewer {sid} timed out");
                    true
                } else {
                    send(&mut socket, "2".to_string()).await.is_err()
                }
            }
        };
        if closed {
            break;
        }
    }

    if let Some(viewer) = viewer {
        broadcaster.remove_viewer(viewer.id);
        tracing::info!(
            "viewer disconnected ({} remaining)",
            broadcaster.viewer_count()
        );
    }
}

/// React to one incoming Engine.IO packet. Returns true when the
/// connection should close.
async fn handle_packet(
    packet: &str,
    socket: &mut WebSocket,
    sid: &str,
    broadcaster: &Broadcaster,
    connect_events: &ConnectEvents,
    viewer: &mut Option<Viewer>,
) -> bool {
    match packet {
        "2probe" => send(socket, "3probe".to_string()).await.is_err(),
        "5" | "3" | "6" | "" => false,
        "2" => send(socket, "3".to_string()).await.is_err(),
        "1" => true,
        _ if packet.starts_with("41") => {
            if let Some(viewer) = viewer.take() {
                broadcaster.remove_viewer(viewer.id);
            }
            false
        }
        _ if packet.starts_with("40") => {
            if viewer.is_none() {
                if send(socket, connect_ack(sid)).await.is_err() {
                    return true;
                }
                for event in &connect_events.packets {
                    if send(socket, event.clone()).await.is_err() {
                        return true;
                    }
                }
                *viewer = Some(broadcaster.add_viewer());
                tracing::info!("viewer connected ({} total)", broadcaster.viewer_count());
            }
            false
        }
        // Client-side events; the UI never sends any we act on.
        _ => false,
    }
}

async fn send(socket: &mut WebSocket, packet: String) -> Result<(), ()> {
    match timeout(SEND_TIMEOUT, socket.send(Message::Text(packet.into()))).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn events() -> ConnectEvents {
        ConnectEvents {
            packets: vec![r#"42["state_update",{}]"#.to_string()],
        }
    }

    #[test]
    fn open_packet_advertises_the_websocket_upgrade() {
        let packet = open_packet("abc", &["websocket"]);
        assert!(packet.starts_with('0'));
        let body: serde_json::Value = serde_json::from_str(&packet[1..]).unwrap();
        assert_eq!(body["sid"], "abc");
        assert_eq!(body["upgrades"], json!(["websocket"]));
        assert_eq!(body["pingInterval"], 25_000);
    }

    #[test]
    fn sids_are_unique() {
        assert_ne!(new_sid(), new_sid());
        assert_eq!(new_sid().len(), 20);
    }

    #[tokio::test]
    async fn polling_handshake_queues_connect_ack_and_initial_events() {
        let sessions = Sessions::new();
        let (sid, open) = sessions.open();
        assert!(open.starts_with('0'));

        assert_eq!(sessions.post(&sid, "40", &events()), Some("ok"));
        let payload = sessions.poll(&sid).await.unwrap();
        let packets: Vec<&str> = payload.split(PACKET_SEPARATOR).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], connect_ack(&sid));
        assert!(packets[1].starts_with(r#"42["state_update""#));
    }

    #[tokio::test]
    async fn unknown_sids_are_rejected() {
        let sessions = Sessions::new();
        assert_eq!(sessions.post("nope", "40", &events()), None);
        assert_eq!(sessions.poll("nope").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_poll_times_out_with_a_noop() {
        let sessions = Sessions::new();
        let (sid, _) = sessions.open();
        assert_eq!(sessions.poll(&sid).await, Some("6".to_string()));
    }

    #[tokio::test]
    async fn take_hands_over_connection_state_and_backlog() {
        let sessions = Sessions::new();
        let (sid, _) = sessions.open();
        assert_eq!(sessions.post(&sid, "40", &events()), Some("ok"));

        let taken = sessions.take(&sid).unwrap();
        assert!(taken.connected);
        assert_eq!(taken.backlog.len(), 2);
        // The session is gone afterwards.
        assert!(sessions.take(&sid).is_none());
    }
}
