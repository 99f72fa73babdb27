//! Frame broadcaster: pushes recent frames to connected viewers without
//! ever stalling the render loop.
//!
//! The render thread publishes into a single latest-frame slot; a dedicated
//! sender task wakes on new frames, enforces the viewer frame-rate cap,
//! serializes once, and fans out to every viewer's bounded queue. A viewer
//! that falls behind loses frames, not the render loop. With no viewers
//! connected, publishing returns before touching the frame at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::Rgbw;

/// Viewer frame pacing (~30 Hz), independent of the render rate.
const VIEWER_FRAME_INTERVAL: Duration = Duration::from_millis(33);
/// Outstanding packets per viewer before frames start dropping.
const VIEWER_QUEUE_DEPTH: usize = 8;

/// One connected viewer's receiving end.
pub struct Viewer {
    pub id: u64,
    pub rx: mpsc::Receiver<String>,
}

#[derive(Clone, Default)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    latest: Mutex<Option<Vec<Rgbw>>>,
    notify: Notify,
    viewers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    viewer_count: AtomicUsize,
    next_viewer_id: AtomicU64,
}

/// A Socket.IO event packet: `42["event",payload]`.
pub fn event_packet(event: &str, payload: &Value) -> String {
    format!("42{}", json!([event, payload]))
}

/// The `led_update` packet for a post-processed frame, in strand order.
pub fn frame_packet(frame: &[Rgbw]) -> String {
    event_packet("led_update", &json!({ "leds": frame }))
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.viewer_count.load(Ordering::Relaxed)
    }

    /// Register a viewer and hand back its packet stream.
    pub fn add_viewer(&self) -> Viewer {
        let id = self.inner.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE_DEPTH);
        self.inner.viewers.lock().unwrap().insert(id, tx);
        self.inner.viewer_count.fetch_add(1, Ordering::Relaxed);
        Viewer { id, rx }
    }

    pub fn remove_viewer(&self, id: u64) {
        if self.inner.viewers.lock().unwrap().remove(&id).is_some() {
            self.inner.viewer_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Non-blocking publish from the render thread. Replaces any frame the
    /// sender has not picked up yet; a no-op while nobody is watching.
    pub fn publish_frame(&self, frame: &[Rgbw]) {
        if self.viewer_count() == 0 {
            return;
        }
        *self.inner.latest.lock().unwrap() = Some(frame.to_vec());
        self.inner.notify.notify_one();
    }

    /// Send a control-plane event (`state_update`, `effects_update`,
    /// `presets_update`) to every viewer right away.
    pub fn emit(&self, event: &str, payload: &Value) {
        self.fan_out(&event_packet(event, payload));
    }

    /// Send a packet to one viewer (used for the connect handshake).
    pub fn send_to(&self, id: u64, packet: String) {
        let viewers = self.inner.viewers.lock().unwrap();
        if let Some(tx) = viewers.get(&id) {
            let _ = tx.try_send(packet);
        }
    }

    fn fan_out(&self, packet: &str) {
        let mut dead = Vec::new();
        {
            let viewers = self.inner.viewers.lock().unwrap();
            for (id, tx) in viewers.iter() {
                match tx.try_send(packet.to_string()) {
                    Ok(()) => {}
                    // Full queue: this viewer skips a frame.
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        for id in dead {
            self.remove_viewer(id);
        }
    }

    /// The sender task. Wakes on new frames, paces to the viewer cap,
    /// serializes once and fans out. Runs until the process exits.
    pub async fn run_sender(self) {
        let mut next_send = Instant::now();
        loop {
            self.inner.notify.notified().await;
            tokio::time::sleep_until(next_send).await;

            // Take after pacing so the newest frame wins.
            let frame = self.inner.latest.lock().unwrap().take();
            let Some(frame) = frame else { continue };
            if self.viewer_count() == 0 {
                continue;
            }
            self.fan_out(&frame_packet(&frame));
            next_send = Instant::now() + VIEWER_FRAME_INTERVAL;
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    #[test]
    fn frame_packet_uses_socketio_event_framing() {
        let packet = frame_packet(&[Rgbw::rgb(1, 2, 3)]);
        assert_eq!(
            packet,
            r#"42["led_update",{"leds":[{"r":1,"g":2,"b":3,"w":0}]}]"#
        );
    }

    #[test]
    fn event_packet_carries_the_payload() {
        let packet = event_packet("state_update", &json!({"brightness": 0.5}));
        assert_eq!(packet, r#"42["state_update",{"brightness":0.5}]"#);
    }

    #[test]
    fn viewer_roster_tracks_adds_and_removes() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.viewer_count(), 0);
        let viewer = broadcaster.add_viewer();
        assert_eq!(broadcaster.viewer_count(), 1);
        broadcaster.remove_viewer(viewer.id);
        assert_eq!(broadcaster.viewer_count(), 0);
    }

    #[tokio::test]
    async fn sender_delivers_frames_to_viewers() {
        let broadcaster = Broadcaster::new();
        let mut viewer = broadcaster.add_viewer();
        let sender = tokio::spawn(broadcaster.clone().run_sender());

        broadcaster.publish_frame(&[Rgbw::rgb(255, 0, 0)]);
        let packet = timeout(Duration::from_secs(1), viewer.rx.recv())
            .await
            .expect("sender should deliver within a second")
            .unwrap();
        assert!(packet.starts_with(r#"42["led_update""#), "got {packet}");

        sender.abort();
    }

    #[tokio::test]
    async fn publish_without_viewers_is_a_no_op() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish_frame(&[Rgbw::rgb(255, 0, 0)]);

        // A viewer connecting afterwards sees nothing until a fresh frame.
        let mut viewer = broadcaster.add_viewer();
        let sender = tokio::spawn(broadcaster.clone().run_sender());
        let nothing = timeout(Duration::from_millis(100), viewer.rx.recv()).await;
        assert!(nothing.is_err(), "stale frame was delivered");

        sender.abort();
    }

    #[tokio::test]
    async fn closed_viewers_are_evicted_on_send() {
        let broadcaster = Broadcaster::new();
        let viewer = broadcaster.add_viewer();
        drop(viewer.rx);
        broadcaster.emit("state_update", &json!({}));
        assert_eq!(broadcaster.viewer_count(), 0);
    }
}
