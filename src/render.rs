//! Render thread: owns the pixel sink and produces one frame per tick.
//!
//! The HTTP server runs on the tokio runtime while rendering happens on a
//! plain `std::thread`; the two share state through `Arc<Mutex<_>>`. Each
//! tick snapshots the shared state, runs the active effect into a reusable
//! frame buffer, applies the power-fade envelope and global brightness, and
//! hands the frame to the sink and the broadcaster.
//!
//! ## Containment
//! The loop never propagates errors out. A failing effect blanks the frame;
//! five consecutive failures fall back to a black frame and raise the
//! `effect_fault` flag until the next effect mutation. A hardware sink that
//! fails five times in a row is replaced with the mock sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::broadcast::Broadcaster;
use crate::effects::{Effect, EffectKind};
use crate::layout::Layout;
use crate::sink::{MockSink, PixelSink};
use crate::state::{SharedState, FADE_DURATION_MS};
use crate::Rgbw;

/// Tick pacing: relaxed against the in-memory mock, tight on hardware.
pub const MOCK_TICK: Duration = Duration::from_millis(50);
pub const REAL_TICK: Duration = Duration::from_millis(5);

const MAX_EFFECT_ERRORS: u32 = 5;
const MAX_DRIVER_ERRORS: u32 = 5;
const SLOW_TICK_WARNING: Duration = Duration::from_millis(50);

// ── Renderer ───────────────────────────────────────────────────────

/// Per-thread render machinery. Split out from the loop so ticks can be
/// driven directly in tests.
pub struct Renderer {
    shared: SharedState,
    layout: Arc<Layout>,
    sink: Box<dyn PixelSink>,
    broadcaster: Broadcaster,
    frame: Vec<Rgbw>,
    effect: Box<dyn Effect>,
    effect_kind: EffectKind,
    effect_epoch: Instant,
    seen_generation: u64,
    effect_errors: u32,
    fallen_back: bool,
    driver_errors: u32,
    debug: bool,
    ticks_this_second: u32,
    slow_ticks_logged: u32,
    fps_window: Instant,
}

impl Renderer {
    pub fn new(
        shared: SharedState,
        layout: Arc<Layout>,
        sink: Box<dyn PixelSink>,
        broadcaster: Broadcaster,
        debug: bool,
    ) -> Self {
        let snapshot = shared.lock().unwrap().snapshot();
        let effect = snapshot.effect.instantiate(&layout);
        Self {
            frame: vec![Rgbw::BLACK; layout.pixel_count()],
            effect,
            effect_kind: snapshot.effect,
            effect_epoch: Instant::now(),
            seen_generation: snapshot.generation,
            shared,
            layout,
            sink,
            broadcaster,
            effect_errors: 0,
            fallen_back: false,
            driver_errors: 0,
            debug,
            ticks_this_second: 0,
            slow_ticks_logged: 0,
            fps_window: Instant::now(),
        }
    }

    /// Produce and emit one frame.
    pub fn tick(&mut self) {
        let tick_start = Instant::now();
        let snapshot = self.shared.lock().unwrap().snapshot();

        // Effect or parameter mutation: clear any fault, and restart the
        // time cursor only when the effect itself changed.
        if snapshot.generation != self.seen_generation {
            self.seen_generation = snapshot.generation;
            self.effect_errors = 0;
            self.fallen_back = false;
            if snapshot.effect != self.effect_kind {
                self.effect_kind = snapshot.effect;
                self.effect = snapshot.effect.instantiate(&self.layout);
                self.effect_epoch = Instant::now();
            }
        }

        // Fade envelope. Completion commits the target power state.
        let progress = snapshot
            .fade_start
            .map(|start| (start.elapsed().as_millis() as f32 / FADE_DURATION_MS as f32).min(1.0));
        if matches!(progress, Some(p) if p >= 1.0) && snapshot.power_state != snapshot.target_power_state
        {
            let payload = {
                let mut state = self.shared.lock().unwrap();
                state.commit_power(snapshot.target_power_state);
                state.state_json()
            };
            self.broadcaster.emit("state_update", &payload);
        }
        let powered = match progress {
            Some(p) if p < 1.0 => true,
            Some(_) => snapshot.target_power_state,
            None => snapshot.power_state,
        };
        let envelope = match progress {
            Some(p) if p < 1.0 => {
                if snapshot.target_power_state {
                    p
                } else {
                    1.0 - p
                }
            }
            _ => 1.0,
        };

        if powered {
            self.run_effect(snapshot.effect, self.effect_epoch.elapsed().as_millis() as u64, &snapshot);
            let factor = envelope * snapshot.brightness;
            if factor < 1.0 {
                for pixel in &mut self.frame {
                    *pixel = pixel.scale(factor);
                }
            }
        } else {
            self.frame.fill(Rgbw::BLACK);
        }

        self.push_to_sink();
        self.broadcaster.publish_frame(&self.frame);
        self.track_timing(tick_start.elapsed());
    }

    fn run_effect(
        &mut self,
        kind: EffectKind,
        ms: u64,
        snapshot: &crate::state::RenderSnapshot,
    ) {
        if self.fallen_back {
            self.frame.fill(Rgbw::BLACK);
            return;
        }
        match self
            .effect
            .render(&mut self.frame, &self.layout, ms, &snapshot.params)
        {
            Ok(()) => self.effect_errors = 0,
            Err(e) => {
                self.frame.fill(Rgbw::BLACK);
                self.effect_errors += 1;
                tracing::error!("effect {} failed: {e}", kind.name());
                if self.effect_errors >= MAX_EFFECT_ERRORS {
                    tracing::error!(
                        "effect {} failed {} times, falling back to black",
                        kind.name(),
                        self.effect_errors
                    );
                    self.fallen_back = true;
                    let payload = {
                        let mut state = self.shared.lock().unwrap();
                        state.set_effect_fault(true);
                        state.state_json()
                    };
                    self.broadcaster.emit("state_update", &payload);
                }
            }
        }
    }

    fn push_to_sink(&mut self) {
        match self.sink.write(&self.frame) {
            Ok(()) => self.driver_errors = 0,
            Err(e) => {
                self.driver_errors += 1;
                tracing::error!("pixel sink write failed: {e}");
                if self.driver_errors >= MAX_DRIVER_ERRORS && !self.sink.is_mock() {
                    tracing::warn!("hardware sink failing repeatedly, switching to mock");
                    self.sink = Box::new(MockSink::new(self.layout.pixel_count()));
                    self.driver_errors = 0;
                }
            }
        }
    }

    fn track_timing(&mut self, tick_duration: Duration) {
        if tick_duration > SLOW_TICK_WARNING && self.slow_ticks_logged < 5 {
            self.slow_ticks_logged += 1;
            tracing::warn!("slow tick: {}ms", tick_duration.as_millis());
        }
        self.ticks_this_second += 1;
        if self.fps_window.elapsed() >= Duration::from_secs(1) {
            if self.debug {
                tracing::info!(
                    "fps: {} ({} LEDs, {} viewers)",
                    self.ticks_this_second,
                    self.layout.pixel_count(),
                    self.broadcaster.viewer_count()
                );
            }
            self.ticks_this_second = 0;
            self.fps_window = Instant::now();
        }
    }

    /// Drive all LEDs to zero, for shutdown.
    pub fn blackout(&mut self) {
        self.frame.fill(Rgbw::BLACK);
        if let Err(e) = self.sink.write(&self.frame) {
            tracing::warn!("blackout write failed: {e}");
        }
    }

    #[cfg(test)]
    fn sink_frame(&self) -> &[Rgbw] {
        self.sink.last_frame().expect("tests run against the mock sink")
    }
}

// ── Loop ───────────────────────────────────────────────────────────

/// Main render loop, run on a dedicated thread from startup until the stop
/// flag flips. Ends with a blackout frame so the wall goes dark on exit.
pub fn render_loop(
    shared: SharedState,
    layout: Arc<Layout>,
    sink: Box<dyn PixelSink>,
    broadcaster: Broadcaster,
    running: Arc<AtomicBool>,
    tick: Duration,
    debug: bool,
) {
    let mut renderer = Renderer::new(shared, layout, sink, broadcaster, debug);
    tracing::info!(
        "render thread started ({} LEDs, {}ms tick)",
        renderer.layout.pixel_count(),
        tick.as_millis()
    );
    while running.load(Ordering::SeqCst) {
        renderer.tick();
        thread::sleep(tick);
    }
    renderer.blackout();
    tracing::info!("render thread stopped");
}

// ── Tests ──────────────────────────────────────────────────────────
