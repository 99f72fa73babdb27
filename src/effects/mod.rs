//! Effect framework: the render trait, the closed effect registry, and the
//! timing/geometry helpers shared by the concrete effects.
//!
//! Effects are a closed set of cases keyed by wire name. Each case declares
//! a static parameter table ([`EffectKind::parameters`]) and instantiates a
//! boxed [`Effect`] that owns whatever per-layout tables it precomputes
//! (radial distances, angles). Switching effects or layouts rebuilds those
//! tables.

mod radial;
mod rainbow;
mod random;
mod random_hex;
mod single_color;

pub use radial::{MultiColorRadialEffect, SingleColorRadialEffect};
pub use rainbow::{RainbowRadialEffect, RainbowSpinEffect};
pub use random::{RandomColorDualEffect, RandomColorSingleEffect};
pub use random_hex::RandomColorHexEffect;
pub use single_color::SingleColorEffect;

use rand::Rng;

use crate::layout::Layout;
use crate::params::{ParamMap, ParamSpec, ParamTable};
use crate::{Interpolation, Rgbw};

// ── Effect trait ───────────────────────────────────────────────────

/// A failed render tick. The render loop blanks the frame and, after
/// repeated failures, falls back to the default effect.
#[derive(Debug, PartialEq, Eq)]
pub struct EffectError(pub String);

impl std::fmt::Display for EffectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for EffectError {}

/// A running effect: a deterministic function from (time, parameters,
/// layout) to a frame of N colors.
pub trait Effect: Send {
    /// Write one color per LED into `frame` (length = layout pixel count).
    /// `ms` is the time since the effect became active.
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        layout: &Layout,
        ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError>;

    /// Invalidate and rebuild any precomputed per-layout tables.
    fn on_layout_change(&mut self, _layout: &Layout) {}
}

// ── Registry ───────────────────────────────────────────────────────

/// The closed set of effects, keyed by wire name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectKind {
    SingleColor,
    RainbowRadial,
    RainbowSpin,
    SingleColorRadial,
    MultiColorRadial,
    RandomColorSingle,
    RandomColorDual,
    RandomColorHex,
}

impl EffectKind {
    pub const ALL: [EffectKind; 8] = [
        EffectKind::SingleColor,
        EffectKind::RainbowRadial,
        EffectKind::RainbowSpin,
        EffectKind::SingleColorRadial,
        EffectKind::MultiColorRadial,
        EffectKind::RandomColorSingle,
        EffectKind::RandomColorDual,
        EffectKind::RandomColorHex,
    ];

    /// What runs when nothing is configured (and the fallback target when a
    /// preset's effect does not suit the layout).
    pub const DEFAULT: EffectKind = EffectKind::RainbowRadial;

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::SingleColor => "SingleColor",
            EffectKind::RainbowRadial => "RainbowRadial",
            EffectKind::RainbowSpin => "RainbowSpin",
            EffectKind::SingleColorRadial => "SingleColorRadial",
            EffectKind::MultiColorRadial => "MultiColorRadial",
            EffectKind::RandomColorSingle => "RandomColorSingle",
            EffectKind::RandomColorDual => "RandomColorDual",
            EffectKind::RandomColorHex => "RandomColorHex",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            EffectKind::SingleColor => "Single color",
            EffectKind::RainbowRadial => "Rainbow radial",
            EffectKind::RainbowSpin => "Rainbow spin",
            EffectKind::SingleColorRadial => "Single color radial",
            EffectKind::MultiColorRadial => "Multi color radial",
            EffectKind::RandomColorSingle => "Random color",
            EffectKind::RandomColorDual => "Random color dual",
            EffectKind::RandomColorHex => "Random color per hex",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// The declared parameter table, in UI order.
    pub fn parameters(self) -> ParamTable {
        const DIRECTIONS: &[&str] = &["in", "out"];
        const INTERPOLATIONS: &[&str] = &["linear", "hsv"];
        const ORIENTATIONS: &[&str] = &["horizontal", "vertical", "radial"];
        let speed = || ParamSpec::float(0.6, "Speed of the effect (0-1)");
        let direction = || ParamSpec::labeled(DIRECTIONS, "out", "Direction of the effect");
        let interpolation =
            || ParamSpec::labeled(INTERPOLATIONS, "linear", "Color interpolation of the effect");

        match self {
            EffectKind::SingleColor => vec![(
                "color",
                ParamSpec::color(Rgbw::rgb(255, 0, 0), "Color of the effect"),
            )],
            EffectKind::RainbowRadial | EffectKind::RainbowSpin => {
                vec![("speed", speed()), ("direction", direction())]
            }
            EffectKind::SingleColorRadial => vec![
                ("color", ParamSpec::color(Rgbw::rgb(255, 0, 0), "Color of the effect")),
                ("speed", speed()),
                ("direction", direction()),
                (
                    "lower_bound",
                    ParamSpec::float(0.2, "Minimum brightness of the pulse (0-1)"),
                ),
            ],
            EffectKind::MultiColorRadial => vec![
                (
                    "colors",
                    ParamSpec::color_list(
                        vec![Rgbw::rgb(255, 0, 0), Rgbw::rgb(0, 255, 0), Rgbw::rgb(0, 0, 255)],
                        "Colors of the effect",
                    ),
                ),
                ("speed", speed()),
                ("interpolation", interpolation()),
            ],
            EffectKind::RandomColorSingle => vec![
                ("speed", speed()),
                ("direction", direction()),
                ("interpolation", interpolation()),
            ],
            EffectKind::RandomColorDual => vec![
                ("speed", speed()),
                ("direction", direction()),
                ("interpolation", interpolation()),
                (
                    "orientation",
                    ParamSpec::labeled(ORIENTATIONS, "horizontal", "Orientation of the effect"),
                ),
            ],
            EffectKind::RandomColorHex => vec![("speed", speed()), ("interpolation", interpolation())],
        }
    }

    /// Whether the effect can run on the given layout.
    pub fn supports(self, layout: &Layout) -> bool {
        match self {
            EffectKind::RandomColorHex => layout.is_hex(),
            _ => true,
        }
    }

    pub fn instantiate(self, layout: &Layout) -> Box<dyn Effect> {
        match self {
            EffectKind::SingleColor => Box::new(SingleColorEffect),
            EffectKind::RainbowRadial => Box::new(RainbowRadialEffect::new(layout)),
            EffectKind::RainbowSpin => Box::new(RainbowSpinEffect::new(layout)),
            EffectKind::SingleColorRadial => Box::new(SingleColorRadialEffect::new(layout)),
            EffectKind::MultiColorRadial => Box::new(MultiColorRadialEffect::new(layout)),
            EffectKind::RandomColorSingle => Box::new(RandomColorSingleEffect::new()),
            EffectKind::RandomColorDual => Box::new(RandomColorDualEffect::new(layout)),
            EffectKind::RandomColorHex => Box::new(RandomColorHexEffect::new(layout)),
        }
    }
}

// ── Timing ─────────────────────────────────────────────────────────

/// Which way a time-driven effect moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn from_label(label: &str) -> Self {
        if label == "out" {
            Direction::Out
        } else {
            Direction::In
        }
    }
}

/// Phase offset for the current time.
///
/// `speed` maps exponentially onto a repeat period between 100 ms (speed 1)
/// and five minutes (speed 0), so the control feels linear. With `wrap` the
/// offset stays in [0,1); without it it grows monotonically. `Out` negates.
pub fn time_offset(ms: u64, speed: f64, direction: Direction, wrap: bool) -> f64 {
    const MIN_PERIOD_MS: f64 = 100.0;
    const MAX_PERIOD_MS: f64 = 1000.0 * 60.0 * 5.0;
    let period = MIN_PERIOD_MS * (MAX_PERIOD_MS / MIN_PERIOD_MS).powf(1.0 - speed.clamp(0.0, 1.0));
    let offset = if wrap {
        (ms as f64 % period) / period
    } else {
        ms as f64 / period
    };
    match direction {
        Direction::Out => -offset,
        Direction::In => offset,
    }
}

// ── Color migration ────────────────────────────────────────────────

/// Drifts between random fully-saturated hues.
///
/// Each cycle blends `from` into `to` over one phase unit, then re-seeds
/// with a fresh random target and a random stagger so multiple migrations
/// do not move in lockstep.
pub struct ColorMigration {
    from: Rgbw,
    to: Rgbw,
    random_offset: f64,
    base_offset: f64,
}

impl ColorMigration {
    pub fn new() -> Self {
        let mut migration = Self {
            from: Self::random_color(),
            to: Self::random_color(),
            random_offset: 0.0,
            base_offset: 0.0,
        };
        migration.re_seed(0.0);
        migration
    }

    fn random_color() -> Rgbw {
        Rgbw::from_hsv(rand::thread_rng().gen_range(0.0..360.0), 1.0, 1.0)
    }

    fn re_seed(&mut self, phase: f64) {
        self.from = self.to;
        self.to = Self::random_color();
        self.random_offset = rand::thread_rng().gen_range(0.0..0.5);
        self.base_offset = phase;
    }

    /// The color at the given monotonically increasing phase.
    pub fn step(&mut self, phase: f64, mode: Interpolation) -> Rgbw {
        let start = self.base_offset + self.random_offset;
        let t = phase - start;
        let color = Rgbw::interpolate(self.from, self.to, t as f32, mode);
        if t >= 1.0 {
            self.re_seed(phase);
        }
        color
    }
}

impl Default for ColorMigration {
    fn default() -> Self {
        Self::new()
    }
}

// ── Per-layout geometry tables ─────────────────────────────────────

/// Radial distance of every LED from the layout center, scaled to [0,1].
pub(crate) fn scaled_distances(layout: &Layout) -> Vec<f32> {
    let distances: Vec<f32> = layout
        .centered_coordinates()
        .iter()
        .map(|(x, y)| (x * x + y * y).sqrt())
        .collect();
    let max = distances.iter().fold(0.0f32, |a, &b| a.max(b)).max(f32::EPSILON);
    distances.into_iter().map(|d| d / max).collect()
}

/// Angle of every LED around the layout center as a fraction of a full
/// turn, 0 pointing right and increasing counter-clockwise.
pub(crate) fn angle_fractions(layout: &Layout) -> Vec<f32> {
    layout
        .centered_coordinates()
        .iter()
        .map(|(x, y)| y.atan2(*x).rem_euclid(std::f32::consts::TAU) / std::f32::consts::TAU)
        .collect()
}

/// X and Y of every LED rescaled into [0,1] across the layout extents.
pub(crate) fn scaled_axes(layout: &Layout) -> (Vec<f32>, Vec<f32>) {
    let coords = layout.centered_coordinates();
    let rescale = |values: Vec<f32>| -> Vec<f32> {
        let min = values.iter().fold(f32::MAX, |a, &b| a.min(b));
        let max = values.iter().fold(f32::MIN, |a, &b| a.max(b));
        let span = (max - min).max(f32::EPSILON);
        values.into_iter().map(|v| (v - min) / span).collect()
    };
    (
        rescale(coords.iter().map(|c| c.0).collect()),
        rescale(coords.iter().map(|c| c.1).collect()),
    )
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{HexLayout, ScaleLayout};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn scale_layout() -> Layout {
        Layout::Scale(ScaleLayout::default())
    }

    #[test]
    fn registry_names_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EffectKind::from_name("Strobe"), None);
    }

    #[test]
    fn every_effect_declares_its_parameters() {
        for kind in EffectKind::ALL {
            let table = kind.parameters();
            assert!(!table.is_empty(), "{} has no parameters", kind.name());
        }
    }

    #[test]
    fn random_color_hex_requires_hex_layout() {
        assert!(!EffectKind::RandomColorHex.supports(&scale_layout()));
        assert!(EffectKind::RandomColorHex.supports(&Layout::Hex(HexLayout::tiled(2, 2, 3))));
        assert!(EffectKind::RainbowSpin.supports(&scale_layout()));
    }

    #[rstest]
    #[case(50, 1.0, 0.5)] // speed 1 repeats every 100 ms
    #[case(150, 1.0, 0.5)]
    #[case(150_000, 0.0, 0.5)] // speed 0 repeats every 5 minutes
    fn time_offset_period(#[case] ms: u64, #[case] speed: f64, #[case] expected: f64) {
        let offset = time_offset(ms, speed, Direction::In, true);
        assert!((offset - expected).abs() < 1e-9, "got {offset}");
    }

    #[test]
    fn time_offset_out_negates() {
        assert_eq!(
            time_offset(50, 1.0, Direction::Out, true),
            -time_offset(50, 1.0, Direction::In, true)
        );
    }

    #[test]
    fn time_offset_unwrapped_grows_past_one() {
        assert_eq!(time_offset(250, 1.0, Direction::In, false), 2.5);
    }

    #[test]
    fn color_migration_reseeds_after_a_full_cycle() {
        let mut migration = ColorMigration::new();
        let before = migration.to;
        // Push the phase past start + 1; the target must have been consumed.
        migration.step(2.0, Interpolation::Linear);
        assert_eq!(migration.from, before);
    }

    #[test]
    fn scaled_distances_reach_exactly_one() {
        let distances = scaled_distances(&scale_layout());
        let max = distances.iter().fold(0.0f32, |a, &b| a.max(b));
        assert_eq!(max, 1.0);
        assert!(distances.iter().all(|d| (0.0..=1.0).contains(d)));
    }

    #[test]
    fn scaled_axes_span_zero_to_one() {
        let (xs, ys) = scaled_axes(&scale_layout());
        assert_eq!(xs.iter().fold(f32::MAX, |a, &b| a.min(b)), 0.0);
        assert_eq!(xs.iter().fold(f32::MIN, |a, &b| a.max(b)), 1.0);
        assert_eq!(ys.iter().fold(f32::MIN, |a, &b| a.max(b)), 1.0);
    }

    #[test]
    fn instantiate_renders_into_the_frame() {
        let layout = scale_layout();
        for kind in EffectKind::ALL {
            if !kind.supports(&layout) {
                continue;
            }
            let mut effect = kind.instantiate(&layout);
            let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
            let params = ParamMap::from_defaults(&kind.parameters());
            effect
                .render(&mut frame, &layout, 123, &params)
                .unwrap_or_else(|e| panic!("{} failed: {e}", kind.name()));
        }
    }
}
