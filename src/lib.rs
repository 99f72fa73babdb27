//! Core library for the LED scales wall.
//!
//! The crate drives a physical array of addressable RGBW LEDs (rectangular
//! "scale" panels or a hexagon tiling) and exposes a local HTTP + Socket.IO
//! control surface. The pieces:
//! - [`layout`] maps logical pixels onto the physical strand for both
//!   geometries
//! - [`effects`] computes frames from the active effect and its parameters
//! - [`render`] is the dedicated render thread (fade, brightness, sink)
//! - [`server`] + [`socketio`] are the control plane and viewer stream
//! - [`broadcast`] fans frames out to connected viewers without stalling
//!   the render loop
//!
//! This root module holds the RGBW color model shared by all of them.

pub mod broadcast;
pub mod effects;
pub mod layout;
pub mod params;
pub mod render;
pub mod server;
pub mod sink;
pub mod socketio;
pub mod state;
pub mod store;

use serde::{Deserialize, Serialize};

// ── Color ──────────────────────────────────────────────────────────

/// A single RGBW pixel value.
///
/// All channels are 0–255. The white channel is carried separately from RGB
/// because SK6812 strands drive it as a fourth physical LED; most effects
/// leave it at 0 and the UI sends colors without it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgbw {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default)]
    pub w: u8,
}

/// How to blend between two colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    /// Per-channel linear RGB blend. Passes through pastels.
    Linear,
    /// Shortest-path hue blend in HSV space. Stays saturated.
    Hsv,
}

impl Rgbw {
    pub const BLACK: Rgbw = Rgbw { r: 0, g: 0, b: 0, w: 0 };

    pub fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }

    /// RGB color with the white channel off.
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, w: 0 }
    }

    /// Convert hue (degrees), saturation and value (both 0–1) to RGB.
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let h = h.rem_euclid(360.0);
        let c = v * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match (h / 60.0) as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        Self::rgb(
            ((r + m) * 255.0).round() as u8,
            ((g + m) * 255.0).round() as u8,
            ((b + m) * 255.0).round() as u8,
        )
    }

    /// Hue (degrees), saturation and value of the RGB part.
    pub fn hsv(self) -> (f32, f32, f32) {
        let r = f32::from(self.r) / 255.0;
        let g = f32::from(self.g) / 255.0;
        let b = f32::from(self.b) / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let h = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let s = if max == 0.0 { 0.0 } else { delta / max };
        (h, s, max)
    }

    /// Multiply every channel by `factor`, rounding to nearest.
    ///
    /// This is the one rounding convention for brightness and power fade;
    /// the tests pin it down.
    pub fn scale(self, factor: f32) -> Self {
        let apply = |c: u8| (f32::from(c) * factor).round().clamp(0.0, 255.0) as u8;
        Self {
            r: apply(self.r),
            g: apply(self.g),
            b: apply(self.b),
            w: apply(self.w),
        }
    }

    /// Per-channel linear interpolation between two colors, `t` in [0,1].
    pub fn lerp(from: Rgbw, to: Rgbw, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let blend = |a: u8, b: u8| {
            (f32::from(a) + (f32::from(b) - f32::from(a)) * t)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        Self {
            r: blend(from.r, to.r),
            g: blend(from.g, to.g),
            b: blend(from.b, to.b),
            w: blend(from.w, to.w),
        }
    }

    /// HSV interpolation taking the shortest path around the hue circle.
    /// White is not part of HSV and interpolates linearly.
    pub fn lerp_hsv(from: Rgbw, to: Rgbw, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let (mut h1, s1, v1) = from.hsv();
        let (mut h2, s2, v2) = to.hsv();

        if (h2 - h1).abs() > 180.0 {
            if h1 < h2 {
                h1 += 360.0;
            } else {
                h2 += 360.0;
            }
        }

        let h = (h1 + (h2 - h1) * t).rem_euclid(360.0);
        let s = s1 + (s2 - s1) * t;
        let v = v1 + (v2 - v1) * t;
        let w = (f32::from(from.w) + (f32::from(to.w) - f32::from(from.w)) * t).round() as u8;

        let mut color = Self::from_hsv(h, s, v);
        color.w = w;
        color
    }

    /// Blend two colors with the given interpolation mode.
    pub fn interpolate(from: Rgbw, to: Rgbw, t: f32, mode: Interpolation) -> Self {
        match mode {
            Interpolation::Linear => Self::lerp(from, to, t),
            Interpolation::Hsv => Self::lerp_hsv(from, to, t),
        }
    }
}

/// Rainbow color at phase `t`; wraps modulo 1.
pub fn rainbow(t: f32) -> Rgbw {
    Rgbw::from_hsv(t.rem_euclid(1.0) * 360.0, 1.0, 1.0)
}

/// Sample an ordered palette at phase `t` in [0,1), wrapping from the last
/// color back to the first: `i = floor(t·k)`, `f = t·k − i`,
/// `blend(c_i, c_(i+1) mod k, f)`.
pub fn sample_palette(colors: &[Rgbw], t: f32, mode: Interpolation) -> Rgbw {
    match colors {
        [] => Rgbw::BLACK,
        [only] => *only,
        _ => {
            let k = colors.len();
            let pos = t.rem_euclid(1.0) * k as f32;
            let i = (pos as usize).min(k - 1);
            let f = pos - i as f32;
            Rgbw::interpolate(colors[i], colors[(i + 1) % k], f, mode)
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
