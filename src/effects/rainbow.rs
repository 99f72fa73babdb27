//! Rainbow effects: hue driven by radial distance or by angle around the
//! center, both sliding over time.

use super::{angle_fractions, scaled_distances, time_offset, Direction, Effect, EffectError};
use crate::layout::Layout;
use crate::params::ParamMap;
use crate::{rainbow, Rgbw};

/// Hue follows the radial distance from the layout center, so the rainbow
/// expands or contracts in rings.
pub struct RainbowRadialEffect {
    distances: Vec<f32>,
}

impl RainbowRadialEffect {
    pub fn new(layout: &Layout) -> Self {
        Self {
            distances: scaled_distances(layout),
        }
    }
}

impl Effect for RainbowRadialEffect {
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        _layout: &Layout,
        ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError> {
        let offset = time_offset(
            ms,
            params.float("speed"),
            Direction::from_label(params.label("direction")),
            true,
        ) as f32;
        for (pixel, distance) in frame.iter_mut().zip(&self.distances) {
            *pixel = rainbow(distance + offset);
        }
        Ok(())
    }

    fn on_layout_change(&mut self, layout: &Layout) {
        self.distances = scaled_distances(layout);
    }
}

/// Hue follows the angle around the layout center, so the rainbow spins.
pub struct RainbowSpinEffect {
    angles: Vec<f32>,
}

impl RainbowSpinEffect {
    pub fn new(layout: &Layout) -> Self {
        Self {
            angles: angle_fractions(layout),
        }
    }
}

impl Effect for RainbowSpinEffect {
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        _layout: &Layout,
        ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError> {
        let offset = time_offset(
            ms,
            params.float("speed"),
            Direction::from_label(params.label("direction")),
            true,
        ) as f32;
        for (pixel, angle) in frame.iter_mut().zip(&self.angles) {
            *pixel = rainbow(angle + offset);
        }
        Ok(())
    }

    fn on_layout_change(&mut self, layout: &Layout) {
        self.angles = angle_fractions(layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectKind;
    use crate::layout::{HexLayout, ScaleLayout};
    use pretty_assertions::assert_eq;

    fn render(effect: &mut dyn Effect, layout: &Layout, ms: u64, kind: EffectKind) -> Vec<Rgbw> {
        let params = ParamMap::from_defaults(&kind.parameters());
        let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
        effect.render(&mut frame, layout, ms, &params).unwrap();
        frame
    }

    #[test]
    fn radial_gives_equal_distances_equal_colors() {
        let scale = ScaleLayout::default();
        let layout = Layout::Scale(scale.clone());
        let mut effect = RainbowRadialEffect::new(&layout);
        let frame = render(&mut effect, &layout, 42, EffectKind::RainbowRadial);

        // Left and right mirror columns sit at the same radial distance.
        let left = scale.index_of(0, 0, 0);
        let right = scale.index_of(2, 2 * scale.x_count - 2, 0);
        assert_eq!(frame[left], frame[right]);
    }

    #[test]
    fn radial_is_deterministic_for_a_given_time() {
        let layout = Layout::Hex(HexLayout::tiled(2, 2, 6));
        let mut effect = RainbowRadialEffect::new(&layout);
        let first = render(&mut effect, &layout, 1234, EffectKind::RainbowRadial);
        let second = render(&mut effect, &layout, 1234, EffectKind::RainbowRadial);
        assert_eq!(first, second);
    }

    #[test]
    fn spin_rebuilds_tables_on_layout_change() {
        let small = Layout::Hex(HexLayout::tiled(2, 2, 3));
        let large = Layout::Hex(HexLayout::tiled(3, 3, 3));
        let mut effect = RainbowSpinEffect::new(&small);
        effect.on_layout_change(&large);
        let frame = render(&mut effect, &large, 0, EffectKind::RainbowSpin);
        assert_eq!(frame.len(), large.pixel_count());
    }
}
