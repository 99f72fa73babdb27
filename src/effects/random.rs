//! Random-color effects: the whole wall (or two blended halves of it)
//! drifting between random hues.

use super::{
    scaled_axes, scaled_distances, time_offset, ColorMigration, Direction, Effect, EffectError,
};
use crate::layout::Layout;
use crate::params::ParamMap;
use crate::Rgbw;

/// One migration colors every LED.
pub struct RandomColorSingleEffect {
    migration: ColorMigration,
}

impl RandomColorSingleEffect {
    pub fn new() -> Self {
        Self {
            migration: ColorMigration::new(),
        }
    }
}

impl Effect for RandomColorSingleEffect {
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        _layout: &Layout,
        ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError> {
        let phase = time_offset(
            ms,
            params.float("speed"),
            Direction::from_label(params.label("direction")),
            false,
        )
        .abs();
        let color = self.migration.step(phase, params.interpolation());
        frame.fill(color);
        Ok(())
    }
}

/// Two migrations blended across the layout.
///
/// `orientation` picks the blend axis: left-to-right, bottom-to-top, or
/// radially from the center.
pub struct RandomColorDualEffect {
    first: ColorMigration,
    second: ColorMigration,
    scaled_x: Vec<f32>,
    scaled_y: Vec<f32>,
    distances: Vec<f32>,
}

impl RandomColorDualEffect {
    pub fn new(layout: &Layout) -> Self {
        let (scaled_x, scaled_y) = scaled_axes(layout);
        Self {
            first: ColorMigration::new(),
            second: ColorMigration::new(),
            scaled_x,
            scaled_y,
            distances: scaled_distances(layout),
        }
    }
}

impl Effect for RandomColorDualEffect {
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        _layout: &Layout,
        ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError> {
        let phase = time_offset(
            ms,
            params.float("speed"),
            Direction::from_label(params.label("direction")),
            false,
        )
        .abs();
        let mode = params.interpolation();
        let first = self.first.step(phase, mode);
        let second = self.second.step(phase, mode);

        let blend_axis = match params.label("orientation") {
            "vertical" => &self.scaled_y,
            "radial" => &self.distances,
            _ => &self.scaled_x,
        };
        for (pixel, t) in frame.iter_mut().zip(blend_axis) {
            *pixel = Rgbw::interpolate(first, second, *t, mode);
        }
        Ok(())
    }

    fn on_layout_change(&mut self, layout: &Layout) {
        let (scaled_x, scaled_y) = scaled_axes(layout);
        self.scaled_x = scaled_x;
        self.scaled_y = scaled_y;
        self.distances = scaled_distances(layout);
    }
}
