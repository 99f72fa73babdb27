//! Radial pulse effects: an amplitude wave traveling along the distance
//! from center, tinting a single color or sampling a palette.

use super::{scaled_distances, time_offset, Direction, Effect, EffectError};
use crate::layout::Layout;
use crate::params::ParamMap;
use crate::{sample_palette, Rgbw};

/// Triangular brightness pulse over one color.
///
/// The pulse dips to `lower_bound` halfway through its cycle, so the wall
/// breathes instead of blacking out.
pub struct SingleColorRadialEffect {
    distances: Vec<f32>,
}

impl SingleColorRadialEffect {
    pub fn new(layout: &Layout) -> Self {
        Self {
            distances: scaled_distances(layout),
        }
    }
}

impl Effect for SingleColorRadialEffect {
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
        let color = params.color("color");
        let lower = params.float("lower_bound") as f32;

        for (pixel, distance) in frame.iter_mut().zip(&self.distances) {
            let phase = (distance + offset).rem_euclid(1.0);
            let triangle = if phase < 0.5 { phase } else { 1.0 - phase } * 2.0;
            *pixel = color.scale(lower + (1.0 - lower) * triangle);
        }
        Ok(())
    }

    fn on_layout_change(&mut self, layout: &Layout) {
        self.distances = scaled_distances(layout);
    }
}

/// Palette sampled by radial distance, drifting over time.
pub struct MultiColorRadialEffect {
    distances: Vec<f32>,
}

impl MultiColorRadialEffect {
    pub fn new(layout: &Layout) -> Self {
        Self {
            distances: scaled_distances(layout),
        }
    }
}

impl Effect for MultiColorRadialEffect {
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        _layout: &Layout,
        ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError> {
        let offset = time_offset(ms, params.float("speed"), Direction::Out, true) as f32;
        let colors = params.colors("colors");
        if colors.is_empty() {
            return Err(EffectError("color palette is empty".to_string()));
        }
        let mode = params.interpolation();

        for (pixel, distance) in frame.iter_mut().zip(&self.distances) {
            *pixel = sample_palette(&colors, distance + offset, mode);
        }
        Ok(())
    }

    fn on_layout_change(&mut self, layout: &Layout) {
        self.distances = scaled_distances(layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectKind;
    use crate::layout::ScaleLayout;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn layout() -> Layout {
        Layout::Scale(ScaleLayout::default())
    }

    #[test]
    fn pulse_with_lower_bound_one_is_flat() {
        let layout = layout();
        let table = EffectKind::SingleColorRadial.parameters();
        let mut params = ParamMap::from_defaults(&table);
        params
            .merge(&table, json!({"lower_bound": 1.0}).as_object().unwrap())
            .unwrap();

        let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
        SingleColorRadialEffect::new(&layout)
            .render(&mut frame, &layout, 777, &params)
            .unwrap();
        assert!(frame.iter().all(|&c| c == Rgbw::rgb(255, 0, 0)));
    }

    #[test]
    fn pulse_never_dips_below_lower_bound() {
        let layout = layout();
        let table = EffectKind::SingleColorRadial.parameters();
        let mut params = ParamMap::from_defaults(&table);
        params
            .merge(
                &table,
                json!({"lower_bound": 0.5, "color": {"r": 200, "g": 0, "b": 0}})
                    .as_object()
                    .unwrap(),
            )
            .unwrap();

        let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
        SingleColorRadialEffect::new(&layout)
            .render(&mut frame, &layout, 321, &params)
            .unwrap();
        assert!(frame.iter().all(|c| c.r >= 100), "pulse fell below the floor");
    }

    #[test]
    fn single_color_palette_is_constant() {
        let layout = layout();
        let table = EffectKind::MultiColorRadial.parameters();
        let mut params = ParamMap::from_defaults(&table);
        params
            .merge(
                &table,
                json!({"colors": [{"r": 10, "g": 20, "b": 30}]}).as_object().unwrap(),
            )
            .unwrap();

        let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
        MultiColorRadialEffect::new(&layout)
            .render(&mut frame, &layout, 999, &params)
            .unwrap();
        assert!(frame.iter().all(|&c| c == Rgbw::rgb(10, 20, 30)));
    }

    #[test]
    fn palette_colors_stay_in_range() {
        let layout = layout();
        let table = EffectKind::MultiColorRadial.parameters();
        let params = ParamMap::from_defaults(&table);
        let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
        MultiColorRadialEffect::new(&layout)
            .render(&mut frame, &layout, 5000, &params)
            .unwrap();
        assert_eq!(frame.len(), layout.pixel_count());
    }
}
