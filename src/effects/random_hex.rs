//! One random color per hexagon cell.

use super::{time_offset, ColorMigration, Direction, Effect, EffectError};
use crate::layout::Layout;
use crate::params::ParamMap;
use crate::Rgbw;

/// Every cell runs its own color migration, so the wall shimmers cell by
/// cell. Only meaningful on a hex layout.
pub struct RandomColorHexEffect {
    migrations: Vec<ColorMigration>,
}

impl RandomColorHexEffect {
    pub fn new(layout: &Layout) -> Self {
        let cell_count = match layout {
            Layout::Hex(hex) => hex.cells().len(),
            Layout::Scale(_) => 0,
        };
        Self {
            migrations: (0..cell_count).map(|_| ColorMigration::new()).collect(),
        }
    }
}

impl Effect for RandomColorHexEffect {
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        layout: &Layout,
        ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError> {
        let Layout::Hex(hex) = layout else {
            return Err(EffectError(
                "RandomColorHex requires a hex layout".to_string(),
            ));
        };
        if self.migrations.len() != hex.cells().len() {
            self.on_layout_change(layout);
        }

        let phase = time_offset(ms, params.float("speed"), Direction::In, false).abs();
        let mode = params.interpolation();

        for (cell, migration) in hex.cells().iter().zip(&mut self.migrations) {
            let color = migration.step(phase, mode);
            for &led in &cell.ordered_leds {
                frame[led] = color;
            }
        }
        Ok(())
    }

    fn on_layout_change(&mut self, layout: &Layout) {
        let cell_count = match layout {
            Layout::Hex(hex) => hex.cells().len(),
            Layout::Scale(_) => 0,
        };
        self.migrations = (0..cell_count).map(|_| ColorMigration::new()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectKind;
    use crate::layout::{HexLayout, ScaleLayout};

    #[test]
    fn cells_are_uniformly_colored() {
        let layout = Layout::Hex(HexLayout::tiled(3, 2, 5));
        let params = ParamMap::from_defaults(&EffectKind::RandomColorHex.parameters());
        let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
        RandomColorHexEffect::new(&layout)
            .render(&mut frame, &layout, 100, &params)
            .unwrap();

        let Layout::Hex(hex) = &layout else { unreachable!() };
        for cell in hex.cells() {
            let first = frame[cell.ordered_leds[0]];
            assert!(cell.ordered_leds.iter().all(|&led| frame[led] == first));
        }
    }

    #[test]
    fn errors_on_a_scale_layout() {
        let layout = Layout::Scale(ScaleLayout::default());
        let params = ParamMap::from_defaults(&EffectKind::RandomColorHex.parameters());
        let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
        let result = RandomColorHexEffect::new(&layout).render(&mut frame, &layout, 0, &params);
        assert!(result.is_err());
    }
}
