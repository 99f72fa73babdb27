//! The simplest effect: every LED shows the configured color.

use super::{Effect, EffectError};
use crate::layout::Layout;
use crate::params::ParamMap;
use crate::Rgbw;

pub struct SingleColorEffect;

impl Effect for SingleColorEffect {
    fn render(
        &mut self,
        frame: &mut [Rgbw],
        _layout: &Layout,
        _ms: u64,
        params: &ParamMap,
    ) -> Result<(), EffectError> {
        frame.fill(params.color("color"));
        Ok(())
    }
}
