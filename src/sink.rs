//! Pixel sink: the narrow boundary between the render loop and the LED
//! hardware.
//!
//! The render loop hands a full strand-ordered RGBW frame to the sink every
//! tick. On a Pi with the `hardware` feature this goes out over the
//! SK6812 strand via `rs_ws281x`; everywhere else the mock sink stores the
//! frame in memory. If the real driver is requested but cannot be
//! initialized, we fall back to mock with a warning so the server still
//! comes up.

use crate::Rgbw;

/// A failed push to the hardware.
#[derive(Debug)]
pub struct SinkError(pub String);

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SinkError {}

/// Accepts full frames and pushes them to the output device.
/// Driven exclusively by the render thread; not reentrant.
pub trait PixelSink: Send {
    fn write(&mut self, frame: &[Rgbw]) -> Result<(), SinkError>;

    fn is_mock(&self) -> bool {
        false
    }

    /// The stored frame, when the sink keeps one (the mock does).
    fn last_frame(&self) -> Option<&[Rgbw]> {
        None
    }
}

// ── Mock ───────────────────────────────────────────────────────────

/// Stores the most recent frame in memory. Used in mock mode, in tests,
/// and as the fallback when the hardware driver hard-fails.
pub struct MockSink {
    pixel_count: usize,
    last_frame: Vec<Rgbw>,
}

impl MockSink {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            pixel_count,
            last_frame: vec![Rgbw::BLACK; pixel_count],
        }
    }

}

impl PixelSink for MockSink {
    fn write(&mut self, frame: &[Rgbw]) -> Result<(), SinkError> {
        if frame.len() != self.pixel_count {
            return Err(SinkError(format!(
                "expected {} pixels, got {}",
                self.pixel_count,
                frame.len()
            )));
        }
        self.last_frame.copy_from_slice(frame);
        Ok(())
    }

    fn is_mock(&self) -> bool {
        true
    }

    fn last_frame(&self) -> Option<&[Rgbw]> {
        Some(&self.last_frame)
    }
}

// ── Hardware ───────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
mod hardware {
    use super::{PixelSink, SinkError};
    use crate::Rgbw;
    use rs_ws281x::{ChannelBuilder, Controller, ControllerBuilder, StripType};

    const GPIO_PIN: i32 = 18;
    const CHANNEL: usize = 0;
    const FREQ_HZ: u32 = 800_000;
    const DMA: i32 = 10;

    /// Drives one chained SK6812-RGBW strand.
    pub struct Ws281xSink {
        controller: Controller,
    }

    impl Ws281xSink {
        pub fn new(pixel_count: usize) -> Result<Self, SinkError> {
            let controller = ControllerBuilder::new()
                .freq(FREQ_HZ)
                .dma(DMA)
                .channel(
                    CHANNEL,
                    ChannelBuilder::new()
                        .pin(GPIO_PIN)
                        .count(pixel_count as i32)
                        .strip_type(StripType::Sk6812Rgbw)
                        .brightness(255)
                        .build(),
                )
                .build()
                .map_err(|e| SinkError(format!("ws281x init failed: {e}")))?;
            Ok(Self { controller })
        }
    }

    impl PixelSink for Ws281xSink {
        fn write(&mut self, frame: &[Rgbw]) -> Result<(), SinkError> {
            // RawColor channel order is BGRW.
            for (raw, color) in self.controller.leds_mut(CHANNEL).iter_mut().zip(frame) {
                *raw = [color.b, color.g, color.r, color.w];
            }
            self.controller
                .render()
                .map_err(|e| SinkError(format!("ws281x render failed: {e}")))
        }
    }
}

#[cfg(feature = "hardware")]
pub use hardware::Ws281xSink;

/// Build the sink for the requested mode, falling back to mock when the
/// real driver is unavailable.
pub fn create_sink(mock: bool, pixel_count: usize) -> Box<dyn PixelSink> {
    #[cfg(feature = "hardware")]
    if !mock {
        match Ws281xSink::new(pixel_count) {
            Ok(sink) => return Box::new(sink),
            Err(e) => tracing::warn!("hardware sink unavailable ({e}), falling back to mock"),
        }
    }
    #[cfg(not(feature = "hardware"))]
    if !mock {
        tracing::warn!("built without the hardware feature, using the mock sink");
    }
    Box::new(MockSink::new(pixel_count))
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mock_sink_stores_the_last_frame() {
        let mut sink = MockSink::new(3);
        let frame = vec![Rgbw::rgb(1, 2, 3); 3];
        sink.write(&frame).unwrap();
        assert_eq!(sink.last_frame(), Some(frame.as_slice()));
    }

    #[test]
    fn mock_sink_rejects_wrong_frame_length() {
        let mut sink = MockSink::new(3);
        assert!(sink.write(&[Rgbw::BLACK; 2]).is_err());
    }

    #[test]
    fn create_sink_honors_mock_mode() {
        assert!(create_sink(true, 10).is_mock());
    }
}
