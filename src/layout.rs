//! Physical LED layouts and the logical-to-strand mapping.
//!
//! Two geometries are supported:
//! - [`ScaleLayout`]: rectangular panels of printed "scales", wired in a
//!   boustrophedon pattern (main columns run bottom-to-top, interstitial
//!   columns between them run top-to-bottom)
//! - [`HexLayout`]: assembled hexagon cells, each listing its LEDs in ring
//!   order
//!
//! Coordinates are abstract floats centered on the sculpture so radial and
//! angular effects work the same on both geometries.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Arbitrary unit for hex cell spacing. The value itself does not matter,
/// as long as it is consistent.
pub const HEX_DIMENSION: f32 = 10.0;

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum LayoutError {
    /// A LED index appears in more than one hex cell.
    DuplicateLed(usize),
    /// A LED index is outside `[0, led_count)`.
    LedOutOfRange(usize),
    /// A LED index in `[0, led_count)` is not assigned to any cell.
    MissingLed(usize),
    /// A setup operation referenced a cell that does not exist.
    UnknownCell(usize),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::DuplicateLed(led) => write!(f, "LED {led} assigned to more than one cell"),
            LayoutError::LedOutOfRange(led) => write!(f, "LED {led} is out of range"),
            LayoutError::MissingLed(led) => write!(f, "LED {led} is not assigned to any cell"),
            LayoutError::UnknownCell(cell) => write!(f, "cell {cell} does not exist"),
        }
    }
}

impl std::error::Error for LayoutError {}

// ── Scale panels ───────────────────────────────────────────────────

/// Rectangular panels of scales.
///
/// Each panel holds `x_count` main columns of `y_count` LEDs plus an
/// interstitial column between each pair of main columns, so
/// `(2·x_count − 1) · y_count` LEDs per panel. Panels are concatenated on
/// the strand left to right.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScaleLayout {
    pub x_count: usize,
    pub y_count: usize,
    pub panel_count: usize,
    /// Scale spacing in millimeters, for the visualizer.
    pub spacing: f32,
    pub scale_length: f32,
    pub scale_width: f32,
    /// Gap between adjacent panels, in scale units.
    pub panel_spacing: f32,
}

impl Default for ScaleLayout {
    fn default() -> Self {
        Self {
            x_count: 6,
            y_count: 12,
            panel_count: 3,
            spacing: 55.0,
            scale_length: 25.0,
            scale_width: 2.0,
            panel_spacing: 1.0,
        }
    }
}

impl ScaleLayout {
    pub fn leds_per_panel(&self) -> usize {
        (2 * self.x_count - 1) * self.y_count
    }

    pub fn pixel_count(&self) -> usize {
        self.panel_count * self.leds_per_panel()
    }

    /// Signed panel offset from the center panel.
    fn distance_from_center(&self, panel: usize) -> isize {
        panel as isize - ((self.panel_count as isize - 1) / 2)
    }

    /// Leftmost main-column x coordinate of a panel, in scale units.
    /// The spacing term is signed so side panels shift away from center.
    fn base_x(&self, panel: usize) -> f32 {
        let dist = self.distance_from_center(panel) as f32;
        (dist - 0.5) * self.x_count as f32 + self.panel_spacing * dist + 0.5
    }

    /// Strand index of the LED at `(panel, col, row)`.
    ///
    /// `col` addresses half-columns in `[0, 2·x_count−1)`: even columns are
    /// main columns, odd columns the interstitials between them. `row` is
    /// the physical row with 0 at the bottom. Even columns are wired
    /// bottom-up, odd columns top-down.
    pub fn index_of(&self, panel: usize, col: usize, row: usize) -> usize {
        let y = self.y_count;
        let base = panel * self.leds_per_panel();
        if col % 2 == 0 {
            base + (col / 2) * 2 * y + row
        } else {
            base + (col / 2) * 2 * y + y + (y - 1 - row)
        }
    }

    /// Inverse of [`index_of`](Self::index_of).
    pub fn grid_of(&self, index: usize) -> (usize, usize, usize) {
        let y = self.y_count;
        let panel = index / self.leds_per_panel();
        let within = index % self.leds_per_panel();
        let pair = within / (2 * y);
        let offset = within % (2 * y);
        if offset < y {
            (panel, pair * 2, offset)
        } else {
            (panel, pair * 2 + 1, y - 1 - (offset - y))
        }
    }

    /// Centered float coordinates of a strand index, in scale units.
    /// Interstitial LEDs sit half a scale over and up from their column.
    pub fn coord_of(&self, index: usize) -> (f32, f32) {
        let (panel, col, row) = self.grid_of(index);
        let base_x = self.base_x(panel);
        let center_y = self.y_count as f32 / 2.0;
        let x = (col / 2) as f32;
        if col % 2 == 0 {
            (base_x + x, center_y - row as f32 - 1.0)
        } else {
            (base_x + x + 0.5, center_y - row as f32 - 0.5)
        }
    }

    fn panel_width(&self) -> f32 {
        self.x_count as f32 * self.spacing
    }

    /// Layout descriptor for `GET /config` and the visualizer.
    pub fn descriptor(&self) -> Value {
        json!({
            "type": "scale",
            "x_count": self.x_count,
            "y_count": self.y_count,
            "panel_count": self.panel_count,
            "spacing": self.spacing,
            "panel_spacing": self.panel_spacing,
            "total_width": self.panel_width() * self.panel_count as f32
                + self.spacing * (self.panel_count as f32 - 1.0),
            "total_height": (self.y_count as f32 + 0.5) * self.spacing,
            "scale_length": self.scale_length,
            "scale_width": self.scale_width,
        })
    }
}

// ── Hexagons ───────────────────────────────────────────────────────

/// One assembled hexagon cell: its axial position (y may be half-integer
/// for offset columns) and its LEDs in ring order, starting at the bottom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HexCell {
    pub x: f32,
    pub y: f32,
    pub ordered_leds: Vec<usize>,
}

impl HexCell {
    pub fn center(&self) -> (f32, f32) {
        (self.x * HEX_DIMENSION, self.y * HEX_DIMENSION)
    }

    /// Angle in degrees of the LED at ring position `pos`, starting at the
    /// bottom (270°) and moving clockwise.
    pub fn angle_at(&self, pos: usize) -> f32 {
        let fraction = pos as f32 / self.ordered_leds.len() as f32;
        (270.0 - fraction * 360.0).rem_euclid(360.0)
    }

    fn coord_at(&self, pos: usize) -> (f32, f32) {
        let (cx, cy) = self.center();
        let angle = self.angle_at(pos).to_radians();
        (
            cx + (HEX_DIMENSION - 1.0) * angle.cos(),
            cy + HEX_DIMENSION * angle.sin(),
        )
    }
}

/// The assembled hex tiling plus the derived LED → cell table.
#[derive(Clone, Debug)]
pub struct HexLayout {
    cells: Vec<HexCell>,
    /// `cell_by_led[led] = (cell index, ring position)`.
    cell_by_led: Vec<(usize, usize)>,
}

impl HexLayout {
    /// Build a layout from a cell table, validating that the flattened
    /// `ordered_leds` is a permutation of `[0, led_count)`.
    pub fn new(cells: Vec<HexCell>) -> Result<Self, LayoutError> {
        let led_count: usize = cells.iter().map(|c| c.ordered_leds.len()).sum();
        let mut cell_by_led: Vec<Option<(usize, usize)>> = vec![None; led_count];
        for (cell_index, cell) in cells.iter().enumerate() {
            for (pos, &led) in cell.ordered_leds.iter().enumerate() {
                let slot = cell_by_led
                    .get_mut(led)
                    .ok_or(LayoutError::LedOutOfRange(led))?;
                if slot.is_some() {
                    return Err(LayoutError::DuplicateLed(led));
                }
                *slot = Some((cell_index, pos));
            }
        }
        let cell_by_led = cell_by_led
            .into_iter()
            .enumerate()
            .map(|(led, slot)| slot.ok_or(LayoutError::MissingLed(led)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { cells, cell_by_led })
    }

    /// A generated tiling with offset columns and sequential ring
    /// assignment. Real installations replace this with a table produced by
    /// the setup tool.
    pub fn tiled(columns: usize, rows: usize, leds_per_cell: usize) -> Self {
        let mut cells = Vec::with_capacity(columns * rows);
        let mut next_led = 0;
        for col in 0..columns {
            for row in 0..rows {
                let offset = if col % 2 == 1 { 0.5 } else { 0.0 };
                cells.push(HexCell {
                    x: col as f32 + 1.0,
                    y: row as f32 + offset + 1.0,
                    ordered_leds: (next_led..next_led + leds_per_cell).collect(),
                });
                next_led += leds_per_cell;
            }
        }
        Self::new(cells).expect("generated tiling is always a permutation")
    }

    pub fn cells(&self) -> &[HexCell] {
        &self.cells
    }

    pub fn pixel_count(&self) -> usize {
        self.cell_by_led.len()
    }

    /// The cell a strand index belongs to.
    pub fn cell_of(&self, led: usize) -> usize {
        self.cell_by_led[led].0
    }

    pub fn coord_of(&self, led: usize) -> (f32, f32) {
        let (cell, pos) = self.cell_by_led[led];
        self.cells[cell].coord_at(pos)
    }

    /// Centroid of cell centers; the origin for radial effects.
    pub fn centroid(&self) -> (f32, f32) {
        let n = self.cells.len().max(1) as f32;
        let (sx, sy) = self
            .cells
            .iter()
            .map(HexCell::center)
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "type": "hex",
            "hexagons": self.cells,
        })
    }
}

// ── Layout ─────────────────────────────────────────────────────────

/// The active geometry.
#[derive(Clone, Debug)]
pub enum Layout {
    Scale(ScaleLayout),
    Hex(HexLayout),
}

impl Layout {
    pub fn pixel_count(&self) -> usize {
        match self {
            Layout::Scale(s) => s.pixel_count(),
            Layout::Hex(h) => h.pixel_count(),
        }
    }

    pub fn is_hex(&self) -> bool {
        matches!(self, Layout::Hex(_))
    }

    /// Coordinates of every strand index, re-centered so that radial and
    /// angular effects measure from the middle of the sculpture.
    pub fn centered_coordinates(&self) -> Vec<(f32, f32)> {
        match self {
            Layout::Scale(s) => (0..s.pixel_count()).map(|i| s.coord_of(i)).collect(),
            Layout::Hex(h) => {
                let (cx, cy) = h.centroid();
                (0..h.pixel_count())
                    .map(|i| {
                        let (x, y) = h.coord_of(i);
                        (x - cx, y - cy)
                    })
                    .collect()
            }
        }
    }

    pub fn descriptor(&self) -> Value {
        match self {
            Layout::Scale(s) => s.descriptor(),
            Layout::Hex(h) => h.descriptor(),
        }
    }
}

// ── Hex setup mode ─────────────────────────────────────────────────

/// Interactive LED-to-cell assignment used while assembling a hex wall.
///
/// Keeps a cursor over the strand; the caller blinks the cursor LED,
/// assigns it to a cell, and advances. `export` produces the cell table
/// that [`HexLayout::new`] consumes on the next start.
#[derive(Debug)]
pub struct HexSetup {
    positions: Vec<(f32, f32)>,
    assigned: Vec<Vec<usize>>,
    current_led: usize,
    led_count: usize,
}

impl HexSetup {
    pub fn new(positions: Vec<(f32, f32)>, led_count: usize) -> Self {
        let cell_count = positions.len();
        Self {
            positions,
            assigned: vec![Vec::new(); cell_count],
            current_led: 0,
            led_count,
        }
    }

    pub fn current_led(&self) -> usize {
        self.current_led
    }

    pub fn assign(&mut self, led: usize, cell: usize) -> Result<(), LayoutError> {
        if led >= self.led_count {
            return Err(LayoutError::LedOutOfRange(led));
        }
        if cell >= self.assigned.len() {
            return Err(LayoutError::UnknownCell(cell));
        }
        if self.assigned.iter().any(|c| c.contains(&led)) {
            return Err(LayoutError::DuplicateLed(led));
        }
        self.assigned[cell].push(led);
        Ok(())
    }

    /// Advance the cursor, wrapping at the end of the strand.
    pub fn next(&mut self) {
        self.current_led = (self.current_led + 1) % self.led_count.max(1);
    }

    pub fn reset(&mut self) {
        self.current_led = 0;
        for cell in &mut self.assigned {
            cell.clear();
        }
    }

    /// The assignment so far, in the cell-table format `HexLayout` loads.
    pub fn export(&self) -> Value {
        let cells: Vec<HexCell> = self
            .positions
            .iter()
            .zip(&self.assigned)
            .map(|(&(x, y), leds)| HexCell {
                x,
                y,
                ordered_leds: leds.clone(),
            })
            .collect();
        json!({ "hexagons": cells })
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn scale_led_counts() {
        let layout = ScaleLayout::default();
        assert_eq!(layout.leds_per_panel(), 132);
        assert_eq!(layout.pixel_count(), 396);
    }

    #[test]
    fn scale_main_columns_run_bottom_up() {
        let layout = ScaleLayout::default();
        assert_eq!(layout.index_of(0, 0, 0), 0);
        assert_eq!(layout.index_of(0, 0, 11), 11);
        // Second main column starts one column pair later.
        assert_eq!(layout.index_of(0, 2, 0), 24);
    }

    #[test]
    fn scale_interstitial_columns_run_top_down() {
        let layout = ScaleLayout::default();
        // The first interstitial LED after column 0 is the top row.
        assert_eq!(layout.index_of(0, 1, 11), 12);
        assert_eq!(layout.index_of(0, 1, 0), 23);
    }

    #[test]
    fn scale_grid_round_trip_is_identity() {
        let layout = ScaleLayout::default();
        for index in 0..layout.pixel_count() {
            let (panel, col, row) = layout.grid_of(index);
            assert_eq!(layout.index_of(panel, col, row), index, "index {index}");
        }
    }

    #[test]
    fn scale_interstitials_sit_between_columns() {
        let layout = ScaleLayout::default();
        let (x_main, y_main) = layout.coord_of(layout.index_of(1, 0, 3));
        let (x_inter, y_inter) = layout.coord_of(layout.index_of(1, 1, 3));
        assert_eq!(x_inter, x_main + 0.5);
        assert_eq!(y_inter, y_main + 0.5);
    }

    #[test]
    fn scale_coordinates_are_centered() {
        let layout = ScaleLayout::default();
        let coords: Vec<(f32, f32)> = (0..layout.pixel_count())
            .map(|i| layout.coord_of(i))
            .collect();
        let max_x = coords.iter().map(|c| c.0).fold(f32::MIN, f32::max);
        let min_x = coords.iter().map(|c| c.0).fold(f32::MAX, f32::min);
        assert_eq!(max_x, -min_x);
    }

    #[test]
    fn scale_descriptor_shape() {
        let d = ScaleLayout::default().descriptor();
        assert_eq!(d["type"], "scale");
        assert_eq!(d["x_count"], 6);
        assert_eq!(d["total_width"], 1100.0);
    }

    fn two_cells() -> Vec<HexCell> {
        vec![
            HexCell { x: 0.0, y: 0.0, ordered_leds: vec![0, 1, 2] },
            HexCell { x: 1.0, y: 0.5, ordered_leds: vec![3, 4, 5] },
        ]
    }

    #[test]
    fn hex_accepts_a_permutation() {
        let layout = HexLayout::new(two_cells()).unwrap();
        assert_eq!(layout.pixel_count(), 6);
        assert_eq!(layout.cell_of(0), 0);
        assert_eq!(layout.cell_of(5), 1);
    }

    #[rstest]
    #[case(vec![0, 1, 1], LayoutError::DuplicateLed(1))]
    #[case(vec![0, 1, 7], LayoutError::LedOutOfRange(7))]
    #[case(vec![0, 1, 5], LayoutError::MissingLed(2))]
    fn hex_rejects_non_permutations(#[case] second: Vec<usize>, #[case] expected: LayoutError) {
        let cells = vec![
            HexCell { x: 0.0, y: 0.0, ordered_leds: vec![2, 3, 4] },
            HexCell { x: 1.0, y: 0.0, ordered_leds: second },
        ];
        assert_eq!(HexLayout::new(cells).unwrap_err(), expected);
    }

    #[test]
    fn hex_every_led_in_exactly_one_cell() {
        let layout = HexLayout::tiled(3, 2, 7);
        let mut seen = vec![0usize; layout.pixel_count()];
        for cell in layout.cells() {
            for &led in &cell.ordered_leds {
                seen[led] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn hex_ring_starts_at_the_bottom() {
        let cell = HexCell { x: 0.0, y: 0.0, ordered_leds: vec![0, 1, 2, 3] };
        assert_eq!(cell.angle_at(0), 270.0);
        assert_eq!(cell.angle_at(1), 180.0);
    }

    #[test]
    fn hex_centered_coordinates_average_near_zero() {
        let layout = Layout::Hex(HexLayout::tiled(2, 2, 4));
        let coords = layout.centered_coordinates();
        let mean_x: f32 = coords.iter().map(|c| c.0).sum::<f32>() / coords.len() as f32;
        assert!(mean_x.abs() < 1.0, "mean x {mean_x}");
    }

    #[test]
    fn hex_descriptor_lists_cells() {
        let d = HexLayout::new(two_cells()).unwrap().descriptor();
        assert_eq!(d["type"], "hex");
        assert_eq!(d["hexagons"].as_array().unwrap().len(), 2);
        assert_eq!(d["hexagons"][0]["ordered_leds"], json!([0, 1, 2]));
    }

    #[test]
    fn setup_assigns_and_advances() {
        let mut setup = HexSetup::new(vec![(0.0, 0.0), (1.0, 0.0)], 4);
        setup.assign(0, 0).unwrap();
        setup.next();
        setup.assign(1, 0).unwrap();
        setup.next();
        setup.assign(2, 1).unwrap();
        assert_eq!(setup.current_led(), 2);
        let exported = setup.export();
        assert_eq!(exported["hexagons"][0]["ordered_leds"], json!([0, 1]));
        assert_eq!(exported["hexagons"][1]["ordered_leds"], json!([2]));
    }

    #[test]
    fn setup_rejects_double_assignment() {
        let mut setup = HexSetup::new(vec![(0.0, 0.0)], 4);
        setup.assign(0, 0).unwrap();
        assert_eq!(setup.assign(0, 0), Err(LayoutError::DuplicateLed(0)));
    }

    #[test]
    fn setup_reset_clears_everything() {
        let mut setup = HexSetup::new(vec![(0.0, 0.0)], 4);
        setup.assign(0, 0).unwrap();
        setup.next();
        setup.reset();
        assert_eq!(setup.current_led(), 0);
        assert_eq!(setup.export()["hexagons"][0]["ordered_leds"], json!([]));
    }
}
