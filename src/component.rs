//! Tile components and the resolution/sub-band geometry derived from
//! them.

use crate::error::{Error, RegionError, Result, bail};
use crate::rect::IntRect;

/// The wavelet filter used by a tile component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletTransform {
    /// The reversible (lossless) 5/3 integer filter.
    Reversible53,
    /// The irreversible (lossy) 9/7 floating-point filter.
    Irreversible97,
}

/// One of the four sub-bands produced by a decomposition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBandType {
    /// Low-pass in both directions.
    LowLow,
    /// High-pass horizontally, low-pass vertically.
    HighLow,
    /// Low-pass horizontally, high-pass vertically.
    LowHigh,
    /// High-pass in both directions.
    HighHigh,
}

impl SubBandType {
    /// The horizontal band offset `x0_b` of B-15.
    pub(crate) fn x_offset(self) -> u32 {
        match self {
            Self::LowLow | Self::LowHigh => 0,
            Self::HighLow | Self::HighHigh => 1,
        }
    }

    /// The vertical band offset `y0_b` of B-15.
    pub(crate) fn y_offset(self) -> u32 {
        match self {
            Self::LowLow | Self::HighLow => 0,
            Self::LowHigh | Self::HighHigh => 1,
        }
    }

    /// `log2` of the band's energy gain, used for the dynamic range of
    /// dequantized coefficients.
    pub(crate) fn log_gain(self) -> u16 {
        match self {
            Self::LowLow => 0,
            Self::HighLow | Self::LowHigh => 1,
            Self::HighHigh => 2,
        }
    }
}

/// One resolution level of a tile component.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    /// The resolution level, 0 being the coarsest (the deepest LL band).
    pub level: u8,
    /// The rectangle of the level in canvas coordinates.
    pub rect: IntRect,
}

impl Resolution {
    /// The canvas parity of the level's left edge; decides whether the
    /// leading sample of each row is low- or high-pass.
    pub fn cas_col(&self) -> u8 {
        (self.rect.x0 & 1) as u8
    }

    /// The canvas parity of the level's top edge, for columns.
    pub fn cas_row(&self) -> u8 {
        (self.rect.y0 & 1) as u8
    }
}

/// The sample grid of one color component within one tile, together
/// with the parameters the wavelet transform needs.
///
/// The component owns its sample buffer. On the reversible path the
/// buffer holds plain integers; on the irreversible path the transform
/// stages operate on `f32` values whose bit patterns are carried in the
/// same storage, with [`TileComponent::to_real`] and
/// [`TileComponent::to_integer`] converting at the pipeline boundaries.
pub struct TileComponent {
    rect: IntRect,
    precision: u8,
    is_signed: bool,
    num_resolutions: u8,
    transform: WaveletTransform,
    data: Vec<i32>,
}

impl TileComponent {
    /// Create a component with a zeroed sample buffer.
    ///
    /// `rect` must be non-empty, `precision` in 1..=32 and
    /// `num_resolutions` in 1..=33.
    pub fn new(
        rect: IntRect,
        precision: u8,
        is_signed: bool,
        num_resolutions: u8,
        transform: WaveletTransform,
    ) -> Result<Self> {
        if rect.is_empty() {
            bail!(RegionError::InvalidDimensions);
        }
        if precision == 0 || precision > 32 || num_resolutions == 0 || num_resolutions > 33 {
            bail!(RegionError::InvalidDimensions);
        }

        let len = usize::try_from(rect.area()).map_err(|_| Error::NumericOverflow)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0);

        Ok(Self {
            rect,
            precision,
            is_signed,
            num_resolutions,
            transform,
            data,
        })
    }

    /// Create a component from an existing sample buffer in row-major
    /// order. The buffer length must match the rectangle's area.
    pub fn with_samples(
        rect: IntRect,
        precision: u8,
        is_signed: bool,
        num_resolutions: u8,
        transform: WaveletTransform,
        samples: Vec<i32>,
    ) -> Result<Self> {
        let mut component = Self::new(rect, precision, is_signed, num_resolutions, transform)?;
        if samples.len() as u64 != rect.area() {
            bail!(RegionError::InvalidDimensions);
        }
        component.data = samples;
        Ok(component)
    }

    /// The rectangle of the component in canvas coordinates.
    pub fn rect(&self) -> IntRect {
        self.rect
    }

    /// The width of the component.
    pub fn width(&self) -> u32 {
        self.rect.width()
    }

    /// The height of the component.
    pub fn height(&self) -> u32 {
        self.rect.height()
    }

    /// The sample precision in bits.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Whether samples are signed.
    pub fn is_signed(&self) -> bool {
        self.is_signed
    }

    /// The number of resolution levels.
    pub fn num_resolutions(&self) -> u8 {
        self.num_resolutions
    }

    /// The wavelet filter of the component.
    pub fn transform(&self) -> WaveletTransform {
        self.transform
    }

    /// The sample buffer in row-major order.
    pub fn samples(&self) -> &[i32] {
        &self.data
    }

    /// The sample buffer in row-major order, mutably.
    pub fn samples_mut(&mut self) -> &mut [i32] {
        &mut self.data
    }

    /// The geometry of resolution level `level`.
    ///
    /// See formula B-14: level `r` divides the component rectangle by
    /// `2^(R - 1 - r)`, rounding each edge up.
    pub fn resolution(&self, level: u8) -> Resolution {
        debug_assert!(level < self.num_resolutions);

        let shift = (self.num_resolutions - 1 - level) as u32;
        let rect = IntRect::from_ltrb(
            self.rect.x0.div_ceil(1 << shift),
            self.rect.y0.div_ceil(1 << shift),
            self.rect.x1.div_ceil(1 << shift),
            self.rect.y1.div_ceil(1 << shift),
        );

        Resolution { level, rect }
    }

    /// All resolution levels, coarsest first.
    pub fn resolutions(&self) -> impl Iterator<Item = Resolution> + '_ {
        (0..self.num_resolutions).map(|level| self.resolution(level))
    }

    /// The rectangle of a sub-band in band coordinates.
    ///
    /// For `level = 0` the only band is LL; for `level >= 1` the bands
    /// are HL, LH and HH. See formula B-15.
    pub fn band_rect(&self, level: u8, band: SubBandType) -> IntRect {
        debug_assert!(level < self.num_resolutions);
        debug_assert!((level == 0) == (band == SubBandType::LowLow));

        let nb = self.band_decomposition_count(self.num_resolutions, level);
        band_coordinates(self.rect, nb, band)
    }

    /// The number of decompositions separating a band at `level` from
    /// the full-resolution grid, when `num_res` levels are considered.
    /// See table F-1.
    pub(crate) fn band_decomposition_count(&self, num_res: u8, level: u8) -> u32 {
        if level == 0 {
            num_res as u32 - 1
        } else {
            (num_res - level) as u32
        }
    }

    /// Reinterpret the integer samples as their `f32` values, in
    /// preparation for the irreversible analysis stages.
    pub fn to_real(&mut self) {
        for sample in &mut self.data {
            *sample = (*sample as f32).to_bits() as i32;
        }
    }

    /// Round the `f32` bit patterns in the buffer back to integer
    /// samples, after the irreversible synthesis stages.
    pub fn to_integer(&mut self) {
        for sample in &mut self.data {
            *sample = f32::from_bits(*sample as u32).round() as i32;
        }
    }
}

/// Map a rectangle through `nb` decompositions into the coordinates of
/// sub-band `band` (formula B-15). With `nb = 0` the rectangle is
/// returned unchanged.
pub(crate) fn band_coordinates(rect: IntRect, nb: u32, band: SubBandType) -> IntRect {
    if nb == 0 {
        return rect;
    }

    let x_off = (1u32 << (nb - 1)) * band.x_offset();
    let y_off = (1u32 << (nb - 1)) * band.y_offset();
    let div = 1u32 << nb;

    IntRect::from_ltrb(
        rect.x0.saturating_sub(x_off).div_ceil(div),
        rect.y0.saturating_sub(y_off).div_ceil(div),
        rect.x1.saturating_sub(x_off).div_ceil(div),
        rect.y1.saturating_sub(y_off).div_ceil(div),
    )
}

/// Enumerate the code-block rectangles of a sub-band, row by row.
///
/// Code blocks are aligned to a grid of `cb_width`×`cb_height` cells
/// anchored at the canvas origin and clipped to the band rectangle, so
/// edge blocks may be smaller.
pub fn code_block_grid(
    band_rect: IntRect,
    cb_width: u32,
    cb_height: u32,
) -> impl Iterator<Item = IntRect> {
    let x_start = (band_rect.x0 / cb_width) * cb_width;
    let y_start = (band_rect.y0 / cb_height) * cb_height;

    let empty = band_rect.is_empty();

    (y_start..band_rect.y1)
        .step_by(cb_height as usize)
        .flat_map(move |y| {
            (x_start..band_rect.x1)
                .step_by(cb_width as usize)
                .map(move |x| {
                    IntRect::from_ltrb(x, y, x + cb_width, y + cb_height).intersect(band_rect)
                })
        })
        .filter(move |_| !empty)
}

#[cfg(test)]
mod tests {
    use super::{SubBandType, TileComponent, WaveletTransform, code_block_grid};
    use crate::rect::IntRect;

    fn component(rect: IntRect, num_res: u8) -> TileComponent {
        TileComponent::new(rect, 8, false, num_res, WaveletTransform::Reversible53).unwrap()
    }

    #[test]
    fn resolution_rects() {
        let c = component(IntRect::from_ltrb(0, 0, 16, 16), 3);
        assert_eq!(c.resolution(2).rect, IntRect::from_ltrb(0, 0, 16, 16));
        assert_eq!(c.resolution(1).rect, IntRect::from_ltrb(0, 0, 8, 8));
        assert_eq!(c.resolution(0).rect, IntRect::from_ltrb(0, 0, 4, 4));

        // Odd origins shrink asymmetrically.
        let c = component(IntRect::from_ltrb(3, 1, 10, 10), 2);
        assert_eq!(c.resolution(0).rect, IntRect::from_ltrb(2, 1, 5, 5));
        assert_eq!(c.resolution(0).cas_col(), 0);
        assert_eq!(c.resolution(0).cas_row(), 1);
    }

    #[test]
    fn band_rects_tile_the_resolution() {
        let c = component(IntRect::from_ltrb(3, 1, 10, 10), 3);

        for level in 1..3 {
            let cur = c.resolution(level).rect;
            let prev = c.resolution(level - 1).rect;
            let hl = c.band_rect(level, SubBandType::HighLow);
            let lh = c.band_rect(level, SubBandType::LowHigh);
            let hh = c.band_rect(level, SubBandType::HighHigh);

            // The four band rects must account for every sample of the
            // current level.
            assert_eq!(prev.width() + hl.width(), cur.width());
            assert_eq!(prev.height() + lh.height(), cur.height());
            assert_eq!(hl.height(), prev.height());
            assert_eq!(lh.width(), prev.width());
            assert_eq!(hh.width(), hl.width());
            assert_eq!(hh.height(), lh.height());
        }
    }

    #[test]
    fn code_block_alignment() {
        let band = IntRect::from_ltrb(5, 3, 70, 40);
        let blocks: Vec<_> = code_block_grid(band, 64, 64).collect();
        assert_eq!(
            blocks,
            [
                IntRect::from_ltrb(5, 3, 64, 40),
                IntRect::from_ltrb(64, 3, 70, 40),
            ]
        );

        assert_eq!(
            code_block_grid(IntRect::from_ltrb(4, 4, 4, 9), 64, 64).count(),
            0
        );
    }

    #[test]
    fn real_integer_round_trip() {
        let mut c = component(IntRect::from_ltrb(0, 0, 4, 1), 1);
        c.samples_mut().copy_from_slice(&[-3, 0, 7, 120]);
        c.to_real();
        assert_eq!(f32::from_bits(c.samples()[0] as u32), -3.0);
        c.to_integer();
        assert_eq!(c.samples(), [-3, 0, 7, 120]);
    }
}
