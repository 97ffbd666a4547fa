//! The multi-level inverse discrete wavelet transform.
//!
//! Two entry points: [`decode`] reconstructs a whole tile component in
//! place, [`decode_region`] reconstructs only a caller-specified window
//! by staging sub-band samples in a [`SparseArray`] and running windowed
//! synthesis passes level by level. The staging array holds each level's
//! samples at their de-interleaved positions (the layout the forward
//! transform leaves behind), so a level's reconstruction overwrites the
//! region its LL input occupied while the finer bands wait further out.

use crate::component::{SubBandType, TileComponent, WaveletTransform, band_coordinates};
use crate::dwt::scratch_line;
use crate::error::{Error, RegionError, Result, bail};
use crate::lifting::{Dwt53, Dwt97, LiftingKernel, Sample};
use crate::rect::IntRect;
use crate::sparse::SparseArray;
use log::trace;

/// The block size used to stage sub-band samples during region
/// decoding; matches the most common code-block size.
const STAGE_BLOCK_SIZE: u32 = 64;

/// Apply the inverse wavelet transform to a tile component, in place.
///
/// `num_res` is the number of resolution levels to reconstruct,
/// `1..=num_resolutions`; with fewer levels than the component carries,
/// the buffer ends up holding the reduced-resolution image in its
/// top-left corner (at the component's row stride). For the
/// irreversible filter the reconstruction is left as `f32` bit patterns
/// (see [`TileComponent::to_integer`]).
pub fn decode(component: &mut TileComponent, num_res: u8) -> Result<()> {
    if num_res == 0 || num_res > component.num_resolutions() {
        bail!(RegionError::InvalidDimensions);
    }

    match component.transform() {
        WaveletTransform::Reversible53 => decode_tile::<Dwt53>(component, num_res),
        WaveletTransform::Irreversible97 => decode_tile::<Dwt97>(component, num_res),
    }
}

fn decode_tile<K: LiftingKernel>(component: &mut TileComponent, num_res: u8) -> Result<()> {
    if num_res == 1 {
        return Ok(());
    }

    let w = component.width() as usize;
    let mut line = scratch_line::<K>(component)?;

    let mut rw = component.resolution(0).rect.width() as usize;
    let mut rh = component.resolution(0).rect.height() as usize;

    for level in 1..num_res {
        let cur = component.resolution(level);

        let h_sn = rw;
        let v_sn = rh;

        rw = cur.rect.width() as usize;
        rh = cur.rect.height() as usize;

        let h_dn = rw - h_sn;
        let v_dn = rh - v_sn;

        trace!("inverse level {level}: {rw}x{rh}");

        let data = component.samples_mut();

        // Horizontal pass: interleave the low and high halves of each
        // row, synthesize, and put the row back in natural order.
        let cas = cur.cas_col() as usize;
        for j in 0..rh {
            let row = &data[j * w..][..rw];
            for (i, raw) in row[..h_sn].iter().enumerate() {
                line[cas + 2 * i] = K::Sample::from_raw(*raw);
            }
            for (i, raw) in row[h_sn..].iter().enumerate() {
                line[1 - cas + 2 * i] = K::Sample::from_raw(*raw);
            }

            K::decode_line(&mut line[..rw], h_dn as i32, h_sn as i32, cas as u8);

            for (raw, sample) in data[j * w..][..rw].iter_mut().zip(&line) {
                *raw = sample.to_raw();
            }
        }

        // Vertical pass, same per column.
        let cas = cur.cas_row() as usize;
        for j in 0..rw {
            for k in 0..v_sn {
                line[cas + 2 * k] = K::Sample::from_raw(data[k * w + j]);
            }
            for k in 0..v_dn {
                line[1 - cas + 2 * k] = K::Sample::from_raw(data[(v_sn + k) * w + j]);
            }

            K::decode_line(&mut line[..rh], v_dn as i32, v_sn as i32, cas as u8);

            for (k, sample) in line[..rh].iter().enumerate() {
                data[k * w + j] = sample.to_raw();
            }
        }
    }

    Ok(())
}

/// Sub-band samples handed over by the tier-1 decoder, at any
/// granularity from a single code block up to a whole band.
pub struct SubBandSamples {
    /// The resolution level the band belongs to; 0 means the deepest LL
    /// band, levels 1 and up carry the detail bands.
    pub level: u8,
    /// Which band of the level the samples belong to.
    pub band: SubBandType,
    /// The covered rectangle, in the band's own coordinates (B-15).
    pub rect: IntRect,
    /// Row-major samples; the length must equal the rectangle's area.
    pub data: Vec<i32>,
}

impl SubBandSamples {
    /// Wrap integer (reversible-path) samples.
    pub fn new(level: u8, band: SubBandType, rect: IntRect, data: Vec<i32>) -> Self {
        debug_assert_eq!(data.len() as u64, rect.area());
        Self {
            level,
            band,
            rect,
            data,
        }
    }

    /// Wrap dequantized real (irreversible-path) samples; the values
    /// travel through the staging array as bit patterns.
    pub fn from_real(level: u8, band: SubBandType, rect: IntRect, data: Vec<f32>) -> Self {
        let data = data.into_iter().map(|v| v.to_bits() as i32).collect();
        Self::new(level, band, rect, data)
    }
}

/// The reconstructed window produced by [`decode_region`].
pub struct RegionOutput {
    /// The delivered rectangle: the requested window clipped to the
    /// output resolution, in that resolution's canvas coordinates.
    pub rect: IntRect,
    /// Row-major samples with a row stride of `rect.width()`.
    pub data: Vec<i32>,
}

impl RegionOutput {
    /// The samples as `f32` values, for the irreversible path.
    pub fn real_samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.data.iter().map(|raw| f32::from_bits(*raw as u32))
    }
}

/// Reconstruct only `window` of a tile component from sub-band samples.
///
/// `window` is expressed in the canvas coordinates of the output
/// resolution (level `num_res - 1`) and is clipped against it. Sub-band
/// regions that no [`SubBandSamples`] chunk covers are treated as zero.
/// The component only provides geometry here; its buffer is not
/// touched.
pub fn decode_region(
    component: &TileComponent,
    bands: &[SubBandSamples],
    num_res: u8,
    window: IntRect,
) -> Result<RegionOutput> {
    if num_res == 0 || num_res > component.num_resolutions() {
        bail!(RegionError::InvalidDimensions);
    }

    match component.transform() {
        WaveletTransform::Reversible53 => {
            decode_region_impl::<Dwt53>(component, bands, num_res, window)
        }
        WaveletTransform::Irreversible97 => {
            decode_region_impl::<Dwt97>(component, bands, num_res, window)
        }
    }
}

fn decode_region_impl<K: LiftingKernel>(
    component: &TileComponent,
    bands: &[SubBandSamples],
    num_res: u8,
    window: IntRect,
) -> Result<RegionOutput> {
    let tr_max = component.resolution(num_res - 1).rect;
    let window = window.intersect(tr_max);

    if tr_max.is_empty() || window.is_empty() {
        return Ok(RegionOutput {
            rect: window,
            data: Vec::new(),
        });
    }

    let mut sa = SparseArray::new(
        tr_max.width(),
        tr_max.height(),
        STAGE_BLOCK_SIZE,
        STAGE_BLOCK_SIZE,
    )?;
    stage_band_samples(component, bands, num_res, &mut sa)?;

    if num_res > 1 {
        synthesize_levels::<K>(component, num_res, window, &mut sa)?;
    }

    // Deliver the clipped window.
    let rel = window.relative_to(tr_max.x0, tr_max.y0);
    let len = usize::try_from(rel.area()).map_err(|_| Error::NumericOverflow)?;
    let mut data = Vec::new();
    data.try_reserve_exact(len)?;
    data.resize(len, 0);
    sa.read(rel, &mut data, 1, rel.width(), false)?;

    Ok(RegionOutput { rect: window, data })
}

/// Write every provided sub-band chunk into the staging array at its
/// de-interleaved position: detail bands sit to the right of/below the
/// previous level's rectangle.
fn stage_band_samples(
    component: &TileComponent,
    bands: &[SubBandSamples],
    num_res: u8,
    sa: &mut SparseArray,
) -> Result<()> {
    for chunk in bands {
        if chunk.level >= num_res || (chunk.level == 0) != (chunk.band == SubBandType::LowLow) {
            bail!(RegionError::OutOfBounds);
        }

        if chunk.rect.is_empty() {
            continue;
        }

        let band_rect = component.band_rect(chunk.level, chunk.band);
        debug_assert!(band_rect.contains(chunk.rect));

        let mut x = chunk.rect.x0 - band_rect.x0;
        let mut y = chunk.rect.y0 - band_rect.y0;
        if chunk.level > 0 {
            let prev = component.resolution(chunk.level - 1).rect;
            if chunk.band.x_offset() == 1 {
                x += prev.width();
            }
            if chunk.band.y_offset() == 1 {
                y += prev.height();
            }
        }

        let target = IntRect::from_xywh(x, y, chunk.rect.width(), chunk.rect.height());

        trace!(
            "staging level {} band {:?} at [{},{} {}x{}]",
            chunk.level,
            chunk.band,
            target.x0,
            target.y0,
            target.width(),
            target.height(),
        );

        sa.alloc(target)?;
        sa.write(target, &chunk.data, 1, chunk.rect.width(), true)?;
    }

    Ok(())
}

/// Clamp-and-grow a band window by the synthesis margin, in place.
fn segment_grow(margin: u32, max: u32, start: &mut u32, end: &mut u32) {
    *start = start.saturating_sub(margin);
    *end = u32::min(end.saturating_add(margin), max);
}

fn synthesize_levels<K: LiftingKernel>(
    component: &TileComponent,
    num_res: u8,
    window: IntRect,
    sa: &mut SparseArray,
) -> Result<()> {
    let tr_max = component.resolution(num_res - 1).rect;

    let max_dim = usize::max(tr_max.width() as usize, tr_max.height() as usize);
    let mut raw: Vec<i32> = Vec::new();
    raw.try_reserve_exact(max_dim)?;
    raw.resize(max_dim, 0);

    let mut line: Vec<K::Sample> = Vec::new();
    line.try_reserve_exact(max_dim)?;
    line.resize(max_dim, K::Sample::default());

    let mut rw = component.resolution(0).rect.width();
    let mut rh = component.resolution(0).rect.height();

    for level in 1..num_res {
        let cur = component.resolution(level);
        let prev = component.resolution(level - 1).rect;

        let h_sn = rw;
        let v_sn = rh;

        rw = cur.rect.width();
        rh = cur.rect.height();

        let h_dn = rw - h_sn;
        let v_dn = rh - v_sn;
        let h_cas = cur.cas_col() as u32;
        let v_cas = cur.cas_row() as u32;

        // Project the window into this level's band coordinates.
        let nb = (num_res - level) as u32;
        let win_ll = band_coordinates(window, nb, SubBandType::LowLow);
        let win_hl = band_coordinates(window, nb, SubBandType::HighLow);
        let win_lh = band_coordinates(window, nb, SubBandType::LowHigh);

        // Band origins of this level, in the same band coordinate
        // spaces. The LL origin is the previous level's rectangle.
        let hl_rect = band_coordinates(tr_max, nb, SubBandType::HighLow);
        let lh_rect = band_coordinates(tr_max, nb, SubBandType::LowHigh);

        // Make the windows relative to their band origins and inflate
        // them by the synthesis margin so that the retained samples
        // come out exact.
        let mut win_ll_x0 = win_ll.x0.saturating_sub(prev.x0);
        let mut win_ll_x1 = win_ll.x1.saturating_sub(prev.x0);
        let mut win_ll_y0 = win_ll.y0.saturating_sub(prev.y0);
        let mut win_ll_y1 = win_ll.y1.saturating_sub(prev.y0);
        let mut win_hl_x0 = win_hl.x0.saturating_sub(hl_rect.x0);
        let mut win_hl_x1 = win_hl.x1.saturating_sub(hl_rect.x0);
        let mut win_lh_y0 = win_lh.y0.saturating_sub(lh_rect.y0);
        let mut win_lh_y1 = win_lh.y1.saturating_sub(lh_rect.y0);

        segment_grow(K::MARGIN, h_sn, &mut win_ll_x0, &mut win_ll_x1);
        segment_grow(K::MARGIN, h_dn, &mut win_hl_x0, &mut win_hl_x1);
        segment_grow(K::MARGIN, v_sn, &mut win_ll_y0, &mut win_ll_y1);
        segment_grow(K::MARGIN, v_dn, &mut win_lh_y0, &mut win_lh_y1);

        // The interleaved span of this level that the windows cover.
        let (win_tr_x0, win_tr_x1) = if h_cas == 0 {
            (
                u32::min(2 * win_ll_x0, 2 * win_hl_x0 + 1),
                u32::min(u32::max(2 * win_ll_x1, 2 * win_hl_x1 + 1), rw),
            )
        } else {
            (
                u32::min(2 * win_hl_x0, 2 * win_ll_x0 + 1),
                u32::min(u32::max(2 * win_hl_x1, 2 * win_ll_x1 + 1), rw),
            )
        };
        let (win_tr_y0, win_tr_y1) = if v_cas == 0 {
            (
                u32::min(2 * win_ll_y0, 2 * win_lh_y0 + 1),
                u32::min(u32::max(2 * win_ll_y1, 2 * win_lh_y1 + 1), rh),
            )
        } else {
            (
                u32::min(2 * win_lh_y0, 2 * win_ll_y0 + 1),
                u32::min(u32::max(2 * win_lh_y1, 2 * win_ll_y1 + 1), rh),
            )
        };

        trace!(
            "inverse level {level}: span x [{win_tr_x0},{win_tr_x1}) y [{win_tr_y0},{win_tr_y1})"
        );

        // Horizontal pass over the low rows, and over the high rows the
        // vertical pass will consume afterwards.
        sa.alloc(IntRect::from_ltrb(
            win_tr_x0, win_ll_y0, win_tr_x1, win_ll_y1,
        ))?;
        sa.alloc(IntRect::from_ltrb(
            win_tr_x0,
            v_sn + win_lh_y0,
            win_tr_x1,
            v_sn + win_lh_y1,
        ))?;

        let rows = (win_ll_y0..win_ll_y1).chain(v_sn + win_lh_y0..v_sn + win_lh_y1);
        for j in rows {
            // Zero the span (padded to cover the kernel's clamped
            // neighbor reads just outside it) so that band regions no
            // chunk provided read as zero rather than stale line data.
            let pad_0 = win_tr_x0.saturating_sub(K::MARGIN) as usize;
            let pad_1 = u32::min(win_tr_x1 + K::MARGIN, rw) as usize;
            raw[pad_0..pad_1].fill(0);

            if win_ll_x0 < win_ll_x1 {
                sa.read(
                    IntRect::from_ltrb(win_ll_x0, j, win_ll_x1, j + 1),
                    &mut raw[(h_cas + 2 * win_ll_x0) as usize..],
                    2,
                    0,
                    false,
                )?;
            }
            if win_hl_x0 < win_hl_x1 {
                sa.read(
                    IntRect::from_ltrb(h_sn + win_hl_x0, j, h_sn + win_hl_x1, j + 1),
                    &mut raw[(1 - h_cas + 2 * win_hl_x0) as usize..],
                    2,
                    0,
                    false,
                )?;
            }

            for i in pad_0..pad_1 {
                line[i] = K::Sample::from_raw(raw[i]);
            }

            K::decode_line_windowed(
                &mut line[..rw as usize],
                h_dn as i32,
                h_sn as i32,
                h_cas as u8,
                win_ll_x0..win_ll_x1,
                win_hl_x0..win_hl_x1,
            );

            for i in win_tr_x0 as usize..win_tr_x1 as usize {
                raw[i] = line[i].to_raw();
            }

            // Forgiving: a degenerate level can leave the span empty.
            sa.write(
                IntRect::from_ltrb(win_tr_x0, j, win_tr_x1, j + 1),
                &raw[win_tr_x0 as usize..],
                1,
                0,
                true,
            )?;
        }

        // Vertical pass over the columns of the reconstructed span.
        sa.alloc(IntRect::from_ltrb(
            win_tr_x0, win_tr_y0, win_tr_x1, win_tr_y1,
        ))?;

        for i in win_tr_x0..win_tr_x1 {
            let pad_0 = win_tr_y0.saturating_sub(K::MARGIN) as usize;
            let pad_1 = u32::min(win_tr_y1 + K::MARGIN, rh) as usize;
            raw[pad_0..pad_1].fill(0);

            if win_ll_y0 < win_ll_y1 {
                sa.read(
                    IntRect::from_ltrb(i, win_ll_y0, i + 1, win_ll_y1),
                    &mut raw[(v_cas + 2 * win_ll_y0) as usize..],
                    1,
                    2,
                    false,
                )?;
            }
            if win_lh_y0 < win_lh_y1 {
                sa.read(
                    IntRect::from_ltrb(i, v_sn + win_lh_y0, i + 1, v_sn + win_lh_y1),
                    &mut raw[(1 - v_cas + 2 * win_lh_y0) as usize..],
                    1,
                    2,
                    false,
                )?;
            }

            for k in pad_0..pad_1 {
                line[k] = K::Sample::from_raw(raw[k]);
            }

            K::decode_line_windowed(
                &mut line[..rh as usize],
                v_dn as i32,
                v_sn as i32,
                v_cas as u8,
                win_ll_y0..win_ll_y1,
                win_lh_y0..win_lh_y1,
            );

            for k in win_tr_y0 as usize..win_tr_y1 as usize {
                raw[k] = line[k].to_raw();
            }

            // Forgiving for the same degenerate-span reason as above.
            sa.write(
                IntRect::from_ltrb(i, win_tr_y0, i + 1, win_tr_y1),
                &raw[win_tr_y0 as usize..],
                1,
                1,
                true,
            )?;
        }
    }

    Ok(())
}
