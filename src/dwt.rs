//! The multi-level forward discrete wavelet transform.

use crate::component::{TileComponent, WaveletTransform};
use crate::error::Result;
use crate::lifting::{Dwt53, Dwt97, LiftingKernel, Sample};
use log::trace;

/// Apply the forward wavelet transform to a tile component, in place.
///
/// Each level splits the current LL region into the four sub-bands of
/// the next coarser level, leaving the buffer in the usual concatenated
/// sub-band layout (low halves towards the origin). For the
/// irreversible filter the buffer must already hold `f32` bit patterns
/// (see [`TileComponent::to_real`]).
pub fn encode(component: &mut TileComponent) -> Result<()> {
    match component.transform() {
        WaveletTransform::Reversible53 => encode_tile::<Dwt53>(component),
        WaveletTransform::Irreversible97 => encode_tile::<Dwt97>(component),
    }
}

fn encode_tile<K: LiftingKernel>(component: &mut TileComponent) -> Result<()> {
    let num_res = component.num_resolutions();
    if num_res == 1 {
        return Ok(());
    }

    let w = component.width() as usize;
    let mut line = scratch_line::<K>(component)?;

    // Levels are processed finest first; each pass transforms the
    // top-left region the previous pass left its LL samples in.
    for level in (1..num_res).rev() {
        let cur = component.resolution(level);
        let prev = component.resolution(level - 1);

        let rw = cur.rect.width() as usize;
        let rh = cur.rect.height() as usize;
        let rw1 = prev.rect.width() as usize;
        let rh1 = prev.rect.height() as usize;

        trace!("forward level {level}: {rw}x{rh} -> {rw1}x{rh1}");

        let data = component.samples_mut();

        // Vertical pass over every column of the current region.
        let s_n = rh1 as i32;
        let d_n = (rh - rh1) as i32;
        let cas = cur.cas_row();

        for j in 0..rw {
            for k in 0..rh {
                line[k] = K::Sample::from_raw(data[k * w + j]);
            }
            K::encode_line(&mut line[..rh], d_n, s_n, cas);
            deinterleave(&line[..rh], rh1, cas, |k, sample| {
                data[k * w + j] = sample.to_raw();
            });
        }

        // Horizontal pass over every row.
        let s_n = rw1 as i32;
        let d_n = (rw - rw1) as i32;
        let cas = cur.cas_col();

        for j in 0..rh {
            let row = &data[j * w..][..rw];
            for (sample, raw) in line.iter_mut().zip(row) {
                *sample = K::Sample::from_raw(*raw);
            }
            K::encode_line(&mut line[..rw], d_n, s_n, cas);
            deinterleave(&line[..rw], rw1, cas, |k, sample| {
                data[j * w + k] = sample.to_raw();
            });
        }
    }

    Ok(())
}

/// Split an interleaved line into its low half (the first `s_n`
/// positions of the destination) and high half, handing each sample to
/// `store` together with its destination index.
fn deinterleave<S: Sample>(line: &[S], s_n: usize, cas: u8, mut store: impl FnMut(usize, S)) {
    let cas = cas as usize;
    let d_n = line.len() - s_n;

    for i in 0..s_n {
        store(i, line[cas + 2 * i]);
    }
    for i in 0..d_n {
        store(s_n + i, line[1 - cas + 2 * i]);
    }
}

/// Allocate one scratch line large enough for any row or column of the
/// component.
pub(crate) fn scratch_line<K: LiftingKernel>(component: &TileComponent) -> Result<Vec<K::Sample>> {
    let len = usize::max(component.width() as usize, component.height() as usize);
    let mut line = Vec::new();
    line.try_reserve_exact(len)?;
    line.resize(len, K::Sample::default());
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::encode;
    use crate::component::{SubBandType, TileComponent, WaveletTransform};
    use crate::rect::IntRect;

    #[test]
    fn constant_image_concentrates_in_ll() {
        // One 5/3 level over a constant image: all detail bands must be
        // exactly zero.
        let rect = IntRect::from_ltrb(0, 0, 8, 8);
        let samples = vec![9; 64];
        let mut c = TileComponent::with_samples(
            rect,
            8,
            false,
            2,
            WaveletTransform::Reversible53,
            samples,
        )
        .unwrap();

        encode(&mut c).unwrap();

        let ll = c.resolution(0).rect;
        let hl = c.band_rect(1, SubBandType::HighLow);
        assert_eq!(ll.width(), 4);
        assert_eq!(hl.width(), 4);

        for y in 0..8 {
            for x in 0..8 {
                let v = c.samples()[y * 8 + x];
                if x < 4 && y < 4 {
                    assert_eq!(v, 9, "LL sample at {x},{y}");
                } else {
                    assert_eq!(v, 0, "detail sample at {x},{y}");
                }
            }
        }
    }

    #[test]
    fn single_level_is_identity() {
        let rect = IntRect::from_ltrb(0, 0, 4, 4);
        let samples: Vec<i32> = (0..16).collect();
        let mut c = TileComponent::with_samples(
            rect,
            8,
            false,
            1,
            WaveletTransform::Reversible53,
            samples.clone(),
        )
        .unwrap();

        encode(&mut c).unwrap();
        assert_eq!(c.samples(), samples);
    }
}
