//! A block-sparse two-dimensional sample array.
//!
//! Region decoding only ever touches the sub-band samples that contribute
//! to the requested window, so materializing a full tile-sized buffer
//! would defeat the point. The sparse array tiles the logical rectangle
//! into uniform blocks and allocates a block only once something is
//! written to it; a block that was never allocated reads back as zeros.

use crate::error::{Error, RegionError, Result, bail, err};
use crate::rect::IntRect;

/// A block-sparse 2-D array of `i32` samples.
///
/// Blocks are allocated lazily through [`SparseArray::alloc`] and stay
/// alive until the array is dropped. Reads of unallocated blocks yield
/// zeros; writes require every touched block to have been allocated
/// beforehand and fail with [`RegionError::UnallocatedBlock`] otherwise.
#[derive(Debug)]
pub struct SparseArray {
    width: u32,
    height: u32,
    block_width: u32,
    block_height: u32,
    block_count_hor: u32,
    blocks: Vec<Option<Vec<i32>>>,
}

/// One run of consecutive samples along an axis, clipped to a single
/// block.
#[derive(Clone, Copy)]
struct AxisSegment {
    /// The block index along the axis.
    block: u32,
    /// The offset of the run inside the block.
    offset: u32,
    /// The absolute start coordinate of the run.
    pos: u32,
    /// The length of the run.
    len: u32,
}

struct AxisSegments {
    pos: u32,
    end: u32,
    block: u32,
    block_size: u32,
}

impl AxisSegments {
    fn new(start: u32, end: u32, block_size: u32) -> Self {
        Self {
            pos: start,
            end,
            block: start / block_size,
            block_size,
        }
    }
}

impl Iterator for AxisSegments {
    type Item = AxisSegment;

    fn next(&mut self) -> Option<AxisSegment> {
        if self.pos >= self.end {
            return None;
        }

        let offset = self.pos % self.block_size;
        let len = u32::min(self.block_size - offset, self.end - self.pos);
        let segment = AxisSegment {
            block: self.block,
            offset,
            pos: self.pos,
            len,
        };

        self.block += 1;
        self.pos += len;

        Some(segment)
    }
}

impl SparseArray {
    /// Create a new sparse array covering `width`×`height` samples,
    /// tiled into `block_width`×`block_height` blocks. All arguments
    /// must be positive.
    pub fn new(width: u32, height: u32, block_width: u32, block_height: u32) -> Result<Self> {
        if width == 0 || height == 0 || block_width == 0 || block_height == 0 {
            bail!(RegionError::InvalidDimensions);
        }

        // Trailing partial blocks still get full-sized storage, so the
        // per-block sample count must be representable as well.
        (block_width as u64)
            .checked_mul(block_height as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(Error::NumericOverflow)?;

        let block_count_hor = width.div_ceil(block_width);
        let block_count_ver = height.div_ceil(block_height);
        let num_blocks = (block_count_hor as u64)
            .checked_mul(block_count_ver as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(Error::NumericOverflow)?;

        let mut blocks = Vec::new();
        blocks.try_reserve_exact(num_blocks)?;
        blocks.resize_with(num_blocks, || None);

        Ok(Self {
            width,
            height,
            block_width,
            block_height,
            block_count_hor,
            blocks,
        })
    }

    /// The logical width of the array.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The logical height of the array.
    pub fn height(&self) -> u32 {
        self.height
    }

    fn region_is_valid(&self, region: IntRect) -> bool {
        !(region.x0 >= self.width
            || region.x1 <= region.x0
            || region.x1 > self.width
            || region.y0 >= self.height
            || region.y1 <= region.y0
            || region.y1 > self.height)
    }

    fn block_index(&self, block_x: u32, block_y: u32) -> usize {
        (block_y as u64 * self.block_count_hor as u64 + block_x as u64) as usize
    }

    /// Ensure that every block intersecting `region` is allocated and
    /// zero-initialized. Invalid or empty regions are a no-op success.
    pub fn alloc(&mut self, region: IntRect) -> Result<()> {
        if !self.region_is_valid(region) {
            return Ok(());
        }

        let block_len = (self.block_width * self.block_height) as usize;

        for row in AxisSegments::new(region.y0, region.y1, self.block_height) {
            for col in AxisSegments::new(region.x0, region.x1, self.block_width) {
                let idx = self.block_index(col.block, row.block);
                if self.blocks[idx].is_none() {
                    let mut data = Vec::new();
                    data.try_reserve_exact(block_len)?;
                    data.resize(block_len, 0);
                    self.blocks[idx] = Some(data);
                }
            }
        }

        Ok(())
    }

    /// Copy the samples of `region` into `dest`.
    ///
    /// The sample at `(x, y)` of the region lands at
    /// `(y - y0) * dest_line_stride + (x - x0) * dest_col_stride`.
    /// Unallocated blocks produce zeros. If the region is invalid, the
    /// call succeeds without touching `dest` when `forgiving`, and fails
    /// with [`RegionError::OutOfBounds`] otherwise.
    pub fn read(
        &self,
        region: IntRect,
        dest: &mut [i32],
        dest_col_stride: u32,
        dest_line_stride: u32,
        forgiving: bool,
    ) -> Result<()> {
        if !self.region_is_valid(region) {
            return if forgiving {
                Ok(())
            } else {
                err!(RegionError::OutOfBounds)
            };
        }

        let col_stride = dest_col_stride as usize;
        let line_stride = dest_line_stride as usize;
        let block_width = self.block_width as usize;

        for row in AxisSegments::new(region.y0, region.y1, self.block_height) {
            for col in AxisSegments::new(region.x0, region.x1, self.block_width) {
                let dest_base = (row.pos - region.y0) as usize * line_stride
                    + (col.pos - region.x0) as usize * col_stride;
                let len = col.len as usize;

                match &self.blocks[self.block_index(col.block, row.block)] {
                    None => {
                        // Unallocated block, zero out the destination.
                        if col_stride == 1 {
                            for j in 0..row.len as usize {
                                dest[dest_base + j * line_stride..][..len].fill(0);
                            }
                        } else {
                            for j in 0..row.len as usize {
                                let dest_row = &mut dest[dest_base + j * line_stride..];
                                for k in 0..len {
                                    dest_row[k * col_stride] = 0;
                                }
                            }
                        }
                    }
                    Some(block) => {
                        let src_base = row.offset as usize * block_width + col.offset as usize;

                        if col_stride == 1 {
                            for j in 0..row.len as usize {
                                dest[dest_base + j * line_stride..][..len]
                                    .copy_from_slice(&block[src_base + j * block_width..][..len]);
                            }
                        } else {
                            for j in 0..row.len as usize {
                                let src_row = &block[src_base + j * block_width..][..len];
                                let dest_row = &mut dest[dest_base + j * line_stride..];
                                for (k, sample) in src_row.iter().enumerate() {
                                    dest_row[k * col_stride] = *sample;
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Copy samples from `src` into `region`; the inverse of
    /// [`SparseArray::read`] with the same stride semantics.
    ///
    /// Every touched block must have been allocated beforehand via
    /// [`SparseArray::alloc`].
    pub fn write(
        &mut self,
        region: IntRect,
        src: &[i32],
        src_col_stride: u32,
        src_line_stride: u32,
        forgiving: bool,
    ) -> Result<()> {
        if !self.region_is_valid(region) {
            return if forgiving {
                Ok(())
            } else {
                err!(RegionError::OutOfBounds)
            };
        }

        let col_stride = src_col_stride as usize;
        let line_stride = src_line_stride as usize;
        let block_width = self.block_width as usize;

        for row in AxisSegments::new(region.y0, region.y1, self.block_height) {
            for col in AxisSegments::new(region.x0, region.x1, self.block_width) {
                let src_base = (row.pos - region.y0) as usize * line_stride
                    + (col.pos - region.x0) as usize * col_stride;
                let len = col.len as usize;
                let idx = self.block_index(col.block, row.block);

                let Some(block) = self.blocks[idx].as_deref_mut() else {
                    bail!(RegionError::UnallocatedBlock);
                };

                let dest_base = row.offset as usize * block_width + col.offset as usize;

                if col_stride == 1 {
                    for j in 0..row.len as usize {
                        block[dest_base + j * block_width..][..len]
                            .copy_from_slice(&src[src_base + j * line_stride..][..len]);
                    }
                } else {
                    for j in 0..row.len as usize {
                        let src_row = &src[src_base + j * line_stride..];
                        let dest_row = &mut block[dest_base + j * block_width..][..len];
                        for (k, sample) in dest_row.iter_mut().enumerate() {
                            *sample = src_row[k * col_stride];
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SparseArray;
    use crate::error::{Error, RegionError};
    use crate::rect::IntRect;

    #[test]
    fn fresh_array_reads_zero() {
        let sa = SparseArray::new(10, 10, 4, 4).unwrap();
        let mut dest = vec![7; 100];
        sa.read(IntRect::from_ltrb(0, 0, 10, 10), &mut dest, 1, 10, false)
            .unwrap();
        assert!(dest.iter().all(|&v| v == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut sa = SparseArray::new(10, 10, 4, 4).unwrap();
        sa.alloc(IntRect::from_ltrb(0, 0, 10, 10)).unwrap();

        let src: Vec<i32> = (1..=16).collect();
        let region = IntRect::from_ltrb(2, 3, 6, 7);
        sa.write(region, &src, 1, 4, false).unwrap();

        let mut dest = vec![0; 16];
        sa.read(region, &mut dest, 1, 4, false).unwrap();
        assert_eq!(dest, src);

        // A disjoint region is still all zeros.
        let mut dest = vec![9; 20];
        sa.read(IntRect::from_ltrb(0, 0, 2, 10), &mut dest, 1, 2, false)
            .unwrap();
        assert!(dest.iter().all(|&v| v == 0));
    }

    #[test]
    fn strided_write_read() {
        let mut sa = SparseArray::new(12, 8, 4, 4).unwrap();
        sa.alloc(IntRect::from_ltrb(0, 0, 12, 8)).unwrap();

        // Write a 3x2 region scattered with column stride 2.
        let src = [1, 0, 2, 0, 3, 0, 10, 0, 20, 0, 30, 0];
        let region = IntRect::from_ltrb(3, 2, 6, 4);
        sa.write(region, &src, 2, 6, false).unwrap();

        let mut dest = vec![0; 6];
        sa.read(region, &mut dest, 1, 3, false).unwrap();
        assert_eq!(dest, [1, 2, 3, 10, 20, 30]);

        // Read back with column stride 3 into a scattered buffer.
        let mut dest = vec![-1; 9];
        sa.read(IntRect::from_ltrb(3, 2, 6, 3), &mut dest, 3, 9, false)
            .unwrap();
        assert_eq!(dest, [1, -1, -1, 2, -1, -1, 3, -1, -1]);
    }

    #[test]
    fn spans_multiple_blocks() {
        let mut sa = SparseArray::new(10, 10, 4, 4).unwrap();
        let region = IntRect::from_ltrb(1, 1, 10, 10);
        sa.alloc(region).unwrap();

        let src: Vec<i32> = (0..81).collect();
        sa.write(region, &src, 1, 9, false).unwrap();

        let mut dest = vec![0; 81];
        sa.read(region, &mut dest, 1, 9, false).unwrap();
        assert_eq!(dest, src);
    }

    #[test]
    fn out_of_bounds_region() {
        let sa = SparseArray::new(10, 10, 4, 4).unwrap();
        let mut dest = vec![5; 4];

        let outside = IntRect::from_ltrb(8, 8, 12, 9);
        assert_eq!(
            sa.read(outside, &mut dest, 1, 4, false),
            Err(Error::Region(RegionError::OutOfBounds))
        );
        // Forgiving reads succeed without touching the destination.
        sa.read(outside, &mut dest, 1, 4, true).unwrap();
        assert_eq!(dest, [5, 5, 5, 5]);

        let empty = IntRect::from_ltrb(3, 3, 3, 5);
        assert_eq!(
            sa.read(empty, &mut dest, 1, 4, false),
            Err(Error::Region(RegionError::OutOfBounds))
        );
    }

    #[test]
    fn write_requires_allocation() {
        let mut sa = SparseArray::new(10, 10, 4, 4).unwrap();
        sa.alloc(IntRect::from_ltrb(0, 0, 4, 4)).unwrap();

        let src = [1, 2, 3, 4];
        // The region straddles an allocated and an unallocated block.
        assert_eq!(
            sa.write(IntRect::from_ltrb(2, 2, 6, 3), &src, 1, 4, false),
            Err(Error::Region(RegionError::UnallocatedBlock))
        );
    }

    #[test]
    fn invalid_dimensions() {
        assert_eq!(
            SparseArray::new(0, 10, 4, 4).unwrap_err(),
            Error::Region(RegionError::InvalidDimensions)
        );
        assert_eq!(
            SparseArray::new(10, 10, 4, 0).unwrap_err(),
            Error::Region(RegionError::InvalidDimensions)
        );
    }

    #[test]
    fn partial_trailing_blocks() {
        // 10 is not a multiple of 4; the trailing blocks must still hold
        // the full region.
        let mut sa = SparseArray::new(10, 10, 4, 4).unwrap();
        let region = IntRect::from_ltrb(8, 8, 10, 10);
        sa.alloc(region).unwrap();

        let src = [1, 2, 3, 4];
        sa.write(region, &src, 1, 2, false).unwrap();

        let mut dest = vec![0; 4];
        sa.read(region, &mut dest, 1, 2, false).unwrap();
        assert_eq!(dest, src);
    }
}
