/*!
A memory-safe, pure-Rust implementation of the JPEG 2000 transform core.

`j2k-core` provides the signal-processing pipeline that sits between a
codestream parser and an entropy coder: the forward and inverse discrete
wavelet transform over tile components (both the reversible 5/3 integer
filter and the irreversible 9/7 filter of ISO/IEC 15444-1), a
block-sparse sample array for memory-bounded region decoding, the
quantization bridge that maps signalled step sizes to per-band scaling,
and a parallel scheduler that fans code-block coding jobs out to worker
threads while aggregating rate-distortion statistics.

What it deliberately does *not* contain: file-format framing (boxes,
markers, headers), image-format I/O, color-space handling, and the
arithmetic coder itself. The coder is a capability the caller plugs in
through the [`BlockCoder`] trait; everything else is expected to live in
the surrounding layers.

# Decoding a region

```no_run
use j2k_core::{IntRect, TileComponent, WaveletTransform, idwt};

let component = TileComponent::new(
    IntRect::from_ltrb(0, 0, 4096, 4096),
    8,
    false,
    6,
    WaveletTransform::Reversible53,
).unwrap();

// Sub-band samples come out of the tier-1 decoder; only the blocks
// overlapping the window need to be provided.
let bands = vec![];
let window = IntRect::from_ltrb(1024, 1024, 1280, 1280);
let region = idwt::decode_region(&component, &bands, 6, window).unwrap();

println!("{} samples reconstructed", region.data.len());
```

# Numeric model

Sample storage is `i32` throughout. The reversible path is exact
integer arithmetic end to end. The irreversible path computes in
IEEE-754 `f32`, carried through buffers and the sparse array as bit
patterns; [`TileComponent::to_real`] and [`TileComponent::to_integer`]
convert at the pipeline boundaries.

# Safety

Unsafe code is forbidden via a crate-level attribute.
*/

#![forbid(unsafe_code)]
#![forbid(missing_docs)]

pub mod dwt;
pub mod error;
pub mod idwt;

mod component;
mod lifting;
mod quant;
mod rect;
mod sparse;
mod t1;

pub use component::{Resolution, SubBandType, TileComponent, WaveletTransform, code_block_grid};
pub use error::{BlockError, Error, QuantizationError, RegionError, Result};
pub use idwt::{RegionOutput, SubBandSamples};
pub use quant::{QuantizationBridge, QuantizationStyle, StepSize};
pub use rect::IntRect;
pub use sparse::SparseArray;
pub use t1::{
    BatchOutcome, BlockCoder, CodeBlockJob, DecodedBlock, EncodedBlock, JobInput, PassInfo,
    SchedulerOptions, T1Scheduler, Tile,
};
