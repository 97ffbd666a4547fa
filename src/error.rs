//! Error types for the transform pipeline.

use core::fmt;

/// The main error type for transform operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A heap allocation failed.
    OutOfMemory,
    /// An arithmetic guard on an allocation size or coordinate tripped.
    NumericOverflow,
    /// Errors related to rectangles and sparse-array regions.
    Region(RegionError),
    /// Errors surfaced by the code-block coder.
    Block(BlockError),
    /// Errors related to quantization parameters.
    Quantization(QuantizationError),
}

/// Errors related to rectangles and sparse-array regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The rectangle is empty or lies outside the array bounds.
    OutOfBounds,
    /// A constructor argument (width, height, block size) was zero.
    InvalidDimensions,
    /// A write touched a block that was never allocated.
    UnallocatedBlock,
}

/// Errors surfaced by the code-block coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The compressed stream for a code-block ended early.
    TruncatedStream,
    /// The compressed stream for a code-block is malformed.
    CorruptBlock,
}

/// Errors related to quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationError {
    /// A step-size exponent lies outside [0, 31].
    InvalidExponent,
    /// The guard-bit count lies outside [0, 7].
    InvalidGuardBits,
    /// No step size was provided for a requested sub-band.
    MissingStepSize,
    /// The derived number of magnitude bit planes is not representable.
    InvalidBitPlaneCount,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NumericOverflow => write!(f, "arithmetic overflow"),
            Self::Region(e) => write!(f, "{e}"),
            Self::Block(e) => write!(f, "{e}"),
            Self::Quantization(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds => write!(f, "region is empty or out of bounds"),
            Self::InvalidDimensions => write!(f, "invalid dimensions"),
            Self::UnallocatedBlock => write!(f, "write touched an unallocated block"),
        }
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedStream => write!(f, "truncated code-block stream"),
            Self::CorruptBlock => write!(f, "corrupt code-block stream"),
        }
    }
}

impl fmt::Display for QuantizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidExponent => write!(f, "step-size exponent out of range"),
            Self::InvalidGuardBits => write!(f, "guard-bit count out of range"),
            Self::MissingStepSize => write!(f, "missing step size for sub-band"),
            Self::InvalidBitPlaneCount => write!(f, "invalid number of bit planes"),
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for RegionError {}
impl std::error::Error for BlockError {}
impl std::error::Error for QuantizationError {}

impl From<RegionError> for Error {
    fn from(e: RegionError) -> Self {
        Self::Region(e)
    }
}

impl From<BlockError> for Error {
    fn from(e: BlockError) -> Self {
        Self::Block(e)
    }
}

impl From<QuantizationError> for Error {
    fn from(e: QuantizationError) -> Self {
        Self::Quantization(e)
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result type for transform operations.
pub type Result<T> = core::result::Result<T, Error>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

macro_rules! err {
    ($err:expr) => {
        Err($err.into())
    };
}

pub(crate) use bail;
pub(crate) use err;
