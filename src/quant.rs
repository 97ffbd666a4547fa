//! Quantization parameters and the per-band scaling they imply.

use crate::component::{SubBandType, WaveletTransform};
use crate::error::{QuantizationError, Result, bail, err};

/// The largest representable number of magnitude bit planes.
const MAX_BIT_PLANES: u16 = 31;

/// One quantization step size: an 11-bit mantissa and a 5-bit exponent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepSize {
    /// The mantissa `μ_b`.
    pub mantissa: u16,
    /// The exponent `ε_b`.
    pub exponent: u16,
}

/// How per-band step sizes are derived from the signalled values
/// (A.6.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantizationStyle {
    /// Reversible path: only exponents are signalled, no scaling.
    NoQuantization,
    /// A single step size, spread over the bands by E-5.
    ScalarDerived,
    /// One explicit step size per band.
    ScalarExpounded,
}

/// Maps sub-band step sizes to the numeric scaling the block coder and
/// the dequantization stage need.
#[derive(Debug)]
pub struct QuantizationBridge {
    style: QuantizationStyle,
    guard_bits: u8,
    step_sizes: Vec<StepSize>,
    num_decompositions: u8,
    precision: u8,
    transform: WaveletTransform,
}

impl QuantizationBridge {
    /// Create a bridge from signalled quantization parameters.
    ///
    /// `step_sizes` holds one entry for the deepest LL band followed by
    /// three entries (HL, LH, HH) per decomposition level for the
    /// expounded styles, or a single entry for the derived style.
    /// Exponents must lie in [0, 31] and the guard-bit count in [0, 7];
    /// a reversible transform additionally implies zero mantissas.
    pub fn new(
        style: QuantizationStyle,
        guard_bits: u8,
        step_sizes: Vec<StepSize>,
        num_decompositions: u8,
        precision: u8,
        transform: WaveletTransform,
    ) -> Result<Self> {
        if guard_bits > 7 {
            bail!(QuantizationError::InvalidGuardBits);
        }

        for step in &step_sizes {
            if step.exponent > 31 {
                bail!(QuantizationError::InvalidExponent);
            }
            if transform == WaveletTransform::Reversible53 && step.mantissa != 0 {
                bail!(QuantizationError::InvalidExponent);
            }
        }

        Ok(Self {
            style,
            guard_bits,
            step_sizes,
            num_decompositions,
            precision,
            transform,
        })
    }

    /// The guard-bit count.
    pub fn guard_bits(&self) -> u8 {
        self.guard_bits
    }

    /// The signalled quantization style.
    pub fn style(&self) -> QuantizationStyle {
        self.style
    }

    /// The step size of a band, used to dequantize its block
    /// coefficients.
    pub fn decode_scale(&self, level: u8, band: SubBandType) -> Result<StepSize> {
        self.step_size(level, band)
    }

    /// The multiplicative dequantization factor of a band:
    /// `Δ_b = 2^(R_b − ε_b) · (1 + μ_b / 2^11)`, with `R_b` the sample
    /// precision plus the band's log gain (E-3). Reversible components
    /// scale by exactly 1.
    pub fn dequantization_factor(&self, level: u8, band: SubBandType) -> Result<f32> {
        if self.style == QuantizationStyle::NoQuantization {
            return Ok(1.0);
        }

        let step = self.step_size(level, band)?;
        let r_b = self.precision as u16 + band.log_gain();

        Ok(2.0_f32.powf(r_b as f32 - step.exponent as f32)
            * (1.0 + step.mantissa as f32 / (1 << 11) as f32))
    }

    /// The factor to multiply coefficients with before the block coder;
    /// the reciprocal of [`QuantizationBridge::dequantization_factor`].
    pub fn encode_scale(&self, level: u8, band: SubBandType) -> Result<f32> {
        Ok(1.0 / self.dequantization_factor(level, band)?)
    }

    /// The number of magnitude bit planes `K_max` of a band, per
    /// equation E-2: guard bits plus the band exponent, minus one.
    pub fn num_bit_planes(&self, level: u8, band: SubBandType) -> Result<u8> {
        let step = self.step_size(level, band)?;

        let count = (self.guard_bits as u16)
            .checked_add(step.exponent)
            .and_then(|v| v.checked_sub(1))
            .ok_or(QuantizationError::InvalidBitPlaneCount)?;

        if count > MAX_BIT_PLANES {
            bail!(QuantizationError::InvalidBitPlaneCount);
        }

        Ok(count as u8)
    }

    /// Whether coefficients stay integers all the way through.
    pub fn is_reversible(&self) -> bool {
        self.transform == WaveletTransform::Reversible53
    }

    fn step_size(&self, level: u8, band: SubBandType) -> Result<StepSize> {
        debug_assert!((level == 0) == (band == SubBandType::LowLow));

        let sb_index = match band {
            SubBandType::LowLow => 0,
            SubBandType::HighLow => 0,
            SubBandType::LowHigh => 1,
            SubBandType::HighHigh => 2,
        };

        match self.style {
            QuantizationStyle::NoQuantization | QuantizationStyle::ScalarExpounded => {
                let entry = if level == 0 {
                    self.step_sizes.first()
                } else {
                    self.step_sizes.get(1 + (level as usize - 1) * 3 + sb_index)
                };

                entry
                    .copied()
                    .ok_or_else(|| QuantizationError::MissingStepSize.into())
            }
            QuantizationStyle::ScalarDerived => {
                let base = self
                    .step_sizes
                    .first()
                    .copied()
                    .ok_or(QuantizationError::MissingStepSize)?;

                let n_ll = self.num_decompositions as u16;
                let n_b = if level == 0 {
                    n_ll
                } else {
                    n_ll + 1 - level as u16
                };

                // Equation E-5: the deepest exponent, shifted by how
                // much shallower this band sits.
                let exponent = base
                    .exponent
                    .checked_sub(n_ll)
                    .and_then(|e| e.checked_add(n_b))
                    .filter(|e| *e <= 31);

                match exponent {
                    Some(exponent) => Ok(StepSize {
                        mantissa: base.mantissa,
                        exponent,
                    }),
                    None => err!(QuantizationError::InvalidExponent),
                }
            }
        }
    }
}
