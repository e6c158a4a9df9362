//! Signed s16.15 fixed-point input values
//!
//! Ring-buffer slots hold unsigned 16-bit magnitudes. The neuron stage wants
//! a signed accumulator in physical units, obtained by shifting the
//! magnitude left by a per-type amount and reading the result with 15
//! fractional bits.

use core::{fmt, ops};

/// s16.15 fixed-point number (1 sign bit, 16 integer bits, 15 fractional bits)
///
/// Range: [-65536.0, 65535.99997] with ~0.00003 precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Accum(i32);

impl Accum {
    /// Number of fractional bits
    pub const FRAC_BITS: u32 = 15;
    /// Scale factor (2^15 = 32768)
    pub const SCALE: i32 = 1 << Self::FRAC_BITS;
    /// Maximum representable value
    pub const MAX: Self = Self(i32::MAX);
    /// Minimum representable value
    pub const MIN: Self = Self(i32::MIN);
    /// Zero value
    pub const ZERO: Self = Self(0);
    /// One value
    pub const ONE: Self = Self(Self::SCALE);

    /// Create from raw bits
    #[inline(always)]
    pub const fn from_bits(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw bits
    #[inline(always)]
    pub const fn to_bits(self) -> i32 {
        self.0
    }

    /// Interpret `magnitude << shift` as s16.15, saturating at [`Accum::MAX`]
    #[inline]
    pub const fn from_weight(magnitude: u16, shift: u8) -> Self {
        let wide = (magnitude as u64) << (shift as u32);
        if wide > i32::MAX as u64 {
            Self::MAX
        } else {
            Self(wide as i32)
        }
    }

    /// Create from float (use sparingly, prefer compile-time constants)
    #[inline]
    pub fn from_f32(value: f32) -> Self {
        if value >= 65535.0 {
            Self::MAX
        } else if value <= -65536.0 {
            Self::MIN
        } else {
            Self((value * Self::SCALE as f32) as i32)
        }
    }

    /// Convert to float (for reporting)
    #[inline]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    /// Saturating addition
    #[inline(always)]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction
    #[inline(always)]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Negate, mapping `MIN` to `MAX`
    #[inline(always)]
    pub const fn neg(self) -> Self {
        if self.0 == i32::MIN {
            Self::MAX
        } else {
            Self(-self.0)
        }
    }
}

impl ops::Add for Accum {
    type Output = Self;

    #[inline(always)]
    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

impl ops::Sub for Accum {
    type Output = Self;

    #[inline(always)]
    fn sub(self, other: Self) -> Self {
        self.saturating_sub(other)
    }
}

impl ops::Neg for Accum {
    type Output = Self;

    #[inline(always)]
    fn neg(self) -> Self {
        Accum::neg(self)
    }
}

impl fmt::Display for Accum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}", self.to_f32())
    }
}
