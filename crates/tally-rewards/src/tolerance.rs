//! Comparison tolerance.
//!
//! A value passes when `|actual - expected| <= max(absolute, ceil(relative * |expected|))`.

use serde::{Deserialize, Serialize};
use tally_types::Amount;

/// Allowed deviation between an expected and an observed amount.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    /// Smallest allowed deviation, in base units.
    pub absolute: Amount,
    /// Allowed deviation as a fraction of the expected magnitude.
    pub relative: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: 10,
            relative: 1e-4,
        }
    }
}

impl Tolerance {
    /// Zero tolerance.
    pub const EXACT: Self = Self {
        absolute: 0,
        relative: 0.0,
    };

    /// Deviation allowed around `expected`.
    pub fn allowed(&self, expected: Amount) -> Amount {
        let relative = (self.relative.max(0.0) * expected.unsigned_abs() as f64).ceil() as Amount;
        self.absolute.max(0).max(relative)
    }

    /// Compare an observed amount against the expected one.
    pub fn compare(&self, expected: Amount, actual: Amount) -> Comparison {
        let difference = actual.saturating_sub(expected);
        let allowed = self.allowed(expected);
        Comparison {
            expected,
            actual,
            difference,
            allowed,
        }
    }
}

/// Outcome of one tolerance comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    /// Expected amount.
    pub expected: Amount,
    /// Observed amount.
    pub actual: Amount,
    /// `actual - expected`.
    pub difference: Amount,
    /// Deviation allowed.
    pub allowed: Amount,
}

impl Comparison {
    /// Whether the deviation is within the allowance.
    pub fn within(&self) -> bool {
        self.difference.unsigned_abs() <= self.allowed.unsigned_abs()
    }

    /// How far past the allowance the deviation goes; zero when within.
    pub fn breach(&self) -> Amount {
        let over = self.difference.unsigned_abs().saturating_sub(self.allowed.unsigned_abs());
        Amount::try_from(over).unwrap_or(Amount::MAX)
    }
}
