//! Filter coefficient containers
//!
//! [`FilterSpec`] is a cascade of second-order sections; [`NotchSpec`] is a
//! single direct-form numerator/denominator pair. Both are immutable once
//! built and can be shared between any number of filter instances.

use bsp_core::{BspError, BspResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One second-order section with `a0` normalized to 1
///
/// `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Build a section from raw numerator and denominator, dividing through by `a[0]`
    pub fn new(b: [f64; 3], a: [f64; 3]) -> BspResult<Self> {
        let a0 = a[0];
        if a0 == 0.0 || !a0.is_finite() {
            return Err(BspError::invalid_parameter(
                "a0",
                "leading denominator coefficient must be finite and non-zero",
            ));
        }
        if b.iter().chain(a.iter()).any(|c| !c.is_finite()) {
            return Err(BspError::invalid_parameter(
                "coefficients",
                "all section coefficients must be finite",
            ));
        }

        Ok(Biquad {
            b0: b[0] / a0,
            b1: b[1] / a0,
            b2: b[2] / a0,
            a1: a[1] / a0,
            a2: a[2] / a0,
        })
    }

    /// Section that passes its input unchanged
    pub const fn identity() -> Self {
        Biquad {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Coefficients in `[b0, b1, b2, a0, a1, a2]` order
    pub fn to_array(&self) -> [f64; 6] {
        [self.b0, self.b1, self.b2, 1.0, self.a1, self.a2]
    }

    /// Both poles strictly inside the unit circle
    ///
    /// Jury criterion for `z^2 + a1 z + a2`.
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }

    /// Complex response at normalized angular frequency `omega` (rad/sample)
    pub fn response(&self, omega: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = z2 * self.b2 + z1 * self.b1 + self.b0;
        let den = z2 * self.a2 + z1 * self.a1 + 1.0;
        num / den
    }

    /// Gain for a constant input, `None` when a pole sits at DC
    pub fn dc_gain(&self) -> Option<f64> {
        let den = 1.0 + self.a1 + self.a2;
        (den != 0.0).then(|| (self.b0 + self.b1 + self.b2) / den)
    }

    /// True for a first-order section stored in biquad form
    pub fn is_first_order(&self) -> bool {
        self.b2 == 0.0 && self.a2 == 0.0
    }
}

/// Cascade of second-order sections describing one recursive filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    sections: Vec<Biquad>,
}

impl FilterSpec {
    /// Wrap an ordered list of sections; at least one is required
    pub fn new(sections: Vec<Biquad>) -> BspResult<Self> {
        if sections.is_empty() {
            return Err(BspError::invalid_parameter(
                "sections",
                "a filter needs at least one second-order section",
            ));
        }
        Ok(FilterSpec { sections })
    }

    /// Build from rows of `[b0, b1, b2, a0, a1, a2]`
    pub fn from_sos(rows: &[[f64; 6]]) -> BspResult<Self> {
        let sections = rows
            .iter()
            .map(|r| Biquad::new([r[0], r[1], r[2]], [r[3], r[4], r[5]]))
            .collect::<BspResult<Vec<_>>>()?;
        FilterSpec::new(sections)
    }

    /// Sections in processing order
    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Number of sections in the cascade
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Coefficient rows as `[b0, b1, b2, a0, a1, a2]`
    pub fn to_sos(&self) -> Vec<[f64; 6]> {
        self.sections.iter().map(Biquad::to_array).collect()
    }

    /// Every section has its poles strictly inside the unit circle
    pub fn is_stable(&self) -> bool {
        self.sections.iter().all(Biquad::is_stable)
    }

    /// Complex response of the whole cascade at `freq_hz`
    pub fn frequency_response(&self, freq_hz: f64, fs_hz: f64) -> Complex64 {
        let omega = 2.0 * PI * freq_hz / fs_hz;
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(omega))
    }

    /// Linear magnitude of the cascade response at `freq_hz`
    pub fn magnitude_at(&self, freq_hz: f64, fs_hz: f64) -> f64 {
        self.frequency_response(freq_hz, fs_hz).norm()
    }
}

/// Single recursive stage in direct numerator/denominator form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotchSpec {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl NotchSpec {
    /// Build from `b` and `a`, normalizing so that `a[0] == 1`
    pub fn new(b: Vec<f64>, a: Vec<f64>) -> BspResult<Self> {
        if b.is_empty() || a.is_empty() {
            return Err(BspError::invalid_parameter(
                "coefficients",
                "numerator and denominator must both be non-empty",
            ));
        }
        let a0 = a[0];
        if a0 == 0.0 || !a0.is_finite() {
            return Err(BspError::invalid_parameter(
                "a0",
                "leading denominator coefficient must be finite and non-zero",
            ));
        }
        if b.iter().chain(a.iter()).any(|c| !c.is_finite()) {
            return Err(BspError::invalid_parameter(
                "coefficients",
                "all coefficients must be finite",
            ));
        }

        Ok(NotchSpec {
            b: b.into_iter().map(|c| c / a0).collect(),
            a: a.into_iter().map(|c| c / a0).collect(),
        })
    }

    /// Numerator coefficients
    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Denominator coefficients, `a[0] == 1`
    pub fn a(&self) -> &[f64] {
        &self.a
    }

    /// Length of the input/output history this stage keeps
    pub fn history_len(&self) -> usize {
        self.b.len().max(self.a.len())
    }

    /// Complex response at `freq_hz`
    pub fn frequency_response(&self, freq_hz: f64, fs_hz: f64) -> Complex64 {
        let omega = 2.0 * PI * freq_hz / fs_hz;
        let poly = |coeffs: &[f64]| {
            coeffs
                .iter()
                .enumerate()
                .fold(Complex64::new(0.0, 0.0), |acc, (k, &c)| {
                    acc + Complex64::from_polar(c, -omega * k as f64)
                })
        };
        poly(&self.b) / poly(&self.a)
    }

    /// Linear magnitude of the response at `freq_hz`
    pub fn magnitude_at(&self, freq_hz: f64, fs_hz: f64) -> f64 {
        self.frequency_response(freq_hz, fs_hz).norm()
    }

    /// Gain for a constant input, `None` when a pole sits at DC
    pub fn dc_gain(&self) -> Option<f64> {
        let den: f64 = self.a.iter().sum();
        (den != 0.0).then(|| self.b.iter().sum::<f64>() / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biquad_normalizes_a0() {
        let s = Biquad::new([2.0, 4.0, 2.0], [2.0, -1.0, 0.5]).unwrap();
        assert_eq!(s.to_array(), [1.0, 2.0, 1.0, 1.0, -0.5, 0.25]);
        assert!(Biquad::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]).is_err());
        assert!(Biquad::new([f64::NAN, 0.0, 0.0], [1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_biquad_stability() {
        // Poles at 0.5 and 0.4
        let stable = Biquad::new([1.0, 0.0, 0.0], [1.0, -0.9, 0.2]).unwrap();
        assert!(stable.is_stable());

        // Pole pair on the unit circle
        let marginal = Biquad::new([1.0, 0.0, 0.0], [1.0, 0.0, 1.0]).unwrap();
        assert!(!marginal.is_stable());

        // Real pole at 1.5
        let unstable = Biquad::new([1.0, 0.0, 0.0], [1.0, -1.5, 0.0]).unwrap();
        assert!(!unstable.is_stable());
    }

    #[test]
    fn test_identity_response() {
        let spec = FilterSpec::new(vec![Biquad::identity()]).unwrap();
        assert!((spec.magnitude_at(37.0, 512.0) - 1.0).abs() < 1e-15);
        assert_eq!(Biquad::identity().dc_gain(), Some(1.0));
    }

    #[test]
    fn test_empty_spec_rejected() {
        assert!(FilterSpec::new(Vec::new()).is_err());
        assert!(FilterSpec::from_sos(&[]).is_err());
    }

    #[test]
    fn test_sos_rows() {
        let rows = [[1.0, 2.0, 1.0, 1.0, -0.5, 0.25], [1.0, -2.0, 1.0, 2.0, 0.0, 0.5]];
        let spec = FilterSpec::from_sos(&rows).unwrap();
        assert_eq!(spec.section_count(), 2);
        assert_eq!(spec.to_sos()[1], [0.5, -1.0, 0.5, 1.0, 0.0, 0.25]);
    }

    #[test]
    fn test_notch_spec_normalization() {
        let notch = NotchSpec::new(vec![2.0, 0.0, 2.0], vec![2.0, 0.0, 1.0]).unwrap();
        assert_eq!(notch.b(), &[1.0, 0.0, 1.0]);
        assert_eq!(notch.a(), &[1.0, 0.0, 0.5]);
        assert_eq!(notch.history_len(), 3);
        assert!(NotchSpec::new(vec![], vec![1.0]).is_err());
        assert!(NotchSpec::new(vec![1.0], vec![0.0, 1.0]).is_err());
    }
}
