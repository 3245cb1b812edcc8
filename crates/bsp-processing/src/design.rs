//! Filter designer
//!
//! Butterworth low-pass, high-pass and band-pass filters are built in the
//! zero-pole-gain domain: analog prototype, frequency transform, bilinear
//! transform with pre-warping, then pairing into second-order sections. The
//! notch is a closed-form second-order design.
//!
//! Everything here is pure; the only failure is
//! [`BspError::InvalidFilterParameter`].

use crate::sos::{Biquad, FilterSpec, NotchSpec};
use bsp_core::{BspError, BspResult};
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::debug;

/// Zeros, poles and gain of a transfer function
#[derive(Debug, Clone)]
struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}

/// Design a Butterworth band-pass between `low_hz` and `high_hz`
///
/// The result has `order` sections (a band-pass of prototype order N has 2N
/// poles). Requires `0 < low_hz < high_hz < fs_hz / 2`.
pub fn design_bandpass(low_hz: f64, high_hz: f64, fs_hz: f64, order: usize) -> BspResult<FilterSpec> {
    validate_rate(fs_hz)?;
    validate_order(order)?;
    validate_cutoff("low_hz", low_hz, fs_hz)?;
    validate_cutoff("high_hz", high_hz, fs_hz)?;
    if low_hz >= high_hz {
        return Err(BspError::invalid_parameter(
            "low_hz",
            format!("must be below high_hz ({} Hz), got {} Hz", high_hz, low_hz),
        ));
    }

    let wl = prewarp(low_hz, fs_hz);
    let wh = prewarp(high_hz, fs_hz);
    let analog = lowpass_to_bandpass(butterworth_prototype(order), (wl * wh).sqrt(), wh - wl);
    let spec = zpk_to_spec(bilinear(analog, fs_hz))?;

    debug!(low_hz, high_hz, fs_hz, order, sections = spec.section_count(), "designed band-pass");
    Ok(spec)
}

/// Design a Butterworth low-pass with `ceil(order / 2)` sections
pub fn design_lowpass(cutoff_hz: f64, fs_hz: f64, order: usize) -> BspResult<FilterSpec> {
    validate_rate(fs_hz)?;
    validate_order(order)?;
    validate_cutoff("cutoff_hz", cutoff_hz, fs_hz)?;

    let analog = lowpass_to_lowpass(butterworth_prototype(order), prewarp(cutoff_hz, fs_hz));
    let spec = zpk_to_spec(bilinear(analog, fs_hz))?;

    debug!(cutoff_hz, fs_hz, order, sections = spec.section_count(), "designed low-pass");
    Ok(spec)
}

/// Design a Butterworth high-pass with `ceil(order / 2)` sections
pub fn design_highpass(cutoff_hz: f64, fs_hz: f64, order: usize) -> BspResult<FilterSpec> {
    validate_rate(fs_hz)?;
    validate_order(order)?;
    validate_cutoff("cutoff_hz", cutoff_hz, fs_hz)?;

    let analog = lowpass_to_highpass(butterworth_prototype(order), prewarp(cutoff_hz, fs_hz));
    let spec = zpk_to_spec(bilinear(analog, fs_hz))?;

    debug!(cutoff_hz, fs_hz, order, sections = spec.section_count(), "designed high-pass");
    Ok(spec)
}

/// Design a second-order notch at `center_hz`
///
/// The -3 dB bandwidth is `center_hz / quality_factor`, so a higher Q gives a
/// narrower notch.
pub fn design_notch(center_hz: f64, fs_hz: f64, quality_factor: f64) -> BspResult<NotchSpec> {
    validate_rate(fs_hz)?;
    validate_cutoff("center_hz", center_hz, fs_hz)?;
    if !quality_factor.is_finite() || quality_factor <= 0.0 {
        return Err(BspError::invalid_parameter(
            "quality_factor",
            format!("must be a positive number, got {}", quality_factor),
        ));
    }

    let w0 = 2.0 * PI * center_hz / fs_hz;
    let bandwidth = w0 / quality_factor;
    let beta = (bandwidth / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos_w0 = w0.cos();

    let b = vec![gain, -2.0 * gain * cos_w0, gain];
    let a = vec![1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0];

    debug!(center_hz, fs_hz, quality_factor, "designed notch");
    NotchSpec::new(b, a)
}

fn validate_rate(fs_hz: f64) -> BspResult<()> {
    if !fs_hz.is_finite() || fs_hz <= 0.0 {
        return Err(BspError::invalid_parameter(
            "fs_hz",
            format!("sampling rate must be a positive number, got {}", fs_hz),
        ));
    }
    Ok(())
}

fn validate_order(order: usize) -> BspResult<()> {
    if order == 0 {
        return Err(BspError::invalid_parameter("order", "filter order must be at least 1"));
    }
    Ok(())
}

fn validate_cutoff(parameter: &'static str, freq_hz: f64, fs_hz: f64) -> BspResult<()> {
    let nyquist = fs_hz / 2.0;
    if !freq_hz.is_finite() || freq_hz <= 0.0 {
        return Err(BspError::invalid_parameter(
            parameter,
            format!("must be above 0 Hz, got {} Hz", freq_hz),
        ));
    }
    if freq_hz >= nyquist {
        return Err(BspError::invalid_parameter(
            parameter,
            format!("must be below Nyquist ({} Hz), got {} Hz", nyquist, freq_hz),
        ));
    }
    Ok(())
}

/// Analog frequency whose bilinear image lands on `freq_hz`
fn prewarp(freq_hz: f64, fs_hz: f64) -> f64 {
    2.0 * fs_hz * (PI * freq_hz / fs_hz).tan()
}

/// Normalized analog Butterworth prototype: N poles on the left half of the unit circle
fn butterworth_prototype(order: usize) -> Zpk {
    let n = order as f64;
    let poles = (0..order)
        .map(|k| {
            let m = -(n - 1.0) + 2.0 * k as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect();

    Zpk {
        zeros: Vec::new(),
        poles,
        gain: 1.0,
    }
}

fn relative_degree(zpk: &Zpk) -> usize {
    zpk.poles.len() - zpk.zeros.len()
}

fn lowpass_to_lowpass(zpk: Zpk, wo: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    Zpk {
        zeros: zpk.zeros.iter().map(|z| *z * wo).collect(),
        poles: zpk.poles.iter().map(|p| *p * wo).collect(),
        gain: zpk.gain * wo.powi(degree as i32),
    }
}

fn lowpass_to_highpass(zpk: Zpk, wo: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let num: Complex64 = zpk.zeros.iter().map(|z| -*z).product();
    let den: Complex64 = zpk.poles.iter().map(|p| -*p).product();

    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(|z| wo / *z).collect();
    zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: zpk.poles.iter().map(|p| wo / *p).collect(),
        gain: zpk.gain * (num / den).re,
    }
}

fn lowpass_to_bandpass(zpk: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let split = |roots: &[Complex64]| -> Vec<Complex64> {
        let scaled: Vec<Complex64> = roots.iter().map(|r| *r * (bw / 2.0)).collect();
        let offsets: Vec<Complex64> = scaled.iter().map(|r| (*r * *r - wo * wo).sqrt()).collect();
        scaled
            .iter()
            .zip(&offsets)
            .map(|(r, d)| *r + *d)
            .chain(scaled.iter().zip(&offsets).map(|(r, d)| *r - *d))
            .collect()
    };

    let mut zeros = split(&zpk.zeros);
    zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: split(&zpk.poles),
        gain: zpk.gain * bw.powi(degree as i32),
    }
}

/// Map an analog design to the z-plane; zeros at infinity land on z = -1
fn bilinear(zpk: Zpk, fs_hz: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let fs2 = 2.0 * fs_hz;

    let num: Complex64 = zpk.zeros.iter().map(|z| fs2 - *z).product();
    let den: Complex64 = zpk.poles.iter().map(|p| fs2 - *p).product();

    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(|z| (fs2 + *z) / (fs2 - *z)).collect();
    zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: zpk.poles.iter().map(|p| (fs2 + *p) / (fs2 - *p)).collect(),
        gain: zpk.gain * (num / den).re,
    }
}

/// Group roots into conjugate pairs, real pairs and at most one lone real root
///
/// Real roots are paired from opposite ends of the sorted list so that zeros
/// at +1 and -1 share a section.
fn group_roots(roots: &[Complex64]) -> Vec<Vec<Complex64>> {
    let tolerance = |r: &Complex64| 1e-10 * r.norm().max(1.0);

    let mut groups: Vec<Vec<Complex64>> = roots
        .iter()
        .filter(|r| r.im > tolerance(r))
        .map(|r| vec![*r, r.conj()])
        .collect();

    let mut reals: Vec<f64> = roots
        .iter()
        .filter(|r| r.im.abs() <= tolerance(r))
        .map(|r| r.re)
        .collect();
    reals.sort_by(|a, b| a.total_cmp(b));

    let (mut lo, mut hi) = (0, reals.len());
    while hi - lo >= 2 {
        groups.push(vec![Complex64::new(reals[lo], 0.0), Complex64::new(reals[hi - 1], 0.0)]);
        lo += 1;
        hi -= 1;
    }
    if hi - lo == 1 {
        groups.push(vec![Complex64::new(reals[lo], 0.0)]);
    }
    groups
}

/// Real polynomial coefficients `[1, c1, c2]` for one or two roots
fn section_polynomial(roots: &[Complex64]) -> [f64; 3] {
    match roots {
        [] => [1.0, 0.0, 0.0],
        [r] => [1.0, -r.re, 0.0],
        [r1, r2, ..] => [1.0, -(*r1 + *r2).re, (*r1 * *r2).re],
    }
}

/// Pair a digital design into second-order sections
///
/// A lone real pole runs first; the remaining sections are ordered by pole
/// radius so the most resonant section runs last. The overall gain is folded
/// into the first section's numerator.
fn zpk_to_spec(zpk: Zpk) -> BspResult<FilterSpec> {
    let mut pole_groups = group_roots(&zpk.poles);
    pole_groups.sort_by(|a, b| {
        let radius = |g: &Vec<Complex64>| g.iter().map(|p| p.norm()).fold(0.0, f64::max);
        (a.len(), radius(a)).partial_cmp(&(b.len(), radius(b))).unwrap_or(std::cmp::Ordering::Equal)
    });

    let (mut lone_zeros, mut paired_zeros): (Vec<_>, Vec<_>) =
        group_roots(&zpk.zeros).into_iter().partition(|g| g.len() == 1);

    let mut sections = Vec::with_capacity(pole_groups.len());
    for poles in &pole_groups {
        let zeros = if poles.len() == 1 {
            lone_zeros.pop().or_else(|| paired_zeros.pop())
        } else {
            paired_zeros.pop().or_else(|| lone_zeros.pop())
        }
        .unwrap_or_default();

        sections.push(Biquad::new(section_polynomial(&zeros), section_polynomial(poles))?);
    }

    if let Some(first) = sections.first_mut() {
        first.b0 *= zpk.gain;
        first.b1 *= zpk.gain;
        first.b2 *= zpk.gain;
    }

    FilterSpec::new(sections)
}
