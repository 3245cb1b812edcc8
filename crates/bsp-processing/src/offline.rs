//! Offline zero-phase filtering
//!
//! Forward-backward filtering of a complete recording for post-hoc analysis.
//! Each stage runs forward, then backward over the reversed output, cancelling
//! the phase delay. Edges are handled with odd reflection padding and each pass
//! starts from the steady state for its first sample, matching the usual
//! `filtfilt` conventions.

use crate::sos::{FilterSpec, NotchSpec};
use crate::streaming::StreamingFilter;
use bsp_core::{BspError, BspResult};
use rayon::prelude::*;

/// Zero-phase filter `xs` through the cascade, then the notch
///
/// With neither stage the input is returned as a copy. Fails with
/// [`BspError::SignalTooShort`] if `xs` is not longer than a stage's padding.
pub fn filtfilt(
    spec: Option<&FilterSpec>,
    notch: Option<&NotchSpec>,
    xs: &[f64],
) -> BspResult<Vec<f64>> {
    let mut out = xs.to_vec();

    if let Some(spec) = spec {
        let filter = StreamingFilter::new(Some(spec.clone()), None);
        out = forward_backward(filter, cascade_padlen(spec), &out)?;
    }
    if let Some(notch) = notch {
        let filter = StreamingFilter::new(None, Some(notch.clone()));
        out = forward_backward(filter, notch_padlen(notch), &out)?;
    }

    Ok(out)
}

/// Zero-phase filter several independent channels in parallel
pub fn filtfilt_channels(
    spec: Option<&FilterSpec>,
    notch: Option<&NotchSpec>,
    channels: &[Vec<f64>],
) -> BspResult<Vec<Vec<f64>>> {
    channels
        .par_iter()
        .map(|xs| filtfilt(spec, notch, xs))
        .collect()
}

/// Padding used for a section cascade
///
/// Three times the tap count, with first-order sections not counting their
/// missing second tap.
fn cascade_padlen(spec: &FilterSpec) -> usize {
    let sections = spec.sections();
    let zero_b2 = sections.iter().filter(|s| s.b2 == 0.0).count();
    let zero_a2 = sections.iter().filter(|s| s.a2 == 0.0).count();
    let ntaps = 2 * sections.len() + 1 - zero_b2.min(zero_a2);
    3 * ntaps
}

fn notch_padlen(notch: &NotchSpec) -> usize {
    3 * notch.history_len()
}

fn forward_backward(mut filter: StreamingFilter, padlen: usize, xs: &[f64]) -> BspResult<Vec<f64>> {
    if xs.len() <= padlen {
        return Err(BspError::SignalTooShort {
            len: xs.len(),
            required: padlen,
        });
    }

    let mut ext = odd_extend(xs, padlen);

    filter.settle(ext[0]);
    filter.process_block_in_place(&mut ext);
    ext.reverse();

    filter.settle(ext[0]);
    filter.process_block_in_place(&mut ext);
    ext.reverse();

    Ok(ext[padlen..padlen + xs.len()].to_vec())
}

/// Point-reflect `n` samples about each end: `2*x[0] - x[i]` and `2*x[last] - x[i]`
///
/// Requires `n < xs.len()`.
fn odd_extend(xs: &[f64], n: usize) -> Vec<f64> {
    let len = xs.len();
    let first = xs[0];
    let last = xs[len - 1];

    let mut ext = Vec::with_capacity(len + 2 * n);
    ext.extend((1..=n).rev().map(|i| 2.0 * first - xs[i]));
    ext.extend_from_slice(xs);
    ext.extend((len - 1 - n..len - 1).rev().map(|i| 2.0 * last - xs[i]));
    ext
}
