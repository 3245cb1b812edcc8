//! Stateful streaming filter
//!
//! A [`StreamingFilter`] carries the delay registers of one channel across
//! calls, so a stream can be filtered one sample at a time or in chunks of any
//! size with the same result. Zero state means "the signal was at rest before
//! the first sample"; the startup transient that follows is expected.
//!
//! The filter holds plain data only. All mutating methods take `&mut self`,
//! so one instance belongs to one producer; use one filter per channel.

use crate::sos::{Biquad, FilterSpec, NotchSpec};
use serde::{Deserialize, Serialize};

/// Whether the filter has seen a sample since construction or the last reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    /// State is zero
    Cold,
    /// State reflects at least one processed sample
    Running,
}

/// Delay registers `w[n-1]`, `w[n-2]` of one section
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    w1: f64,
    w2: f64,
}

impl SectionState {
    #[inline]
    fn step(&mut self, s: &Biquad, x: f64) -> f64 {
        let w = x - s.a1 * self.w1 - s.a2 * self.w2;
        let y = s.b0 * w + s.b1 * self.w1 + s.b2 * self.w2;
        self.w2 = self.w1;
        self.w1 = w;
        y
    }
}

/// Input/output history of the notch stage kept in a ring
///
/// `x[(head + i) % len]` is the input `i` samples ago, likewise for `y`.
#[derive(Debug, Clone)]
struct NotchState {
    x: Vec<f64>,
    y: Vec<f64>,
    head: usize,
}

impl NotchState {
    fn new(len: usize) -> Self {
        NotchState {
            x: vec![0.0; len],
            y: vec![0.0; len],
            head: 0,
        }
    }

    #[inline]
    fn step(&mut self, spec: &NotchSpec, x: f64) -> f64 {
        let len = self.x.len();
        self.head = (self.head + len - 1) % len;
        self.x[self.head] = x;

        let mut acc = 0.0;
        for (i, b) in spec.b().iter().enumerate() {
            acc += b * self.x[(self.head + i) % len];
        }
        for (i, a) in spec.a().iter().enumerate().skip(1) {
            acc -= a * self.y[(self.head + i) % len];
        }

        self.y[self.head] = acc;
        acc
    }

    fn clear(&mut self) {
        self.x.iter_mut().for_each(|v| *v = 0.0);
        self.y.iter_mut().for_each(|v| *v = 0.0);
        self.head = 0;
    }

    fn fill(&mut self, input: f64, output: f64) {
        self.x.iter_mut().for_each(|v| *v = input);
        self.y.iter_mut().for_each(|v| *v = output);
        self.head = 0;
    }
}

/// Causal IIR filter: an optional section cascade followed by an optional notch
///
/// Constructed with neither stage it is an exact passthrough.
#[derive(Debug, Clone)]
pub struct StreamingFilter {
    spec: Option<FilterSpec>,
    notch: Option<NotchSpec>,
    sections: Vec<SectionState>,
    notch_state: Option<NotchState>,
    mode: FilterMode,
    samples_processed: u64,
}

impl StreamingFilter {
    /// Create a filter with zeroed state
    pub fn new(spec: Option<FilterSpec>, notch: Option<NotchSpec>) -> Self {
        let sections = spec
            .as_ref()
            .map(|s| vec![SectionState::default(); s.section_count()])
            .unwrap_or_default();
        let notch_state = notch.as_ref().map(|n| NotchState::new(n.history_len()));

        StreamingFilter {
            spec,
            notch,
            sections,
            notch_state,
            mode: FilterMode::Cold,
            samples_processed: 0,
        }
    }

    /// Filter that returns every input unchanged
    pub fn passthrough() -> Self {
        Self::new(None, None)
    }

    /// Filter one sample
    pub fn process_one(&mut self, x: f64) -> f64 {
        let mut y = x;
        if let Some(spec) = &self.spec {
            for (section, state) in spec.sections().iter().zip(self.sections.iter_mut()) {
                y = state.step(section, y);
            }
        }
        if let (Some(notch), Some(state)) = (&self.notch, self.notch_state.as_mut()) {
            y = state.step(notch, y);
        }

        self.samples_processed += 1;
        self.mode = FilterMode::Running;
        y
    }

    /// Filter a block, returning a new vector
    ///
    /// Output and final state match calling [`process_one`](Self::process_one)
    /// for every element in order.
    pub fn process_block(&mut self, xs: &[f64]) -> Vec<f64> {
        let mut out = xs.to_vec();
        self.process_block_in_place(&mut out);
        out
    }

    /// Filter a block in place
    ///
    /// Runs one section across the whole block before the next, which keeps
    /// each section's coefficients and registers hot.
    pub fn process_block_in_place(&mut self, xs: &mut [f64]) {
        if xs.is_empty() {
            return;
        }

        if let Some(spec) = &self.spec {
            for (section, state) in spec.sections().iter().zip(self.sections.iter_mut()) {
                for x in xs.iter_mut() {
                    *x = state.step(section, *x);
                }
            }
        }
        if let (Some(notch), Some(state)) = (&self.notch, self.notch_state.as_mut()) {
            for x in xs.iter_mut() {
                *x = state.step(notch, *x);
            }
        }

        self.samples_processed += xs.len() as u64;
        self.mode = FilterMode::Running;
    }

    /// Zero all state and return to [`FilterMode::Cold`]
    pub fn reset(&mut self) {
        self.sections
            .iter_mut()
            .for_each(|s| *s = SectionState::default());
        if let Some(state) = self.notch_state.as_mut() {
            state.clear();
        }
        self.samples_processed = 0;
        self.mode = FilterMode::Cold;
    }

    /// Load the state a constant input `level` would have produced forever
    ///
    /// Used by the zero-phase filter to start each pass without a step
    /// transient. Sections with a pole at DC are left at zero.
    pub(crate) fn settle(&mut self, level: f64) {
        let mut input = level;
        if let Some(spec) = &self.spec {
            for (section, state) in spec.sections().iter().zip(self.sections.iter_mut()) {
                let den = 1.0 + section.a1 + section.a2;
                let w = if den != 0.0 { input / den } else { 0.0 };
                state.w1 = w;
                state.w2 = w;
                input = w * (section.b0 + section.b1 + section.b2);
            }
        }
        if let (Some(notch), Some(state)) = (&self.notch, self.notch_state.as_mut()) {
            let output = notch.dc_gain().map(|g| g * input).unwrap_or(0.0);
            state.fill(input, output);
        }
        self.mode = FilterMode::Running;
    }

    /// Current mode
    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// No cascade and no notch configured
    pub fn is_passthrough(&self) -> bool {
        self.spec.is_none() && self.notch.is_none()
    }

    /// Section cascade, if configured
    pub fn spec(&self) -> Option<&FilterSpec> {
        self.spec.as_ref()
    }

    /// Notch stage, if configured
    pub fn notch(&self) -> Option<&NotchSpec> {
        self.notch.as_ref()
    }

    /// Samples filtered since construction or the last reset
    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{design_bandpass, design_lowpass, design_notch};
    use crate::presets::design_emg;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    const FS: f64 = 512.0;

    fn emg_filter() -> StreamingFilter {
        let spec = design_emg(FS).unwrap();
        let notch = design_notch(50.0, FS, 30.0).unwrap();
        StreamingFilter::new(Some(spec), Some(notch))
    }

    fn sine(freq: f64, amplitude: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * freq * n as f64 / FS).sin())
            .collect()
    }

    /// Amplitude of the `freq` component over a window holding a whole number of cycles
    fn tone_amplitude(xs: &[f64], freq: f64) -> f64 {
        let n = xs.len() as f64;
        let (re, im) = xs.iter().enumerate().fold((0.0, 0.0), |(re, im), (k, x)| {
            let phase = 2.0 * PI * freq * k as f64 / FS;
            (re + x * phase.cos(), im - x * phase.sin())
        });
        2.0 / n * (re * re + im * im).sqrt()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_new_filter_is_cold() {
        let mut filter = emg_filter();
        assert_eq!(filter.mode(), FilterMode::Cold);
        assert!(!filter.is_passthrough());

        filter.process_one(1.0);
        assert_eq!(filter.mode(), FilterMode::Running);
        assert_eq!(filter.samples_processed(), 1);

        filter.reset();
        assert_eq!(filter.mode(), FilterMode::Cold);
        assert_eq!(filter.samples_processed(), 0);
    }

    #[test]
    fn test_passthrough_is_exact() {
        let mut filter = StreamingFilter::passthrough();
        assert!(filter.is_passthrough());

        for x in [0.0, -1.5, 8206.0, 1e300, f64::MIN_POSITIVE, -0.0] {
            assert_eq!(filter.process_one(x).to_bits(), x.to_bits());
        }
        let block = vec![3.25, -7.0, 12345.678];
        assert_eq!(filter.process_block(&block), block);
    }

    #[test]
    fn test_block_matches_sample_by_sample() {
        let mut rng = StdRng::seed_from_u64(7);
        let input: Vec<f64> = (0..2000).map(|_| rng.gen_range(-500.0..500.0)).collect();

        let mut one = emg_filter();
        let expected: Vec<f64> = input.iter().map(|&x| one.process_one(x)).collect();

        let mut block = emg_filter();
        assert_eq!(block.process_block(&input), expected);
        assert_eq!(block.samples_processed(), one.samples_processed());
    }

    #[test]
    fn test_arbitrary_chunking_matches_single_pass() {
        let mut rng = StdRng::seed_from_u64(42);
        let input: Vec<f64> = (0..3000).map(|_| rng.gen_range(-1.0..1.0) * 1000.0).collect();

        let mut whole = emg_filter();
        let expected = whole.process_block(&input);

        for _ in 0..10 {
            let mut chunked = emg_filter();
            let mut output = Vec::with_capacity(input.len());
            let mut rest = &input[..];
            while !rest.is_empty() {
                let take = rng.gen_range(1..=rest.len().min(97));
                let (chunk, tail) = rest.split_at(take);
                output.extend(chunked.process_block(chunk));
                rest = tail;
            }

            assert_eq!(output.len(), expected.len());
            assert!(output.iter().zip(&expected).all(|(a, b)| close(*a, *b)));
        }
    }

    #[test]
    fn test_empty_block() {
        let mut filter = emg_filter();
        assert!(filter.process_block(&[]).is_empty());
        assert_eq!(filter.mode(), FilterMode::Cold);
    }

    #[test]
    fn test_reset_replays_identically() {
        let input = sine(37.0, 100.0, 700);

        let mut fresh = emg_filter();
        let expected = fresh.process_block(&input);

        let mut reused = emg_filter();
        reused.process_block(&sine(80.0, 3.0, 321));
        reused.reset();
        assert_eq!(reused.process_block(&input), expected);
    }

    #[test]
    fn test_nan_and_inf_propagate() {
        let mut filter = emg_filter();
        filter.process_block(&sine(100.0, 1.0, 64));

        assert!(filter.process_one(f64::NAN).is_nan());
        assert!(!filter.process_one(0.0).is_finite());

        let mut filter = emg_filter();
        assert!(!filter.process_one(f64::INFINITY).is_finite());
    }

    #[test]
    fn test_passband_gain_within_one_db() {
        let spec = design_bandpass(20.0, 200.0, FS, 4).unwrap();
        let mut filter = StreamingFilter::new(Some(spec), None);

        // 64 Hz is bin 64 of a 512-sample window
        let output = filter.process_block(&sine(64.0, 1.0, 2048));
        let gain_db = 20.0 * tone_amplitude(&output[1536..], 64.0).log10();
        assert!(gain_db.abs() < 1.0, "gain {} dB", gain_db);
    }

    #[test]
    fn test_notch_centre_attenuated() {
        let notch = design_notch(50.0, FS, 30.0).unwrap();
        let mut filter = StreamingFilter::new(None, Some(notch));

        let output = filter.process_block(&sine(50.0, 1.0, 4096));
        let gain_db = 20.0 * tone_amplitude(&output[3584..], 50.0).log10();
        assert!(gain_db <= -20.0, "notch only reached {} dB", gain_db);
    }

    #[test]
    fn test_emg_scenario_at_512_hz() {
        let len = 2048;
        let input: Vec<f64> = sine(5.0, 1.0, len)
            .iter()
            .zip(sine(50.0, 1.0, len))
            .zip(sine(100.0, 1.0, len))
            .map(|((a, b), c)| a + b + c)
            .collect();

        let mut filter = emg_filter();
        let output = filter.process_block(&input);
        let window = &output[len - 512..];

        let a100 = tone_amplitude(window, 100.0);
        let a50 = tone_amplitude(window, 50.0);
        let a5 = tone_amplitude(window, 5.0);
        assert!((a100 - 1.0).abs() < 0.1, "100 Hz amplitude {}", a100);
        assert!(a50 < 0.1, "50 Hz amplitude {}", a50);
        assert!(a5 < 0.1, "5 Hz amplitude {}", a5);
    }

    /// Cascade plus notch written out with plain arrays, no shared code
    fn reference_filter(spec: &FilterSpec, notch: &NotchSpec, input: &[f64]) -> Vec<f64> {
        let rows = spec.to_sos();
        let mut w = vec![[0.0_f64; 2]; rows.len()];
        let b = notch.b().to_vec();
        let a = notch.a().to_vec();
        let mut xh = vec![0.0; b.len()];
        let mut yh = vec![0.0; a.len()];

        input
            .iter()
            .map(|&x| {
                let mut v = x;
                for (row, reg) in rows.iter().zip(w.iter_mut()) {
                    let wn = v - row[4] * reg[0] - row[5] * reg[1];
                    v = row[0] * wn + row[1] * reg[0] + row[2] * reg[1];
                    reg[1] = reg[0];
                    reg[0] = wn;
                }

                xh.rotate_right(1);
                xh[0] = v;
                let mut y: f64 = b.iter().zip(&xh).map(|(c, h)| c * h).sum();
                y -= a.iter().skip(1).zip(&yh).map(|(c, h)| c * h).sum::<f64>();
                yh.rotate_right(1);
                yh[0] = y;
                y
            })
            .collect()
    }

    #[test]
    fn test_first_sample_oracle() {
        let raw = f64::from(u16::from_be_bytes([0x20, 0x0E]));
        assert_eq!(raw, 8206.0);

        let spec = design_emg(FS).unwrap();
        let notch = design_notch(50.0, FS, 30.0).unwrap();
        let expected = reference_filter(&spec, &notch, &[raw])[0];

        let mut filter = emg_filter();
        let first = filter.process_one(raw);
        assert!(close(first, expected), "{} vs {}", first, expected);

        // From rest the cascade reduces to the leading numerator terms
        let leading: f64 = spec.sections().iter().map(|s| s.b0).product();
        assert!(close(first, leading * notch.b()[0] * raw));
    }

    #[test]
    fn test_matches_reference_over_long_run() {
        let mut rng = StdRng::seed_from_u64(3);
        let input: Vec<f64> = (0..1500).map(|_| rng.gen_range(0.0..16384.0)).collect();

        let spec = design_emg(FS).unwrap();
        let notch = design_notch(60.0, FS, 30.0).unwrap();
        let expected = reference_filter(&spec, &notch, &input);

        let mut filter = StreamingFilter::new(Some(spec), Some(notch));
        let output = filter.process_block(&input);
        assert!(output.iter().zip(&expected).all(|(a, b)| close(*a, *b)));
    }

    #[test]
    fn test_settle_holds_constant_input() {
        let spec = design_lowpass(40.0, FS, 3).unwrap();
        let notch = design_notch(50.0, FS, 30.0).unwrap();
        let mut filter = StreamingFilter::new(Some(spec), Some(notch));
        filter.settle(250.0);
        assert_eq!(filter.mode(), FilterMode::Running);

        // Both stages have unity DC gain
        for _ in 0..50 {
            assert!(close(filter.process_one(250.0), 250.0));
        }
    }

    #[test]
    fn test_filter_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<StreamingFilter>();
    }
}
