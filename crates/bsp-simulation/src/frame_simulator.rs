//! Two-channel acquisition board simulator
//!
//! Produces the same 8-byte frames as the firmware: each channel is a sum of
//! [`SignalPattern`] components around a DC offset, plus powerline hum and
//! gaussian noise, quantized to the 14-bit ADC range. Optionally a stray byte
//! is injected before a frame to exercise decoder resynchronization.

use crate::signal_patterns::SignalPattern;
use bsp_core::{BspError, BspResult, Frame, FRAME_CHANNELS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Largest value the 14-bit ADC can report
pub const ADC_MAX: u16 = 16383;
/// Mid-scale count, the resting level of a centred channel
pub const ADC_MIDSCALE: f64 = 8192.0;

/// Components summed on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// DC level in counts
    pub dc_offset: f64,
    /// Additive components in counts
    pub patterns: Vec<SignalPattern>,
}

impl ChannelConfig {
    /// Channel sitting at mid-scale with the given components
    pub fn centred(patterns: Vec<SignalPattern>) -> Self {
        ChannelConfig {
            dc_offset: ADC_MIDSCALE,
            patterns,
        }
    }
}

/// Mains interference added to every channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerlineConfig {
    /// Mains frequency (Hz)
    pub frequency: f64,
    /// Amplitude in counts
    pub amplitude: f64,
}

/// Configuration for the frame simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Frame rate in Hz
    pub sampling_rate: f64,
    /// One entry per frame channel
    pub channels: Vec<ChannelConfig>,
    /// Powerline hum, `None` for a clean supply
    pub powerline: Option<PowerlineConfig>,
    /// Gaussian noise standard deviation in counts (0.0 = no noise)
    pub noise_std: f64,
    /// Probability of a stray byte before each frame (0.0 to 1.0)
    pub corrupt_probability: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 512.0,
            channels: vec![
                ChannelConfig::centred(vec![
                    SignalPattern::Burst {
                        frequency: 100.0,
                        amplitude: 800.0,
                        on_duration: 1.0,
                        off_duration: 0.5,
                    },
                    SignalPattern::Sinusoidal { frequency: 2.0, amplitude: 200.0, phase: 0.0 },
                ]),
                ChannelConfig::centred(vec![SignalPattern::Sinusoidal {
                    frequency: 10.0,
                    amplitude: 400.0,
                    phase: 0.0,
                }]),
            ],
            powerline: Some(PowerlineConfig { frequency: 50.0, amplitude: 300.0 }),
            noise_std: 20.0,
            corrupt_probability: 0.0,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    /// Check ranges before building a simulator
    pub fn validate(&self) -> BspResult<()> {
        if !self.sampling_rate.is_finite() || self.sampling_rate <= 0.0 {
            return Err(BspError::ConfigurationError {
                message: format!("sampling rate must be positive, got {}", self.sampling_rate),
            });
        }
        if self.channels.len() != FRAME_CHANNELS {
            return Err(BspError::ChannelCountMismatch {
                expected: FRAME_CHANNELS,
                actual: self.channels.len(),
            });
        }
        if !self.noise_std.is_finite() || self.noise_std < 0.0 {
            return Err(BspError::ConfigurationError {
                message: format!("noise_std must be non-negative, got {}", self.noise_std),
            });
        }
        if !(0.0..=1.0).contains(&self.corrupt_probability) {
            return Err(BspError::ConfigurationError {
                message: format!(
                    "corrupt_probability must be within [0, 1], got {}",
                    self.corrupt_probability
                ),
            });
        }
        Ok(())
    }
}

/// Deterministic (when seeded) source of wire frames
pub struct FrameSimulator {
    config: SimulatorConfig,
    rng: StdRng,
    noise: Normal<f64>,
    sample_index: u64,
    sequence: u8,
}

impl FrameSimulator {
    /// Create a simulator; an unseeded config draws its seed from the OS
    pub fn new(config: SimulatorConfig) -> BspResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, config.noise_std).map_err(|e| BspError::ConfigurationError {
            message: format!("Failed to create normal distribution: {}", e),
        })?;

        Ok(FrameSimulator {
            config,
            rng,
            noise,
            sample_index: 0,
            sequence: 0,
        })
    }

    /// Produce the next frame
    pub fn next_frame(&mut self) -> Frame {
        let t = self.sample_index as f64 / self.config.sampling_rate;
        let ch0 = quantize(self.channel_value(0, t));
        let ch1 = quantize(self.channel_value(1, t));

        let frame = Frame::new(self.sequence, ch0, ch1);
        self.sample_index += 1;
        self.sequence = self.sequence.wrapping_add(1);
        frame
    }

    /// Produce `count` consecutive frames
    pub fn generate_frames(&mut self, count: usize) -> Vec<Frame> {
        (0..count).map(|_| self.next_frame()).collect()
    }

    /// Produce `count` frames as wire bytes, with stray bytes injected per
    /// `corrupt_probability`
    pub fn generate_bytes(&mut self, count: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(count * bsp_core::FRAME_LEN + count / 8);
        for _ in 0..count {
            if self.config.corrupt_probability > 0.0
                && self.rng.gen::<f64>() < self.config.corrupt_probability
            {
                bytes.push(self.rng.gen());
            }
            let frame = self.next_frame();
            bytes.extend_from_slice(&frame.encode());
        }
        bytes
    }

    /// Frames needed to cover `seconds` of signal
    pub fn frames_for(&self, seconds: f64) -> usize {
        (seconds * self.config.sampling_rate).round().max(0.0) as usize
    }

    /// Simulated time of the next frame
    pub fn elapsed(&self) -> f64 {
        self.sample_index as f64 / self.config.sampling_rate
    }

    /// Restart time and the sequence counter; the random stream continues
    pub fn reset_time(&mut self) {
        self.sample_index = 0;
        self.sequence = 0;
    }

    /// Get current configuration
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Replace the configuration, keeping time and the random stream
    pub fn update_config(&mut self, config: SimulatorConfig) -> BspResult<()> {
        config.validate()?;
        self.noise = Normal::new(0.0, config.noise_std).map_err(|e| BspError::ConfigurationError {
            message: format!("Failed to create normal distribution: {}", e),
        })?;
        self.config = config;
        Ok(())
    }

    fn channel_value(&mut self, channel: usize, t: f64) -> f64 {
        let config = &self.config.channels[channel];
        let mut value = config.dc_offset;
        value += config.patterns.iter().map(|p| p.value_at(t)).sum::<f64>();

        if let Some(hum) = self.config.powerline {
            value += hum.amplitude * (2.0 * PI * hum.frequency * t).sin();
        }
        if self.config.noise_std > 0.0 {
            value += self.noise.sample(&mut self.rng);
        }
        value
    }
}

/// Round to the nearest count and saturate at the ADC rails
fn quantize(value: f64) -> u16 {
    value.round().clamp(0.0, ADC_MAX as f64) as u16
}
