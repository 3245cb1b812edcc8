//! Pre-defined signal components for synthetic biosignals

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One additive signal component, in ADC counts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalPattern {
    /// Constant offset
    Constant { level: f64 },
    /// Pure tone
    Sinusoidal {
        frequency: f64,
        amplitude: f64,
        phase: f64,
    },
    /// Tone gated on and off, like repeated muscle contractions
    Burst {
        frequency: f64,
        amplitude: f64,
        on_duration: f64,
        off_duration: f64,
    },
    /// Linear drift from `start_level` to `end_level`, then constant
    Ramp {
        start_level: f64,
        end_level: f64,
        duration: f64,
    },
}

impl SignalPattern {
    /// Component value at time `t` seconds
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            SignalPattern::Constant { level } => *level,

            SignalPattern::Sinusoidal { frequency, amplitude, phase } => {
                amplitude * (2.0 * PI * frequency * t + phase).sin()
            }

            SignalPattern::Burst { frequency, amplitude, on_duration, off_duration } => {
                let cycle = on_duration + off_duration;
                if cycle <= 0.0 || t.rem_euclid(cycle) < *on_duration {
                    amplitude * (2.0 * PI * frequency * t).sin()
                } else {
                    0.0
                }
            }

            SignalPattern::Ramp { start_level, end_level, duration } => {
                if t >= *duration {
                    *end_level
                } else {
                    start_level + (end_level - start_level) * (t / duration)
                }
            }
        }
    }

    /// Short description
    pub fn description(&self) -> &'static str {
        match self {
            SignalPattern::Constant { .. } => "Constant offset",
            SignalPattern::Sinusoidal { .. } => "Sinusoid",
            SignalPattern::Burst { .. } => "Gated burst",
            SignalPattern::Ramp { .. } => "Linear drift",
        }
    }

    /// Common named components
    pub fn presets() -> Vec<(&'static str, SignalPattern)> {
        vec![
            ("Rest", SignalPattern::Constant { level: 0.0 }),
            ("EMG Contraction", SignalPattern::Burst {
                frequency: 100.0, amplitude: 800.0, on_duration: 1.0, off_duration: 0.5
            }),
            ("EMG Tonic", SignalPattern::Sinusoidal {
                frequency: 120.0, amplitude: 300.0, phase: 0.0
            }),
            ("EEG Alpha", SignalPattern::Sinusoidal {
                frequency: 10.0, amplitude: 150.0, phase: 0.0
            }),
            ("EOG Saccade Drift", SignalPattern::Ramp {
                start_level: 0.0, end_level: 600.0, duration: 2.0
            }),
            ("Motion Artifact", SignalPattern::Sinusoidal {
                frequency: 2.0, amplitude: 500.0, phase: 0.0
            }),
        ]
    }
}
