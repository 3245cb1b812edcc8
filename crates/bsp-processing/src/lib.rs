//! BSP-Processing: IIR filtering for biosignals
//!
//! Butterworth and notch design, a stateful streaming filter that carries its
//! delay registers across calls, offline zero-phase filtering, sensor presets
//! and a per-channel filter bank.

pub mod bank;
pub mod design;
pub mod offline;
pub mod presets;
pub mod sos;
pub mod streaming;

pub use bank::ChannelFilterBank;
pub use design::{design_bandpass, design_highpass, design_lowpass, design_notch};
pub use offline::{filtfilt, filtfilt_channels};
pub use presets::{
    build_filter_for, design_emg, design_eeg, design_eog, BandPreset, FilterConfig, NotchConfig,
    SensorType, DEFAULT_NOTCH_HZ, DEFAULT_NOTCH_Q, DEFAULT_SAMPLING_RATE,
};
pub use sos::{Biquad, FilterSpec, NotchSpec};
pub use streaming::{FilterMode, StreamingFilter};
