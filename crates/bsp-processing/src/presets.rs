//! Sensor presets and filter configuration
//!
//! Each biosignal keeps its informative energy in a known band: EMG between
//! 20 and 450 Hz, EEG between 0.5 and 40 Hz, EOG below 10 Hz. A [`FilterConfig`]
//! picks one of those bands (or an explicit override) plus an optional mains
//! notch, and builds a ready [`StreamingFilter`].

use crate::design::{design_bandpass, design_notch};
use crate::sos::{FilterSpec, NotchSpec};
use crate::streaming::StreamingFilter;
use bsp_core::{BspError, BspResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Default mains frequency in Hz
pub const DEFAULT_NOTCH_HZ: f64 = 50.0;
/// Default notch quality factor
pub const DEFAULT_NOTCH_Q: f64 = 30.0;
/// Default sampling rate of the acquisition board in Hz
pub const DEFAULT_SAMPLING_RATE: f64 = 512.0;

/// Band-pass corners and order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPreset {
    /// Lower -3 dB corner (Hz)
    pub low_hz: f64,
    /// Upper -3 dB corner (Hz)
    pub high_hz: f64,
    /// Butterworth prototype order
    pub order: usize,
}

impl BandPreset {
    /// Surface EMG: 20-450 Hz, order 4
    pub const EMG: BandPreset = BandPreset { low_hz: 20.0, high_hz: 450.0, order: 4 };
    /// General purpose EEG, delta to low gamma: 0.5-40 Hz, order 4
    pub const EEG: BandPreset = BandPreset { low_hz: 0.5, high_hz: 40.0, order: 4 };
    /// EOG: 0.05-10 Hz, order 3
    pub const EOG: BandPreset = BandPreset { low_hz: 0.05, high_hz: 10.0, order: 3 };

    /// Design this band at `fs_hz` without any clamping
    pub fn design(&self, fs_hz: f64) -> BspResult<FilterSpec> {
        design_bandpass(self.low_hz, self.high_hz, fs_hz, self.order)
    }
}

/// Biosignal type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    /// Electromyography
    #[default]
    Emg,
    /// Electroencephalography
    Eeg,
    /// Electrooculography
    Eog,
}

impl SensorType {
    /// Nominal band for this sensor
    pub fn band(&self) -> BandPreset {
        match self {
            SensorType::Emg => BandPreset::EMG,
            SensorType::Eeg => BandPreset::EEG,
            SensorType::Eog => BandPreset::EOG,
        }
    }

    /// Design the preset band-pass for this sensor
    pub fn design(&self, fs_hz: f64) -> BspResult<FilterSpec> {
        match self {
            SensorType::Emg => design_emg(fs_hz),
            SensorType::Eeg => design_eeg(fs_hz),
            SensorType::Eog => design_eog(fs_hz),
        }
    }

    /// Short upper-case label
    pub fn label(&self) -> &'static str {
        match self {
            SensorType::Emg => "EMG",
            SensorType::Eeg => "EEG",
            SensorType::Eog => "EOG",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SensorType {
    type Err = BspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emg" => Ok(SensorType::Emg),
            "eeg" => Ok(SensorType::Eeg),
            "eog" => Ok(SensorType::Eog),
            other => Err(BspError::invalid_parameter(
                "sensor",
                format!("expected one of emg, eeg, eog, got `{}`", other),
            )),
        }
    }
}

/// EMG band-pass at `fs_hz`
///
/// When 450 Hz is at or above Nyquist the upper corner drops to 90% of
/// Nyquist, so the preset still works at the usual 512 Hz board rate.
pub fn design_emg(fs_hz: f64) -> BspResult<FilterSpec> {
    let band = emg_band(fs_hz);
    design_bandpass(band.low_hz, band.high_hz, fs_hz, band.order)
}

/// EEG band-pass at `fs_hz`
pub fn design_eeg(fs_hz: f64) -> BspResult<FilterSpec> {
    BandPreset::EEG.design(fs_hz)
}

/// EOG band-pass at `fs_hz`
pub fn design_eog(fs_hz: f64) -> BspResult<FilterSpec> {
    BandPreset::EOG.design(fs_hz)
}

fn emg_band(fs_hz: f64) -> BandPreset {
    let nyquist = fs_hz / 2.0;
    let mut band = BandPreset::EMG;
    if band.high_hz >= nyquist {
        band.high_hz = 0.9 * nyquist;
        debug!(fs_hz, high_hz = band.high_hz, "clamped EMG upper corner below Nyquist");
    }
    band
}

/// Mains notch settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotchConfig {
    /// Centre frequency (Hz), 50 or 60 depending on the grid
    pub frequency: f64,
    /// Quality factor; higher is narrower
    pub quality_factor: f64,
}

impl NotchConfig {
    /// Notch at `frequency` with the default Q
    pub fn at(frequency: f64) -> Self {
        NotchConfig {
            frequency,
            quality_factor: DEFAULT_NOTCH_Q,
        }
    }

    /// Design the notch at `fs_hz`
    pub fn design(&self, fs_hz: f64) -> BspResult<NotchSpec> {
        design_notch(self.frequency, fs_hz, self.quality_factor)
    }
}

impl Default for NotchConfig {
    fn default() -> Self {
        NotchConfig::at(DEFAULT_NOTCH_HZ)
    }
}

/// Complete description of one channel's filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Sensor preset used when no band override is given
    pub sensor: SensorType,
    /// Sampling rate (Hz)
    pub sampling_rate: f64,
    /// Explicit band replacing the sensor preset
    pub band: Option<BandPreset>,
    /// Mains notch, `None` to disable
    pub notch: Option<NotchConfig>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::emg(DEFAULT_SAMPLING_RATE)
    }
}

impl FilterConfig {
    /// EMG preset with a 50 Hz notch
    pub fn emg(sampling_rate: f64) -> Self {
        Self::for_sensor(SensorType::Emg, sampling_rate)
    }

    /// EEG preset with a 50 Hz notch
    pub fn eeg(sampling_rate: f64) -> Self {
        Self::for_sensor(SensorType::Eeg, sampling_rate)
    }

    /// EOG preset with a 50 Hz notch
    pub fn eog(sampling_rate: f64) -> Self {
        Self::for_sensor(SensorType::Eog, sampling_rate)
    }

    /// Preset for `sensor` with a 50 Hz notch
    pub fn for_sensor(sensor: SensorType, sampling_rate: f64) -> Self {
        FilterConfig {
            sensor,
            sampling_rate,
            band: None,
            notch: Some(NotchConfig::default()),
        }
    }

    /// Replace the notch frequency, or drop the notch with `None`
    pub fn with_notch(mut self, frequency: Option<f64>) -> Self {
        let base = self.notch.unwrap_or_default();
        self.notch = frequency.map(|frequency| NotchConfig { frequency, ..base });
        self
    }

    /// Replace the sensor band with an explicit one
    pub fn with_band(mut self, band: BandPreset) -> Self {
        self.band = Some(band);
        self
    }

    /// Band actually designed, after any preset clamping
    pub fn effective_band(&self) -> BandPreset {
        match (self.band, self.sensor) {
            (Some(band), _) => band,
            (None, SensorType::Emg) => emg_band(self.sampling_rate),
            (None, sensor) => sensor.band(),
        }
    }

    /// Design the cascade and the notch
    pub fn design(&self) -> BspResult<(FilterSpec, Option<NotchSpec>)> {
        let spec = match self.band {
            Some(band) => band.design(self.sampling_rate)?,
            None => self.sensor.design(self.sampling_rate)?,
        };
        let notch = self
            .notch
            .map(|n| n.design(self.sampling_rate))
            .transpose()?;
        Ok((spec, notch))
    }

    /// Build a cold streaming filter
    pub fn build(&self) -> BspResult<StreamingFilter> {
        let (spec, notch) = self.design()?;
        Ok(StreamingFilter::new(Some(spec), notch))
    }

    /// Human-readable summary, e.g. `EMG band-pass 20-230.4 Hz (order 4), notch 50 Hz (Q 30) @ 512 Hz`
    pub fn describe(&self) -> String {
        let band = self.effective_band();
        let notch = match self.notch {
            Some(n) => format!("notch {} Hz (Q {})", n.frequency, n.quality_factor),
            None => "no notch".to_string(),
        };
        format!(
            "{} band-pass {}-{} Hz (order {}), {} @ {} Hz",
            self.sensor, band.low_hz, band.high_hz, band.order, notch, self.sampling_rate
        )
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> BspResult<Self> {
        serde_json::from_str(json).map_err(|e| BspError::ConfigurationError {
            message: format!("invalid filter configuration: {}", e),
        })
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> BspResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BspError::ConfigurationError {
            message: format!("cannot serialize filter configuration: {}", e),
        })
    }
}

/// Build the preset filter for `sensor`, with a notch at `notch_hz` if given
///
/// Returns the cold filter and a one-line description of what was built.
pub fn build_filter_for(
    sensor: SensorType,
    fs_hz: f64,
    notch_hz: Option<f64>,
) -> BspResult<(StreamingFilter, String)> {
    let config = FilterConfig::for_sensor(sensor, fs_hz).with_notch(notch_hz);
    let filter = config.build()?;
    Ok((filter, config.describe()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emg_clamped_at_512_hz() {
        let band = emg_band(512.0);
        assert!((band.high_hz - 230.4).abs() < 1e-12);

        let spec = design_emg(512.0).unwrap();
        assert_eq!(spec.section_count(), 4);
        assert!(spec.is_stable());
        assert!((spec.magnitude_at(230.4, 512.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_emg_unclamped_at_high_rate() {
        assert_eq!(emg_band(2000.0), BandPreset::EMG);
        let spec = design_emg(2000.0).unwrap();
        assert!((spec.magnitude_at(450.0, 2000.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_only_for_emg_preset() {
        // Explicit bands are never clamped
        assert!(BandPreset::EMG.design(512.0).is_err());
        let config = FilterConfig::emg(512.0).with_band(BandPreset::EMG);
        assert!(config.build().is_err());
    }

    #[test]
    fn test_eeg_and_eog_presets() {
        let eeg = design_eeg(250.0).unwrap();
        assert_eq!(eeg.section_count(), 4);
        assert!(eeg.is_stable());
        assert!(eeg.magnitude_at(10.0, 250.0) > 0.99);

        let eog = design_eog(250.0).unwrap();
        assert_eq!(eog.section_count(), 3);
        assert!(eog.is_stable());
        assert!(eog.magnitude_at(50.0, 250.0) < 0.01);
    }

    #[test]
    fn test_sensor_parsing() {
        assert_eq!("EMG".parse::<SensorType>().unwrap(), SensorType::Emg);
        assert_eq!(" eog ".parse::<SensorType>().unwrap(), SensorType::Eog);
        assert!(matches!(
            "ecg".parse::<SensorType>(),
            Err(BspError::InvalidFilterParameter { parameter: "sensor", .. })
        ));
    }

    #[test]
    fn test_build_filter_for() {
        let (filter, description) = build_filter_for(SensorType::Emg, 512.0, Some(60.0)).unwrap();
        assert_eq!(filter.spec().map(FilterSpec::section_count), Some(4));
        assert!(filter.notch().is_some());
        assert!(description.starts_with("EMG band-pass 20-230.4 Hz"));
        assert!(description.contains("notch 60 Hz"));

        let (filter, description) = build_filter_for(SensorType::Eeg, 512.0, None).unwrap();
        assert!(filter.notch().is_none());
        assert!(description.contains("no notch"));
    }

    #[test]
    fn test_config_json() {
        let config = FilterConfig::from_json(r#"{"sensor": "eeg", "sampling_rate": 256.0}"#).unwrap();
        assert_eq!(config.sensor, SensorType::Eeg);
        assert_eq!(config.notch, Some(NotchConfig::default()));

        let config = FilterConfig::from_json(r#"{"notch": null}"#).unwrap();
        assert_eq!(config.sensor, SensorType::Emg);
        assert_eq!(config.sampling_rate, DEFAULT_SAMPLING_RATE);
        assert!(config.notch.is_none());

        let custom = FilterConfig::eog(128.0)
            .with_band(BandPreset { low_hz: 0.1, high_hz: 8.0, order: 2 })
            .with_notch(Some(60.0));
        let back = FilterConfig::from_json(&custom.to_json().unwrap()).unwrap();
        assert_eq!(back, custom);

        assert!(matches!(
            FilterConfig::from_json("{ not json"),
            Err(BspError::ConfigurationError { .. })
        ));
    }
}
