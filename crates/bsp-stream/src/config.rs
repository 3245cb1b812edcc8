//! Pipeline configuration

use bsp_core::{config_error, AdcScale, BspError, BspResult, FRAME_CHANNELS};
use bsp_processing::FilterConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the acquisition pipeline needs to know up front
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Filter applied to every channel, each with its own state
    pub filter: FilterConfig,
    /// Channels taken from each frame (1 or 2)
    pub channels: usize,
    /// Filtered samples per broadcast chunk
    pub chunk_size: usize,
    /// Length of the rolling raw/filtered history per channel
    pub buffer_size: usize,
    /// Conversion applied to raw ADC counts before filtering
    pub adc_scale: AdcScale,
    /// Label carried in every chunk, e.g. "EMG"
    pub source_label: String,
    /// Serve filtered chunks to WebSocket clients on this port
    pub ws_port: Option<u16>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::realtime_emg()
    }
}

impl PipelineConfig {
    /// Two-channel EMG at 512 Hz with a 50 Hz notch
    pub fn realtime_emg() -> Self {
        let filter = FilterConfig::default();
        PipelineConfig {
            source_label: filter.sensor.label().to_string(),
            filter,
            channels: FRAME_CHANNELS,
            chunk_size: 64,
            buffer_size: 1024,
            adc_scale: AdcScale::Raw,
            ws_port: None,
        }
    }

    /// Pipeline around an explicit filter configuration
    pub fn with_filter(filter: FilterConfig) -> Self {
        PipelineConfig {
            source_label: filter.sensor.label().to_string(),
            filter,
            ..Self::realtime_emg()
        }
    }

    /// Sampling rate of the filtered stream
    pub fn sampling_rate(&self) -> f64 {
        self.filter.sampling_rate
    }

    /// Parse from a JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> BspResult<Self> {
        serde_json::from_str(json).map_err(|e| BspError::ConfigurationError {
            message: format!("invalid pipeline configuration: {}", e),
        })
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> BspResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| BspError::ConfigurationError {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json(&text)
    }

    /// Check sizes and that the filter can be designed
    pub fn validate(&self) -> BspResult<()> {
        if self.channels == 0 || self.channels > FRAME_CHANNELS {
            return Err(config_error!(
                "channels must be between 1 and {}, got {}",
                FRAME_CHANNELS,
                self.channels
            ));
        }
        if self.chunk_size == 0 {
            return Err(config_error!("chunk_size must be at least 1"));
        }
        if self.buffer_size < self.chunk_size {
            return Err(config_error!(
                "buffer_size ({}) must hold at least one chunk ({})",
                self.buffer_size,
                self.chunk_size
            ));
        }
        let fs = self.sampling_rate();
        if !fs.is_finite() || fs <= 0.0 {
            return Err(config_error!("sampling rate must be positive, got {}", fs));
        }
        self.filter.design().map(|_| ())
    }
}
