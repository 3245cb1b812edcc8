//! Conversion from raw ADC counts to physical units

use serde::{Deserialize, Serialize};

/// Full-scale count of the 14-bit acquisition ADC
pub const ADC_FULL_SCALE: f64 = 16384.0;
/// ADC reference span in millivolts
pub const ADC_REFERENCE_MV: f64 = 3300.0;

/// How raw channel values are presented to the filters
///
/// The filters are unit-agnostic; this only decides what number goes in.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdcScale {
    /// Raw ADC counts, unchanged
    #[default]
    Raw,
    /// Centred 14-bit conversion: `(raw / 16384) * 3300 - 1650`
    Centered14Bit,
}

impl AdcScale {
    /// Convert one raw ADC count
    pub fn apply(&self, raw: u16) -> f64 {
        match self {
            AdcScale::Raw => raw as f64,
            AdcScale::Centered14Bit => {
                (raw as f64 / ADC_FULL_SCALE) * ADC_REFERENCE_MV - ADC_REFERENCE_MV / 2.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_passthrough() {
        assert_eq!(AdcScale::Raw.apply(8206), 8206.0);
    }

    #[test]
    fn test_centered_conversion() {
        let scale = AdcScale::Centered14Bit;
        assert_eq!(scale.apply(0), -1650.0);
        assert_eq!(scale.apply(8192), 0.0);
        assert!((scale.apply(16384) - 1650.0).abs() < 1e-9);
    }
}
