//! One independent streaming filter per channel

use crate::presets::FilterConfig;
use crate::streaming::StreamingFilter;
use bsp_core::{BspError, BspResult};

/// Set of per-channel filters built from the same design
///
/// Channels never share state, so a multi-channel frame is filtered exactly as
/// if each channel had its own single-channel stream.
#[derive(Debug, Clone)]
pub struct ChannelFilterBank {
    filters: Vec<StreamingFilter>,
}

impl ChannelFilterBank {
    /// Build `channels` cold filters from `config`
    pub fn new(config: &FilterConfig, channels: usize) -> BspResult<Self> {
        Ok(Self::from_filter(config.build()?, channels))
    }

    /// Replicate `template` (state included) across `channels`
    pub fn from_filter(template: StreamingFilter, channels: usize) -> Self {
        ChannelFilterBank {
            filters: vec![template; channels],
        }
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.filters.len()
    }

    /// Filter for channel `index`
    pub fn channel(&self, index: usize) -> Option<&StreamingFilter> {
        self.filters.get(index)
    }

    /// Filter one sample per channel
    pub fn process_frame(&mut self, samples: &[f64]) -> BspResult<Vec<f64>> {
        self.check_channels(samples.len())?;
        Ok(self
            .filters
            .iter_mut()
            .zip(samples)
            .map(|(filter, &x)| filter.process_one(x))
            .collect())
    }

    /// Filter one block per channel in place
    pub fn process_blocks(&mut self, blocks: &mut [Vec<f64>]) -> BspResult<()> {
        self.check_channels(blocks.len())?;
        for (filter, block) in self.filters.iter_mut().zip(blocks.iter_mut()) {
            filter.process_block_in_place(block);
        }
        Ok(())
    }

    /// Return every channel to the cold state
    pub fn reset(&mut self) {
        self.filters.iter_mut().for_each(StreamingFilter::reset);
    }

    fn check_channels(&self, actual: usize) -> BspResult<()> {
        if actual != self.filters.len() {
            return Err(BspError::ChannelCountMismatch {
                expected: self.filters.len(),
                actual,
            });
        }
        Ok(())
    }
}
