//! Acquisition front end for the BSP filters
//!
//! Reads framed ADC samples from any byte source, filters each channel in real
//! time and broadcasts filtered chunks, optionally to WebSocket clients.

pub mod config;
pub mod pipeline;
pub mod reader;
pub mod ws;

pub use config::PipelineConfig;
pub use pipeline::{
    start_pipeline, BufferSnapshot, ChannelStats, FilterPipeline, FilteredChunk, PipelineCommand,
    PipelineHandle, PipelineStats, RecordedSample,
};
pub use reader::{FrameReader, ReaderStats};
pub use ws::{ChunkServer, DEFAULT_WS_PORT};
