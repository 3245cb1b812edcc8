//! Acquisition pipeline service
//!
//! Consumes [`AcquisitionEvent`]s, filters every channel with its own
//! [`StreamingFilter`](bsp_processing::StreamingFilter), keeps rolling raw and
//! filtered histories, and broadcasts filtered chunks to any number of
//! subscribers. Recording, snapshots and resets are driven by
//! [`PipelineCommand`]s.

use crate::config::PipelineConfig;
use bsp_core::{AcquisitionEvent, AcquisitionObserver, BspError, BspResult, Frame, SessionState};
use bsp_processing::ChannelFilterBank;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Filtered samples ready for display or streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredChunk {
    /// Source label from the configuration
    pub source: String,
    /// Sampling rate (Hz)
    pub fs: f64,
    /// Session time of the first sample in milliseconds
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    /// One vector of filtered samples per channel
    pub window: Vec<Vec<f64>>,
}

/// One recorded sample row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSample {
    /// Session time in seconds
    pub time_s: f64,
    /// Frame sequence number
    pub sequence: u8,
    /// Scaled input, one value per channel
    pub raw: Vec<f64>,
    /// Filtered output, one value per channel
    pub filtered: Vec<f64>,
}

/// Copy of the rolling histories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub raw: Vec<Vec<f64>>,
    pub filtered: Vec<Vec<f64>>,
    pub timestamps: Vec<f64>,
    pub sample_count: u64,
    pub chunks_sent: u64,
}

/// Running summary of one filtered channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: u64,
}

impl Default for ChannelStats {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            count: 0,
        }
    }
}

impl ChannelStats {
    fn update(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.mean += (value - self.mean) / self.count as f64;
    }
}

/// Statistics about the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub is_acquiring: bool,
    pub is_recording: bool,
    pub sample_count: u64,
    pub chunks_sent: u64,
    pub frames_dropped: u64,
    pub channels: Vec<ChannelStats>,
}

/// Commands for controlling the pipeline
#[derive(Debug)]
pub enum PipelineCommand {
    /// Start collecting [`RecordedSample`] rows, discarding any previous ones
    StartRecording,
    /// Stop recording and hand back the collected rows
    StopRecording(oneshot::Sender<Vec<RecordedSample>>),
    /// Copy the rolling histories
    Snapshot(oneshot::Sender<BufferSnapshot>),
    /// Zero filter state, histories and counters
    Reset,
    /// Flush the pending chunk and end the service
    Shutdown,
}

/// Real-time filtering service
pub struct FilterPipeline {
    config: PipelineConfig,
    bank: ChannelFilterBank,
    session: SessionState,

    // Communication channels
    event_receiver: mpsc::Receiver<AcquisitionEvent>,
    output_sender: broadcast::Sender<FilteredChunk>,
    command_receiver: mpsc::Receiver<PipelineCommand>,
    command_sender: Option<mpsc::Sender<PipelineCommand>>,

    // Rolling histories
    raw_buffers: Vec<VecDeque<f64>>,
    filtered_buffers: Vec<VecDeque<f64>>,
    time_buffer: VecDeque<f64>,

    chunk: Vec<Vec<f64>>,
    chunk_start: u64,
    recorded: Vec<RecordedSample>,

    stats: PipelineStats,
    shared_stats: Arc<Mutex<PipelineStats>>,
}

impl FilterPipeline {
    /// Create a pipeline fed by `event_receiver`
    pub fn new(config: PipelineConfig, event_receiver: mpsc::Receiver<AcquisitionEvent>) -> BspResult<Self> {
        config.validate()?;
        let bank = ChannelFilterBank::new(&config.filter, config.channels)?;
        let (output_sender, _) = broadcast::channel(64);
        let (command_sender, command_receiver) = mpsc::channel(32);

        let channels = config.channels;
        let history = || vec![VecDeque::with_capacity(config.buffer_size); channels];
        let stats = PipelineStats {
            channels: vec![ChannelStats::default(); channels],
            ..Default::default()
        };

        Ok(FilterPipeline {
            bank,
            session: SessionState::new(),
            event_receiver,
            output_sender,
            command_receiver,
            command_sender: Some(command_sender),
            raw_buffers: history(),
            filtered_buffers: history(),
            time_buffer: VecDeque::with_capacity(config.buffer_size),
            chunk: vec![Vec::with_capacity(config.chunk_size); channels],
            chunk_start: 0,
            recorded: Vec::new(),
            shared_stats: Arc::new(Mutex::new(stats.clone())),
            stats,
            config,
        })
    }

    /// Get a receiver for filtered chunks
    pub fn subscribe(&self) -> broadcast::Receiver<FilteredChunk> {
        self.output_sender.subscribe()
    }

    /// Get command sender for controlling the pipeline
    ///
    /// Returns `None` once the pipeline is running.
    pub fn command_handle(&self) -> Option<mpsc::Sender<PipelineCommand>> {
        self.command_sender.clone()
    }

    /// Statistics published after every chunk and state change
    pub fn stats_handle(&self) -> Arc<Mutex<PipelineStats>> {
        self.shared_stats.clone()
    }

    /// Get current configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Main processing loop
    ///
    /// Ends when the event source closes or on [`PipelineCommand::Shutdown`];
    /// returns the final statistics.
    ///
    /// Pending events always win over pending commands. A command therefore
    /// sees every frame queued before it, but while events are backed up (a
    /// file or stdin read at full speed) commands such as `Snapshot` and
    /// `Reset` wait until the backlog drains.
    pub async fn run(mut self) -> BspResult<PipelineStats> {
        // Only external handles keep the command channel open
        self.command_sender = None;
        let mut commands_open = true;

        info!(
            source = %self.config.source_label,
            channels = self.config.channels,
            filter = %self.config.filter.describe(),
            "filter pipeline started"
        );

        loop {
            tokio::select! {
                // Queued frames are handled before any command sent after them
                biased;

                event = self.event_receiver.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await?,
                        None => {
                            debug!("event source closed");
                            break;
                        }
                    }
                }

                command = self.command_receiver.recv(), if commands_open => {
                    match command {
                        Some(PipelineCommand::StartRecording) => {
                            self.recorded.clear();
                            self.session.recording = true;
                            self.stats.is_recording = true;
                            self.publish_stats().await;
                            info!("recording started");
                        }
                        Some(PipelineCommand::StopRecording(reply)) => {
                            self.session.recording = false;
                            self.stats.is_recording = false;
                            self.publish_stats().await;
                            let rows = std::mem::take(&mut self.recorded);
                            info!(rows = rows.len(), "recording stopped");
                            if reply.send(rows).is_err() {
                                warn!("recording requester went away, rows dropped");
                            }
                        }
                        Some(PipelineCommand::Snapshot(reply)) => {
                            // Requester may have given up waiting
                            let _ = reply.send(self.snapshot());
                        }
                        Some(PipelineCommand::Reset) => {
                            self.reset();
                            self.publish_stats().await;
                            info!("pipeline reset");
                        }
                        Some(PipelineCommand::Shutdown) => {
                            debug!("shutdown requested");
                            break;
                        }
                        None => {
                            commands_open = false;
                        }
                    }
                }
            }
        }

        self.flush_chunk();
        self.stats.is_acquiring = false;
        self.publish_stats().await;
        info!(
            samples = self.stats.sample_count,
            chunks = self.stats.chunks_sent,
            dropped = self.stats.frames_dropped,
            "filter pipeline finished"
        );
        Ok(self.stats)
    }

    async fn handle_event(&mut self, event: AcquisitionEvent) -> BspResult<()> {
        match &event {
            AcquisitionEvent::Connected { port } => {
                info!(port = %port, "source connected");
            }
            AcquisitionEvent::Started => {
                // A new session starts from rest
                self.bank.reset();
                self.clear_chunk();
                self.stats.is_acquiring = true;
                info!("acquisition session started");
            }
            AcquisitionEvent::Stopped => {
                self.flush_chunk();
                self.stats.is_acquiring = false;
                info!(
                    packets = self.session.packet_count,
                    rate = self.session.packet_rate(),
                    "acquisition session stopped"
                );
            }
            AcquisitionEvent::Disconnected => {
                self.stats.is_recording = false;
                info!("source disconnected");
            }
            AcquisitionEvent::PacketReceived(frame) => {
                self.handle_frame(frame)?;
                let dropped_before = self.session.sequence.dropped();
                self.session.on_event(&event);
                let gap = self.session.sequence.dropped() - dropped_before;
                if gap > 0 {
                    warn!(gap, sequence = frame.sequence, "frames missing from sequence");
                    self.stats.frames_dropped += gap;
                }
                return Ok(());
            }
        }

        self.session.on_event(&event);
        self.publish_stats().await;
        Ok(())
    }

    fn handle_frame(&mut self, frame: &Frame) -> BspResult<()> {
        let raw: Vec<f64> = frame.channels[..self.config.channels]
            .iter()
            .map(|&count| self.config.adc_scale.apply(count))
            .collect();
        let filtered = self.bank.process_frame(&raw)?;
        let time_s = self.stats.sample_count as f64 / self.config.sampling_rate();

        for (ch, (&r, &f)) in raw.iter().zip(&filtered).enumerate() {
            push_bounded(&mut self.raw_buffers[ch], r, self.config.buffer_size);
            push_bounded(&mut self.filtered_buffers[ch], f, self.config.buffer_size);
            self.chunk[ch].push(f);
            self.stats.channels[ch].update(f);
        }
        push_bounded(&mut self.time_buffer, time_s, self.config.buffer_size);

        if self.session.recording {
            self.recorded.push(RecordedSample {
                time_s,
                sequence: frame.sequence,
                raw,
                filtered,
            });
        }

        self.stats.sample_count += 1;
        if self.chunk[0].len() >= self.config.chunk_size {
            self.flush_chunk();
            // Publishing is async; keep it off the per-sample path
            if let Ok(mut shared) = self.shared_stats.try_lock() {
                *shared = self.stats.clone();
            }
        }
        Ok(())
    }

    /// Broadcast the pending chunk, if any
    fn flush_chunk(&mut self) {
        if self.chunk[0].is_empty() {
            return;
        }

        let fs = self.config.sampling_rate();
        let window = std::mem::replace(
            &mut self.chunk,
            vec![Vec::with_capacity(self.config.chunk_size); self.config.channels],
        );
        let chunk = FilteredChunk {
            source: self.config.source_label.clone(),
            fs,
            timestamp_ms: (self.chunk_start as f64 * 1000.0 / fs).round() as u64,
            window,
        };

        self.chunk_start = self.stats.sample_count;
        self.stats.chunks_sent += 1;
        // Send to subscribers (ignore if no receivers)
        let _ = self.output_sender.send(chunk);
    }

    fn clear_chunk(&mut self) {
        self.chunk.iter_mut().for_each(Vec::clear);
        self.chunk_start = self.stats.sample_count;
    }

    fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            raw: self.raw_buffers.iter().map(|b| b.iter().copied().collect()).collect(),
            filtered: self.filtered_buffers.iter().map(|b| b.iter().copied().collect()).collect(),
            timestamps: self.time_buffer.iter().copied().collect(),
            sample_count: self.stats.sample_count,
            chunks_sent: self.stats.chunks_sent,
        }
    }

    fn reset(&mut self) {
        self.bank.reset();
        self.raw_buffers.iter_mut().for_each(VecDeque::clear);
        self.filtered_buffers.iter_mut().for_each(VecDeque::clear);
        self.time_buffer.clear();
        self.recorded.clear();

        self.stats.sample_count = 0;
        self.stats.chunks_sent = 0;
        self.stats.frames_dropped = 0;
        self.stats.channels.iter_mut().for_each(|c| *c = ChannelStats::default());
        self.session.sequence.reset();
        self.clear_chunk();
    }

    async fn publish_stats(&self) {
        let mut shared = self.shared_stats.lock().await;
        *shared = self.stats.clone();
    }
}

fn push_bounded(buffer: &mut VecDeque<f64>, value: f64, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

/// Handles to a pipeline running in the background
pub struct PipelineHandle {
    /// Filtered chunk stream
    pub chunks: broadcast::Receiver<FilteredChunk>,
    /// Command channel
    pub commands: mpsc::Sender<PipelineCommand>,
    /// Shared statistics
    pub stats: Arc<Mutex<PipelineStats>>,
    /// Resolves to the final statistics when the pipeline ends
    pub task: JoinHandle<BspResult<PipelineStats>>,
}

/// Helper function to start the pipeline in a background task
pub fn start_pipeline(
    config: PipelineConfig,
    events: mpsc::Receiver<AcquisitionEvent>,
) -> BspResult<PipelineHandle> {
    let pipeline = FilterPipeline::new(config, events)?;
    let chunks = pipeline.subscribe();
    let stats = pipeline.stats_handle();
    let commands = pipeline.command_handle().ok_or_else(|| BspError::ConfigurationError {
        message: "pipeline command channel unavailable".to_string(),
    })?;

    let task = tokio::spawn(async move {
        let result = pipeline.run().await;
        if let Err(e) = &result {
            warn!(error = %e, "filter pipeline error");
        }
        result
    });

    Ok(PipelineHandle {
        chunks,
        commands,
        stats,
        task,
    })
}
