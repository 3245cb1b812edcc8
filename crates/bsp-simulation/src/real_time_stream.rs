//! Real-time byte stream that paces simulated frames like the serial link

use crate::frame_simulator::{FrameSimulator, PowerlineConfig, SimulatorConfig};
use crate::signal_patterns::SignalPattern;
use bsp_core::BspResult;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for real-time streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frame simulation configuration
    pub simulator: SimulatorConfig,
    /// Update rate in Hz (how often a batch of bytes is sent)
    pub update_rate: f64,
    /// Buffer size for the stream (number of batches a slow reader may lag)
    pub buffer_size: usize,
    /// Stop after this many frames, `None` to run until told to stop
    pub frame_limit: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            simulator: SimulatorConfig::default(),
            update_rate: 32.0, // 16 frames per tick at 512 Hz
            buffer_size: 64,
            frame_limit: None,
        }
    }
}

impl StreamConfig {
    /// Average frames emitted per tick; fractions carry over to later ticks
    pub fn frames_per_tick(&self) -> f64 {
        self.simulator.sampling_rate / self.update_rate
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    Stop,
    Pause,
    Resume,
    UpdateConfig(StreamConfig),
    SetPattern { channel: usize, patterns: Vec<SignalPattern> },
    SetPowerline(Option<PowerlineConfig>),
}

/// Stream statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub frames_generated: u64,
    pub bytes_sent: u64,
    pub simulated_seconds: f64,
    pub average_batch_time: f64,
}

/// Simulated serial link that broadcasts batches of wire bytes
pub struct RealTimeFrameStream {
    config: StreamConfig,
    simulator: FrameSimulator,
    data_sender: broadcast::Sender<Vec<u8>>,
    control_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: mpsc::Sender<StreamCommand>,
    is_running: bool,
    // Fraction of a frame owed from earlier ticks
    frame_debt: f64,
    stats: StreamStats,
}

impl RealTimeFrameStream {
    /// Create new real-time frame stream
    pub fn new(config: StreamConfig) -> BspResult<Self> {
        if !config.update_rate.is_finite() || config.update_rate <= 0.0 {
            return Err(bsp_core::BspError::ConfigurationError {
                message: format!("update_rate must be positive, got {}", config.update_rate),
            });
        }
        let simulator = FrameSimulator::new(config.simulator.clone())?;
        let (data_sender, _) = broadcast::channel(config.buffer_size.max(1));
        let (control_sender, control_receiver) = mpsc::channel(32);

        Ok(RealTimeFrameStream {
            config,
            simulator,
            data_sender,
            control_receiver,
            control_sender,
            is_running: false,
            frame_debt: 0.0,
            stats: StreamStats::default(),
        })
    }

    /// Get a receiver for byte batches
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.data_sender.subscribe()
    }

    /// Get control sender for sending commands
    pub fn control_handle(&self) -> mpsc::Sender<StreamCommand> {
        self.control_sender.clone()
    }

    /// Get current configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Drive the stream until the frame limit, or until every control handle
    /// is dropped; returns the final statistics
    pub async fn run(mut self) -> BspResult<StreamStats> {
        let mut ticker = self.ticker();
        // The struct keeps a sender for `control_handle`; drop it so the loop
        // ends once all external handles are gone
        let (closed, _) = mpsc::channel(1);
        self.control_sender = closed;

        info!(
            update_rate = self.config.update_rate,
            frames_per_tick = self.config.frames_per_tick(),
            "frame stream ready"
        );

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.is_running => {
                    if self.emit_batch() {
                        info!(frames = self.stats.frames_generated, "frame limit reached");
                        break;
                    }
                }

                command = self.control_receiver.recv() => {
                    match command {
                        Some(StreamCommand::Start) => {
                            self.set_running(true);
                            ticker.reset();
                            info!("frame stream started");
                        }
                        Some(StreamCommand::Stop) => {
                            self.set_running(false);
                            self.simulator.reset_time();
                            self.frame_debt = 0.0;
                            self.stats.frames_generated = 0;
                            self.stats.simulated_seconds = 0.0;
                            info!("frame stream stopped");
                        }
                        Some(StreamCommand::Pause) => {
                            self.set_running(false);
                            info!("frame stream paused");
                        }
                        Some(StreamCommand::Resume) => {
                            self.set_running(true);
                            info!("frame stream resumed");
                        }
                        Some(StreamCommand::UpdateConfig(new_config)) => {
                            self.simulator.update_config(new_config.simulator.clone())?;
                            self.config = new_config;
                            ticker = self.ticker();
                            info!("frame stream configuration updated");
                        }
                        Some(StreamCommand::SetPattern { channel, patterns }) => {
                            let mut config = self.simulator.config().clone();
                            match config.channels.get_mut(channel) {
                                Some(ch) => {
                                    ch.patterns = patterns;
                                    self.simulator.update_config(config.clone())?;
                                    self.config.simulator = config;
                                    info!(channel, "channel pattern updated");
                                }
                                None => warn!(channel, "no such channel, pattern ignored"),
                            }
                        }
                        Some(StreamCommand::SetPowerline(powerline)) => {
                            let mut config = self.simulator.config().clone();
                            config.powerline = powerline;
                            self.simulator.update_config(config.clone())?;
                            self.config.simulator = config;
                            info!(?powerline, "powerline interference updated");
                        }
                        None => {
                            debug!("frame stream control channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.stats.is_running = false;
        Ok(self.stats)
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / self.config.update_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        ticker
    }

    fn set_running(&mut self, running: bool) {
        self.is_running = running;
        self.stats.is_running = running;
    }

    /// Frames due on this tick, keeping the long-run rate at `sampling_rate`
    fn next_batch_len(&mut self) -> u64 {
        self.frame_debt += self.config.frames_per_tick();
        let due = self.frame_debt.floor();
        self.frame_debt -= due;

        let count = due as u64;
        match self.config.frame_limit {
            Some(limit) => count.min(limit.saturating_sub(self.stats.frames_generated)),
            None => count,
        }
    }

    /// Generate and send one batch; true once the frame limit is reached
    fn emit_batch(&mut self) -> bool {
        let start_time = Instant::now();

        let count = self.next_batch_len();
        let bytes = self.simulator.generate_bytes(count as usize);

        self.stats.frames_generated += count;
        self.stats.bytes_sent += bytes.len() as u64;
        self.stats.simulated_seconds = self.simulator.elapsed();
        self.stats.average_batch_time = start_time.elapsed().as_secs_f64();

        // No receivers is fine; the batch is simply dropped
        let _ = self.data_sender.send(bytes);

        let tick = 1.0 / self.config.update_rate;
        if self.stats.average_batch_time > tick {
            warn!(
                batch_ms = self.stats.average_batch_time * 1000.0,
                tick_ms = tick * 1000.0,
                "frame generation slower than the tick interval"
            );
        }

        self.config
            .frame_limit
            .is_some_and(|limit| self.stats.frames_generated >= limit)
    }
}

/// Helper function to create a stream and run it in the background
pub fn start_frame_stream(
    config: StreamConfig,
) -> BspResult<(
    broadcast::Receiver<Vec<u8>>,
    mpsc::Sender<StreamCommand>,
    JoinHandle<BspResult<StreamStats>>,
)> {
    let stream = RealTimeFrameStream::new(config)?;
    let data_receiver = stream.subscribe();
    let control_sender = stream.control_handle();

    let task = tokio::spawn(async move {
        let result = stream.run().await;
        if let Err(e) = &result {
            warn!(error = %e, "frame stream error");
        }
        result
    });

    Ok((data_receiver, control_sender, task))
}
